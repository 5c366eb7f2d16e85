//! Big-endian bit cursor over raw elementary-stream payloads

use bitstream_io::{BigEndian, BitRead, BitReader};

/// MSB-first reader that degrades instead of failing: a read past the end of
/// the buffer returns the bits accumulated so far (zero when none remain),
/// which keeps header walks over truncated payloads bounded and panic-free.
pub struct BitCursor<'a> {
    inner: BitReader<&'a [u8], BigEndian>,
}

impl<'a> BitCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            inner: BitReader::new(data),
        }
    }

    /// Read up to 32 bits, MSB first. Bits beyond the end of the buffer are
    /// simply absent: the partial value is returned and later reads yield 0.
    pub fn read_bits(&mut self, n: u32) -> u32 {
        let mut val = 0u32;
        for _ in 0..n {
            match self.inner.read::<1, u8>() {
                Ok(bit) => val = (val << 1) | bit as u32,
                Err(_) => break,
            }
        }
        val
    }

    /// Discard `n` bits.
    pub fn skip(&mut self, n: u32) {
        self.read_bits(n);
    }

    /// Unsigned Exp-Golomb. The leading-zero count is capped at 32 so an
    /// all-zero (or exhausted) buffer terminates; the cap case decodes to
    /// `u32::MAX`.
    pub fn read_ue(&mut self) -> u32 {
        let mut zeros = 0u32;
        while self.read_bits(1) == 0 && zeros < 32 {
            zeros += 1;
        }
        let base = (1u64 << zeros) - 1;
        (base + self.read_bits(zeros) as u64) as u32
    }
}
