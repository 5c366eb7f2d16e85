//! Container tables decoded straight from raw 188-byte transport packets.
//!
//! These walks deliberately skip section reassembly and CRC validation: on a
//! live link the tables repeat continuously and the first syntactically
//! plausible packet wins (the state layer makes the discovery write-once).
//! The only rejection is a packet too short for the structure being read.

pub mod pat;
pub mod pmt;

pub use pat::parse_pat;
pub use pmt::parse_pmt;

/// Offset of the section header inside a packet: past the 4-byte TS header,
/// the adaptation field when flagged in byte 3, and the pointer field that
/// precedes a section when the payload flag is set.
pub(crate) fn table_offset(packet: &[u8]) -> Option<usize> {
    let mut offset = if packet[3] & 0x20 != 0 {
        5 + packet[4] as usize
    } else {
        4
    };
    if packet[3] & 0x10 != 0 {
        offset += 1 + *packet.get(offset)? as usize;
    }
    Some(offset)
}
