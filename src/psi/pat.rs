//! Program association walk

use crate::psi::table_offset;

/// Program-map PID of the first program with a non-zero program number, or
/// None when the packet carries no usable association entry.
pub fn parse_pat(packet: &[u8]) -> Option<u16> {
    if packet.len() < 8 {
        return None;
    }

    let offset = table_offset(packet)?;
    if offset + 8 > packet.len() {
        return None;
    }

    // table_id(1) + flags/section_length(2) + ts_id(2) + version(1)
    // + section_number(1) + last_section_number(1), then 4-byte entries
    let section_length = (((packet[offset + 1] & 0x0F) as usize) << 8) | packet[offset + 2] as usize;
    let section_end = offset + 3 + section_length - 4; // CRC trailer excluded

    let mut idx = offset + 8;
    while idx + 4 <= section_end && idx + 4 <= packet.len() {
        let program_number = ((packet[idx] as u16) << 8) | packet[idx + 1] as u16;
        let pmt_pid = (((packet[idx + 2] & 0x1F) as u16) << 8) | packet[idx + 3] as u16;

        if program_number != 0 {
            // program 0 points at the network PID
            return Some(pmt_pid);
        }
        idx += 4;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Association packet with the given (program_number, pmt_pid) entries,
    /// pointer field zero, CRC left garbage (never checked).
    fn pat_packet(entries: &[(u16, u16)]) -> Vec<u8> {
        let mut pkt = vec![0xFFu8; 188];
        pkt[0] = 0x47;
        pkt[1] = 0x40; // payload_unit_start, PID 0
        pkt[2] = 0x00;
        pkt[3] = 0x10; // payload, no adaptation
        pkt[4] = 0x00; // pointer field
        let o = 5;
        pkt[o] = 0x00; // table_id
        let section_length = 5 + entries.len() * 4 + 4;
        pkt[o + 1] = 0xB0 | ((section_length >> 8) as u8 & 0x0F);
        pkt[o + 2] = section_length as u8;
        pkt[o + 3..o + 8].fill(0);
        let mut idx = o + 8;
        for &(pn, pid) in entries {
            pkt[idx..idx + 2].copy_from_slice(&pn.to_be_bytes());
            pkt[idx + 2] = 0xE0 | (pid >> 8) as u8;
            pkt[idx + 3] = pid as u8;
            idx += 4;
        }
        pkt
    }

    #[test]
    fn first_non_zero_program_wins() {
        let pkt = pat_packet(&[(0, 0x0010), (1, 0x0100), (2, 0x0200)]);
        assert_eq!(parse_pat(&pkt), Some(0x0100));
    }

    #[test]
    fn network_only_table_yields_nothing() {
        let pkt = pat_packet(&[(0, 0x0010)]);
        assert_eq!(parse_pat(&pkt), None);
    }

    #[test]
    fn survives_adaptation_field() {
        let plain = pat_packet(&[(7, 0x0123)]);
        // rebuild with a 10-byte adaptation field in front of the payload
        let mut pkt = vec![0xFFu8; 188];
        pkt[0..4].copy_from_slice(&[0x47, 0x40, 0x00, 0x30]);
        pkt[4] = 10;
        pkt[5..15].fill(0);
        let table = &plain[4..4 + 1 + 3 + 5 + 4 + 4]; // pointer + header + one entry + CRC
        pkt[15..15 + table.len()].copy_from_slice(table);
        assert_eq!(parse_pat(&pkt), Some(0x0123));
    }

    #[test]
    fn short_or_overflowing_packets_are_skipped() {
        assert_eq!(parse_pat(&[0x47, 0x40, 0x00]), None);
        // adaptation length pushing the pointer read past the end
        let mut pkt = vec![0u8; 188];
        pkt[0..4].copy_from_slice(&[0x47, 0x40, 0x00, 0x30]);
        pkt[4] = 200;
        assert_eq!(parse_pat(&pkt), None);
    }
}
