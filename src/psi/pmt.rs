//! Program map walk

use crate::constants::{STREAM_TYPE_H264, STREAM_TYPE_HEVC, STREAM_TYPE_MPEG2};
use crate::metadata::VideoCodec;
use crate::psi::table_offset;

/// PID and codec of the first video elementary stream listed in the map
/// table, or None when the packet lists none.
pub fn parse_pmt(packet: &[u8]) -> Option<(u16, VideoCodec)> {
    if packet.len() < 12 {
        return None;
    }

    let offset = table_offset(packet)?;
    if offset + 12 > packet.len() {
        return None;
    }

    let section_length = (((packet[offset + 1] & 0x0F) as usize) << 8) | packet[offset + 2] as usize;
    // fixed part: table_id(1) + flags/length(2) + program_number(2) + version(1)
    // + section_number(1) + last_section_number(1) + PCR PID(2) + program_info_length(2)
    let program_info_length =
        (((packet[offset + 10] & 0x0F) as usize) << 8) | packet[offset + 11] as usize;

    let section_end = offset + 3 + section_length - 4;
    let mut idx = offset + 12 + program_info_length;

    while idx + 5 <= section_end && idx + 5 <= packet.len() {
        let stream_type = packet[idx];
        let es_pid = (((packet[idx + 1] & 0x1F) as u16) << 8) | packet[idx + 2] as u16;
        let es_info_length = (((packet[idx + 3] & 0x0F) as usize) << 8) | packet[idx + 4] as usize;

        let codec = match stream_type {
            STREAM_TYPE_MPEG2 => Some(VideoCodec::Mpeg2),
            STREAM_TYPE_H264 => Some(VideoCodec::H264),
            STREAM_TYPE_HEVC => Some(VideoCodec::Hevc),
            _ => None,
        };
        if let Some(codec) = codec {
            return Some((es_pid, codec));
        }
        idx += 5 + es_info_length;
    }
    None
}
