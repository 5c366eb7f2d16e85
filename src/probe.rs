//! Inline format extraction on the media data path.
//!
//! Every data unit flowing source -> sinks passes through here until the
//! picture format is known; after that the per-unit cost collapses to one
//! lock acquisition and a flag check.

use crate::constants::{
    H264_NAL_SPS, MPEG2_SEQ_HEADER, PAT_PID, START_CODE, TS_PACKET_SIZE, TS_SYNC_BYTE,
};
use crate::es::{parse_avc_sps, parse_mpeg2_seq};
use crate::metadata::{SharedMetadata, VideoCodec, VideoFormat};
use crate::psi::{parse_pat, parse_pmt};

#[derive(Clone)]
pub struct TsProbe {
    meta: SharedMetadata,
}

impl TsProbe {
    pub fn new(meta: SharedMetadata) -> Self {
        Self { meta }
    }

    /// Walk the whole 188-byte packets of one data unit; a trailing partial
    /// packet is ignored. Packets without the sync byte are skipped, no
    /// resynchronization is attempted.
    pub fn scan(&self, unit: &[u8]) {
        let (valid, mut pmt_pid, mut video_pid, mut codec) = self.meta.progress();
        if valid {
            return;
        }

        for pkt in unit.chunks_exact(TS_PACKET_SIZE) {
            if pkt[0] != TS_SYNC_BYTE {
                continue;
            }
            let pid = ((pkt[1] & 0x1F) as u16) << 8 | pkt[2] as u16;

            if pid == PAT_PID {
                if pmt_pid.is_none() {
                    if let Some(found) = parse_pat(pkt) {
                        if self.meta.set_pmt_pid(found) {
                            pmt_pid = Some(found);
                            tracing::info!("program map PID discovered: {found:#06x}");
                        } else if !self.resync(&mut pmt_pid, &mut video_pid, &mut codec) {
                            return;
                        }
                    }
                }
            } else if pmt_pid == Some(pid) && video_pid.is_none() {
                if let Some((vpid, vcodec)) = parse_pmt(pkt) {
                    if self.meta.set_video(vpid, vcodec) {
                        video_pid = Some(vpid);
                        codec = vcodec;
                        tracing::info!("video stream discovered: PID {vpid:#06x}, {vcodec:?}");
                    } else if !self.resync(&mut pmt_pid, &mut video_pid, &mut codec) {
                        return;
                    }
                }
            } else if video_pid == Some(pid) {
                if let Some(fmt) = scan_video_payload(pkt, codec) {
                    if self.meta.publish(fmt) {
                        tracing::info!(
                            "video format: {}x{} {} {}/{}",
                            fmt.width,
                            fmt.height,
                            if fmt.interlaced { "interlaced" } else { "progressive" },
                            fmt.fps_num,
                            fmt.fps_den,
                        );
                    }
                    return;
                }
            }
        }
    }

    /// Adopt the shared selection after a lost write-once step; scans run
    /// concurrently when a listening source has several callers. Returns
    /// false once the format is already published and the walk is moot.
    fn resync(
        &self,
        pmt_pid: &mut Option<u16>,
        video_pid: &mut Option<u16>,
        codec: &mut VideoCodec,
    ) -> bool {
        let (valid, shared_pmt, shared_video, shared_codec) = self.meta.progress();
        *pmt_pid = shared_pmt;
        *video_pid = shared_video;
        *codec = shared_codec;
        !valid
    }
}

/// Look for an elementary-stream header in the payload of one video packet.
/// Headers straddling packet boundaries are not reassembled; they repeat
/// continuously in live streams, so the next intact one wins.
fn scan_video_payload(pkt: &[u8], codec: VideoCodec) -> Option<VideoFormat> {
    let mut payload_start = 4usize;
    if pkt[3] & 0x20 != 0 {
        payload_start += 1 + pkt[4] as usize; // adaptation field
    }
    if payload_start + 20 >= TS_PACKET_SIZE || pkt[3] & 0x10 == 0 {
        return None;
    }

    let payload = &pkt[payload_start..];
    for j in 0..payload.len() - 4 {
        if payload[j..j + 3] != START_CODE {
            continue;
        }
        match codec {
            VideoCodec::H264 => {
                if payload[j + 3] & 0x1F == H264_NAL_SPS {
                    return parse_avc_sps(&payload[j + 3..]);
                }
            }
            VideoCodec::Mpeg2 => {
                if payload[j + 3] == MPEG2_SEQ_HEADER {
                    return parse_mpeg2_seq(&payload[j + 4..]);
                }
            }
            // recognized in the map table but never header-decoded
            VideoCodec::Hevc | VideoCodec::Unknown => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PMT_PID: u16 = 0x0100;
    const VIDEO_PID: u16 = 0x0101;

    // SPS payload for 1920x1088 progressive (baseline profile, no cropping)
    const SPS_1080: [u8; 8] = [0x42, 0x00, 0x1E, 0xF4, 0x03, 0xC0, 0x11, 0x20];
    // SPS payload for 1280x720 progressive
    const SPS_720: [u8; 8] = [0x42, 0x00, 0x1E, 0xF4, 0x02, 0x80, 0x2D, 0x80];

    fn ts_header(pid: u16, flags: u8) -> [u8; 4] {
        [0x47, 0x40 | (pid >> 8) as u8, pid as u8, flags]
    }

    fn pat_packet(pmt_pid: u16) -> Vec<u8> {
        let mut pkt = vec![0xFFu8; TS_PACKET_SIZE];
        pkt[0..4].copy_from_slice(&ts_header(0, 0x10));
        pkt[4] = 0x00; // pointer
        pkt[5] = 0x00; // table_id
        pkt[6] = 0xB0;
        pkt[7] = 13; // 5 header + one entry + CRC
        pkt[8..13].fill(0);
        pkt[13..15].copy_from_slice(&1u16.to_be_bytes());
        pkt[15] = 0xE0 | (pmt_pid >> 8) as u8;
        pkt[16] = pmt_pid as u8;
        pkt
    }

    fn pmt_packet(pmt_pid: u16, stream_type: u8, video_pid: u16) -> Vec<u8> {
        let mut pkt = vec![0xFFu8; TS_PACKET_SIZE];
        pkt[0..4].copy_from_slice(&ts_header(pmt_pid, 0x10));
        pkt[4] = 0x00;
        pkt[5] = 0x02; // table_id
        pkt[6] = 0xB0;
        pkt[7] = 18; // 9 fixed + one 5-byte entry + CRC
        pkt[8..15].fill(0);
        pkt[15] = 0xF0;
        pkt[16] = 0x00; // program_info_length
        pkt[17] = stream_type;
        pkt[18] = 0xE0 | (video_pid >> 8) as u8;
        pkt[19] = video_pid as u8;
        pkt[20] = 0xF0;
        pkt[21] = 0x00;
        pkt
    }

    fn video_packet(pid: u16, header: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0xFFu8; TS_PACKET_SIZE];
        pkt[0..4].copy_from_slice(&ts_header(pid, 0x10));
        pkt[4..7].copy_from_slice(&[0, 0, 1]);
        pkt[7..7 + header.len()].copy_from_slice(header);
        pkt
    }

    fn sps_packet(sps: &[u8]) -> Vec<u8> {
        let mut nal = vec![0x67];
        nal.extend_from_slice(sps);
        video_packet(VIDEO_PID, &nal)
    }

    fn probe() -> (TsProbe, SharedMetadata) {
        let meta = SharedMetadata::new();
        (TsProbe::new(meta.clone()), meta)
    }

    #[test]
    fn discovers_across_separate_units() {
        let (probe, meta) = probe();
        probe.scan(&pat_packet(PMT_PID));
        assert_eq!(meta.snapshot().pmt_pid, Some(PMT_PID));

        probe.scan(&pmt_packet(PMT_PID, 0x1B, VIDEO_PID));
        let snap = meta.snapshot();
        assert_eq!(snap.video_pid, Some(VIDEO_PID));
        assert_eq!(snap.codec, VideoCodec::H264);
        assert!(!snap.valid);

        probe.scan(&sps_packet(&SPS_1080));
        let snap = meta.snapshot();
        assert!(snap.valid);
        assert_eq!((snap.width, snap.height), (1920, 1088));
        assert_eq!((snap.fps_num, snap.fps_den), (25, 1));
        assert!(!snap.interlaced);
    }

    #[test]
    fn discovers_within_one_unit() {
        let (probe, meta) = probe();
        let mut unit = pat_packet(PMT_PID);
        unit.extend(pmt_packet(PMT_PID, 0x1B, VIDEO_PID));
        unit.extend(sps_packet(&SPS_1080));
        probe.scan(&unit);
        assert!(meta.snapshot().valid);
    }

    #[test]
    fn later_association_table_is_ignored() {
        let (probe, meta) = probe();
        probe.scan(&pat_packet(PMT_PID));
        probe.scan(&pat_packet(0x0777));
        assert_eq!(meta.snapshot().pmt_pid, Some(PMT_PID));
    }

    #[test]
    fn valid_state_short_circuits_further_parsing() {
        let (probe, meta) = probe();
        probe.scan(&pat_packet(PMT_PID));
        probe.scan(&pmt_packet(PMT_PID, 0x1B, VIDEO_PID));
        probe.scan(&sps_packet(&SPS_1080));
        let before = meta.snapshot();
        assert!(before.valid);

        // a different header afterwards must change nothing
        probe.scan(&sps_packet(&SPS_720));
        let after = meta.snapshot();
        assert_eq!((after.width, after.height), (before.width, before.height));
        assert_eq!(after.fps_num, before.fps_num);
    }

    #[test]
    fn bad_sync_and_partial_trailing_chunks_are_skipped() {
        let (probe, meta) = probe();
        let mut bad = pat_packet(PMT_PID);
        bad[0] = 0x48;
        probe.scan(&bad);
        assert_eq!(meta.snapshot().pmt_pid, None);

        let mut unit = pat_packet(PMT_PID);
        unit.extend_from_slice(&[0x47, 0x1F]); // truncated tail
        probe.scan(&unit);
        assert_eq!(meta.snapshot().pmt_pid, Some(PMT_PID));
    }

    #[test]
    fn mpeg2_sequence_header_path() {
        let (probe, meta) = probe();
        probe.scan(&pat_packet(PMT_PID));
        probe.scan(&pmt_packet(PMT_PID, 0x02, VIDEO_PID));
        assert_eq!(meta.snapshot().codec, VideoCodec::Mpeg2);

        let seq = [0xB3, 0x78, 0x04, 0x38, 0x13, 0xFF, 0xFF, 0xFF, 0xFF];
        probe.scan(&video_packet(VIDEO_PID, &seq));
        let snap = meta.snapshot();
        assert!(snap.valid);
        assert_eq!((snap.width, snap.height), (1920, 1080));
        assert_eq!((snap.fps_num, snap.fps_den), (25, 1));
    }

    #[test]
    fn hevc_streams_are_recognized_but_not_decoded() {
        let (probe, meta) = probe();
        probe.scan(&pat_packet(PMT_PID));
        probe.scan(&pmt_packet(PMT_PID, 0x24, VIDEO_PID));
        assert_eq!(meta.snapshot().codec, VideoCodec::Hevc);

        probe.scan(&sps_packet(&SPS_1080));
        assert!(!meta.snapshot().valid);
    }

    #[test]
    fn concurrent_scans_of_divergent_streams_stay_coherent() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let mut unit_a = pat_packet(PMT_PID);
        unit_a.extend(pmt_packet(PMT_PID, 0x1B, VIDEO_PID));
        unit_a.extend(sps_packet(&SPS_1080));

        let mut unit_b = pat_packet(0x0200);
        unit_b.extend(pmt_packet(0x0200, 0x1B, 0x0201));
        let mut nal = vec![0x67];
        nal.extend_from_slice(&SPS_720);
        unit_b.extend(video_packet(0x0201, &nal));

        for _ in 0..2000 {
            let (probe, meta) = probe();
            let barrier = Arc::new(Barrier::new(2));
            let worker = {
                let probe = probe.clone();
                let barrier = barrier.clone();
                let unit = unit_a.clone();
                thread::spawn(move || {
                    barrier.wait();
                    probe.scan(&unit);
                })
            };
            barrier.wait();
            probe.scan(&unit_b);
            worker.join().unwrap();

            // whichever caller won discovery, the published picture must be
            // the one carried on the selected video PID
            let snap = meta.snapshot();
            assert!(snap.valid);
            match snap.video_pid {
                Some(VIDEO_PID) => {
                    assert_eq!((snap.width, snap.height, snap.fps_num), (1920, 1088, 25));
                }
                Some(0x0201) => {
                    assert_eq!((snap.width, snap.height, snap.fps_num), (1280, 720, 50));
                }
                other => panic!("video PID {other:?} was never selected"),
            }
        }
    }

    #[test]
    fn video_payload_behind_adaptation_field() {
        let (probe, meta) = probe();
        probe.scan(&pat_packet(PMT_PID));
        probe.scan(&pmt_packet(PMT_PID, 0x1B, VIDEO_PID));

        let mut pkt = vec![0xFFu8; TS_PACKET_SIZE];
        pkt[0..4].copy_from_slice(&ts_header(VIDEO_PID, 0x30));
        pkt[4] = 8; // adaptation field length
        pkt[5..13].fill(0);
        pkt[13..16].copy_from_slice(&[0, 0, 1]);
        pkt[16] = 0x67;
        pkt[17..25].copy_from_slice(&SPS_1080);
        probe.scan(&pkt);
        assert!(meta.snapshot().valid);
    }
}
