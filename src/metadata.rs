//! Shared per-pipeline stream-format state

use std::sync::{Arc, Mutex, MutexGuard};

/// Video codec signalled by the programme map table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    #[default]
    Unknown,
    Mpeg2,
    H264,
    Hevc,
}

/// One decoded video header, ready for publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub interlaced: bool,
}

/// Discovery progress and picture format for one stream.
///
/// `pmt_pid` and `video_pid` are write-once (first discovery wins); `valid`
/// only ever goes false -> true within a pipeline instance.
#[derive(Debug, Clone, Copy)]
pub struct StreamMetadata {
    pub pmt_pid: Option<u16>,
    pub video_pid: Option<u16>,
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub interlaced: bool,
    pub valid: bool,
}

impl Default for StreamMetadata {
    fn default() -> Self {
        Self {
            pmt_pid: None,
            video_pid: None,
            codec: VideoCodec::Unknown,
            width: 0,
            height: 0,
            fps_num: 0,
            fps_den: 1,
            interlaced: false,
            valid: false,
        }
    }
}

/// Handle to the single mutex-guarded metadata record shared between the
/// packet path and the telemetry task. All reads are copy-out; nothing
/// parses or does I/O while holding the lock.
#[derive(Clone, Default)]
pub struct SharedMetadata {
    inner: Arc<Mutex<StreamMetadata>>,
}

impl SharedMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to the blank state; called when a pipeline instance is created.
    pub fn reset(&self) {
        *self.lock() = StreamMetadata::default();
    }

    pub fn snapshot(&self) -> StreamMetadata {
        *self.lock()
    }

    /// (valid, pmt_pid, video_pid, codec) in one lock acquisition; the
    /// packet path consults this before touching any parser.
    pub fn progress(&self) -> (bool, Option<u16>, Option<u16>, VideoCodec) {
        let m = self.lock();
        (m.valid, m.pmt_pid, m.video_pid, m.codec)
    }

    /// Returns false when a map PID was already known (later association
    /// tables cannot re-point it).
    pub fn set_pmt_pid(&self, pid: u16) -> bool {
        let mut m = self.lock();
        if m.pmt_pid.is_some() {
            return false;
        }
        m.pmt_pid = Some(pid);
        true
    }

    /// Returns false when a video stream was already chosen.
    pub fn set_video(&self, pid: u16, codec: VideoCodec) -> bool {
        let mut m = self.lock();
        if m.video_pid.is_some() {
            return false;
        }
        m.video_pid = Some(pid);
        m.codec = codec;
        true
    }

    /// Publish a decoded header and flip `valid`. Returns false when a
    /// format is already public; the record never changes once valid.
    pub fn publish(&self, f: VideoFormat) -> bool {
        let mut m = self.lock();
        if m.valid {
            return false;
        }
        m.width = f.width;
        m.height = f.height;
        m.fps_num = f.fps_num;
        m.fps_den = f.fps_den;
        m.interlaced = f.interlaced;
        m.valid = true;
        true
    }

    fn lock(&self) -> MutexGuard<'_, StreamMetadata> {
        self.inner.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pids_are_write_once() {
        let meta = SharedMetadata::new();
        assert!(meta.set_pmt_pid(0x100));
        assert!(!meta.set_pmt_pid(0x200));
        assert!(meta.set_video(0x101, VideoCodec::H264));
        assert!(!meta.set_video(0x202, VideoCodec::Mpeg2));

        let snap = meta.snapshot();
        assert_eq!(snap.pmt_pid, Some(0x100));
        assert_eq!(snap.video_pid, Some(0x101));
        assert_eq!(snap.codec, VideoCodec::H264);
    }

    #[test]
    fn first_published_format_wins() {
        let meta = SharedMetadata::new();
        assert!(meta.publish(VideoFormat {
            width: 1920,
            height: 1088,
            fps_num: 25,
            fps_den: 1,
            interlaced: false,
        }));
        assert!(!meta.publish(VideoFormat {
            width: 1280,
            height: 720,
            fps_num: 50,
            fps_den: 1,
            interlaced: true,
        }));

        let snap = meta.snapshot();
        assert!(snap.valid);
        assert_eq!((snap.width, snap.height), (1920, 1088));
        assert_eq!((snap.fps_num, snap.fps_den), (25, 1));
        assert!(!snap.interlaced);
    }

    #[test]
    fn publish_flips_valid_and_reset_clears() {
        let meta = SharedMetadata::new();
        assert!(meta.publish(VideoFormat {
            width: 1280,
            height: 720,
            fps_num: 50,
            fps_den: 1,
            interlaced: false,
        }));
        let snap = meta.snapshot();
        assert!(snap.valid);
        assert_eq!((snap.width, snap.height), (1280, 720));

        meta.reset();
        let snap = meta.snapshot();
        assert!(!snap.valid);
        assert_eq!(snap.width, 0);
        assert_eq!(snap.fps_den, 1);
        assert_eq!(snap.pmt_pid, None);
    }
}
