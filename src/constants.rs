//! Constants for MPEG-TS relaying and stream-format extraction

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;
pub const PAT_PID: u16 = 0x0000;

/// Elementary-stream start code prefix (0x000001)
pub const START_CODE: [u8; 3] = [0x00, 0x00, 0x01];
/// MPEG-2 sequence-header start code value (follows the prefix)
pub const MPEG2_SEQ_HEADER: u8 = 0xB3;
/// H.264 NAL unit type carrying a sequence parameter set
pub const H264_NAL_SPS: u8 = 7;

/// PMT stream_type values we treat as video
pub const STREAM_TYPE_MPEG2: u8 = 0x02;
pub const STREAM_TYPE_H264: u8 = 0x1B;
pub const STREAM_TYPE_HEVC: u8 = 0x24;

/// H.264 profiles whose SPS carries chroma/bit-depth/scaling-list fields
pub const H264_HIGH_PROFILES: &[u8] = &[100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134];

/// MPEG-2 frame_rate_code tables, index 1..=8 (index 0 = forbidden code)
pub const MPEG2_FPS_NUM: [u32; 9] = [0, 24_000, 24, 25, 30_000, 30, 50, 60_000, 60];
pub const MPEG2_FPS_DEN: [u32; 9] = [1, 1_001, 1, 1, 1_001, 1, 1, 1_001, 1];

/// Telemetry polling period
pub const STATS_INTERVAL_SECS: u64 = 1;

/// Control-plane IPC endpoint
pub const DEFAULT_IPC_SOCKET: &str = "/tmp/hydra_unix_sock";

/// SRT default receive latency in milliseconds (reported when not configured)
pub const DEFAULT_SRT_LATENCY_MS: u32 = 120;

/// Fan-out channel depth in data units; laggards drop rather than block
pub const FANOUT_CAPACITY: usize = 8192;
/// Per-caller queue depth on listener sinks
pub const PEER_QUEUE_CAPACITY: usize = 2048;
/// Pause between caller reconnect attempts
pub const RECONNECT_DELAY_SECS: u64 = 1;

/// Datagram receive buffer: fits any UDP payload carrying TS packets
pub const RECV_BUFFER_SIZE: usize = 65_536;
