//! Transport statistics as the adapters report them, one snapshot per
//! telemetry cycle. Counter semantics follow SRT conventions: `total_*` is
//! cumulative for the life of the connection, bare byte/packet counts cover
//! the interval since the previous query, and rates derive from the same
//! deltas. Metrics the transport cannot observe locally stay at their zero
//! defaults rather than being omitted.

use std::time::Instant;

/// Counters for one connected peer.
#[derive(Debug, Clone)]
pub struct PeerStats {
    /// Formatted as `ip:port`.
    pub address: String,
    pub bytes: u64,
    pub packets: u64,
}

/// Receive-side snapshot produced by a source adapter.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    pub total_bytes: u64,
    pub bytes: u64,
    pub packets: u64,
    pub packets_lost: u64,
    pub packets_dropped: u64,
    pub packets_retransmitted: u64,
    pub rtt_ms: f64,
    pub receive_rate_mbps: f64,
    pub bandwidth_mbps: f64,
    pub negotiated_latency_ms: u32,
    pub peers: Vec<PeerStats>,
}

/// Send-side snapshot produced by a sink adapter.
#[derive(Debug, Clone, Default)]
pub struct SinkStats {
    pub total_bytes: u64,
    pub packets: u64,
    pub packets_lost: u64,
    pub packets_dropped: u64,
    pub packets_retransmitted: u64,
    pub rtt_ms: f64,
    pub send_rate_mbps: f64,
    pub bandwidth_mbps: f64,
    pub negotiated_latency_ms: u32,
    pub peers: Vec<PeerStats>,
}

/// Turns cumulative counters into per-query deltas and an Mbit/s rate.
#[derive(Debug, Default)]
pub struct RateWindow {
    prev: Option<(Instant, u64, u64)>,
}

impl RateWindow {
    /// Feed the current cumulative (bytes, packets); returns the delta since
    /// the previous call plus the byte rate over that span. The first call
    /// has no baseline and reports zeros.
    pub fn sample(&mut self, bytes: u64, packets: u64) -> (u64, u64, f64) {
        let now = Instant::now();
        let out = match self.prev {
            Some((then, b, p)) => {
                let secs = now.duration_since(then).as_secs_f64();
                let db = bytes.saturating_sub(b);
                let dp = packets.saturating_sub(p);
                let mbps = if secs > 0.0 {
                    db as f64 * 8.0 / secs / 1_000_000.0
                } else {
                    0.0
                };
                (db, dp, mbps)
            }
            None => (0, 0, 0.0),
        };
        self.prev = Some((now, bytes, packets));
        out
    }
}
