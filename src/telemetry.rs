//! The once-a-second telemetry engine.
//!
//! Each cycle snapshots the source adapter, merges in the published video
//! format, and writes one JSON line to the control channel, followed by one
//! `stats_sink:`-prefixed line per destination in registry order. An adapter
//! whose statistics are unavailable skips its record for that cycle; nothing
//! else in the cycle is disturbed. Caller announcements forwarded from a
//! listening source go out the moment they arrive, between cycles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::warn;

use crate::adapters::{CallerEvent, SinkAdapter, SourceAdapter};
use crate::constants::STATS_INTERVAL_SECS;
use crate::ipc::IpcChannel;
use crate::metadata::{SharedMetadata, StreamMetadata};
use crate::stats::{PeerStats, SinkStats, SourceStats};

#[derive(Debug, Serialize)]
struct SourceCallerEntry {
    #[serde(rename = "caller-address")]
    caller_address: String,
    #[serde(rename = "bytes-received")]
    bytes_received: u64,
    #[serde(rename = "packets-received")]
    packets_received: u64,
}

impl From<&PeerStats> for SourceCallerEntry {
    fn from(p: &PeerStats) -> Self {
        Self {
            caller_address: p.address.clone(),
            bytes_received: p.bytes,
            packets_received: p.packets,
        }
    }
}

#[derive(Debug, Serialize)]
struct SinkCallerEntry {
    #[serde(rename = "caller-address")]
    caller_address: String,
    #[serde(rename = "bytes-sent")]
    bytes_sent: u64,
    #[serde(rename = "packets-sent")]
    packets_sent: u64,
}

impl From<&PeerStats> for SinkCallerEntry {
    fn from(p: &PeerStats) -> Self {
        Self {
            caller_address: p.address.clone(),
            bytes_sent: p.bytes,
            packets_sent: p.packets,
        }
    }
}

/// The per-cycle source record. Field order is the wire order; video fields
/// ride at the tail and only once a format has been published.
#[derive(Debug, Serialize)]
struct SourceRecord {
    #[serde(rename = "total-bytes-received")]
    total_bytes_received: u64,
    #[serde(rename = "packets-received")]
    packets_received: u64,
    #[serde(rename = "packets-received-lost")]
    packets_received_lost: u64,
    #[serde(rename = "packets-received-dropped")]
    packets_received_dropped: u64,
    #[serde(rename = "packets-received-retransmitted")]
    packets_received_retransmitted: u64,
    #[serde(rename = "bytes-received")]
    bytes_received: u64,
    #[serde(rename = "rtt-ms")]
    rtt_ms: f64,
    #[serde(rename = "receive-rate-mbps")]
    receive_rate_mbps: f64,
    #[serde(rename = "bandwidth-mbps")]
    bandwidth_mbps: f64,
    #[serde(rename = "negotiated-latency-ms")]
    negotiated_latency_ms: u32,
    #[serde(rename = "connected-callers")]
    connected_callers: usize,
    callers: Vec<SourceCallerEntry>,
    #[serde(rename = "video-width", skip_serializing_if = "Option::is_none")]
    video_width: Option<u32>,
    #[serde(rename = "video-height", skip_serializing_if = "Option::is_none")]
    video_height: Option<u32>,
    #[serde(rename = "video-framerate-num", skip_serializing_if = "Option::is_none")]
    video_framerate_num: Option<u32>,
    #[serde(rename = "video-framerate-den", skip_serializing_if = "Option::is_none")]
    video_framerate_den: Option<u32>,
    #[serde(rename = "video-interlace-mode", skip_serializing_if = "Option::is_none")]
    video_interlace_mode: Option<&'static str>,
}

impl SourceRecord {
    fn build(stats: SourceStats, meta: StreamMetadata) -> Self {
        let video = meta.valid;
        Self {
            total_bytes_received: stats.total_bytes,
            packets_received: stats.packets,
            packets_received_lost: stats.packets_lost,
            packets_received_dropped: stats.packets_dropped,
            packets_received_retransmitted: stats.packets_retransmitted,
            bytes_received: stats.bytes,
            rtt_ms: stats.rtt_ms,
            receive_rate_mbps: stats.receive_rate_mbps,
            bandwidth_mbps: stats.bandwidth_mbps,
            negotiated_latency_ms: stats.negotiated_latency_ms,
            connected_callers: stats.peers.len(),
            callers: stats.peers.iter().map(SourceCallerEntry::from).collect(),
            video_width: video.then_some(meta.width),
            video_height: video.then_some(meta.height),
            video_framerate_num: video.then_some(meta.fps_num),
            video_framerate_den: video.then_some(meta.fps_den),
            video_interlace_mode: video.then_some(if meta.interlaced {
                "interleaved"
            } else {
                "progressive"
            }),
        }
    }
}

/// The per-cycle record for one destination, tagged with its registry index.
#[derive(Debug, Serialize)]
struct SinkRecord {
    #[serde(rename = "sink-index")]
    sink_index: usize,
    #[serde(rename = "bytes-sent-total")]
    bytes_sent_total: u64,
    #[serde(rename = "packets-sent")]
    packets_sent: u64,
    #[serde(rename = "packets-sent-lost")]
    packets_sent_lost: u64,
    #[serde(rename = "packets-sent-dropped")]
    packets_sent_dropped: u64,
    #[serde(rename = "packets-sent-retransmitted")]
    packets_sent_retransmitted: u64,
    #[serde(rename = "rtt-ms")]
    rtt_ms: f64,
    #[serde(rename = "send-rate-mbps")]
    send_rate_mbps: f64,
    #[serde(rename = "bandwidth-mbps")]
    bandwidth_mbps: f64,
    #[serde(rename = "negotiated-latency-ms")]
    negotiated_latency_ms: u32,
    #[serde(rename = "connected-callers")]
    connected_callers: usize,
    callers: Vec<SinkCallerEntry>,
}

impl SinkRecord {
    fn build(index: usize, stats: SinkStats) -> Self {
        Self {
            sink_index: index,
            bytes_sent_total: stats.total_bytes,
            packets_sent: stats.packets,
            packets_sent_lost: stats.packets_lost,
            packets_sent_dropped: stats.packets_dropped,
            packets_sent_retransmitted: stats.packets_retransmitted,
            rtt_ms: stats.rtt_ms,
            send_rate_mbps: stats.send_rate_mbps,
            bandwidth_mbps: stats.bandwidth_mbps,
            negotiated_latency_ms: stats.negotiated_latency_ms,
            connected_callers: stats.peers.len(),
            callers: stats.peers.iter().map(SinkCallerEntry::from).collect(),
        }
    }
}

/// Drives the statistics cycle until `running` goes false.
pub struct TelemetryEngine {
    source: Arc<dyn SourceAdapter>,
    sinks: Vec<Arc<dyn SinkAdapter>>,
    metadata: SharedMetadata,
    ipc: Arc<IpcChannel>,
    running: Arc<AtomicBool>,
    events: mpsc::Receiver<CallerEvent>,
    events_closed: bool,
}

impl TelemetryEngine {
    pub fn new(
        source: Arc<dyn SourceAdapter>,
        sinks: Vec<Arc<dyn SinkAdapter>>,
        metadata: SharedMetadata,
        ipc: Arc<IpcChannel>,
        running: Arc<AtomicBool>,
        events: mpsc::Receiver<CallerEvent>,
    ) -> Self {
        Self {
            source,
            sinks,
            metadata,
            ipc,
            running,
            events,
            events_closed: false,
        }
    }

    /// The first record lands one interval after start. A cycle already in
    /// progress always runs to completion; the shutdown flag is re-read
    /// before each poll, so stopping costs at most one interval.
    pub async fn run(mut self) {
        while self.running.load(Ordering::SeqCst) {
            if !self.sleep_one_interval().await {
                break;
            }
            self.poll_once().await;
        }
    }

    /// Sleeps one interval while forwarding caller announcements as they
    /// arrive. Returns the shutdown flag's state afterwards.
    async fn sleep_one_interval(&mut self) -> bool {
        let wait = sleep(Duration::from_secs(STATS_INTERVAL_SECS));
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => break,
                event = self.events.recv(), if !self.events_closed => {
                    match event {
                        Some(event) => self.announce_caller(event).await,
                        None => self.events_closed = true,
                    }
                }
            }
        }
        self.running.load(Ordering::SeqCst)
    }

    /// Forwards a caller's routing identifier the moment it appears.
    async fn announce_caller(&self, event: CallerEvent) {
        if let Some(stream_id) = event.stream_id {
            self.ipc
                .send(&format!("stats_source_stream_id:{stream_id}"))
                .await;
        }
    }

    /// One cycle: the source record first, then each sink in registry order.
    async fn poll_once(&self) {
        match self.source.statistics() {
            Some(stats) => {
                let record = SourceRecord::build(stats, self.metadata.snapshot());
                self.emit(None, &record).await;
            }
            None => warn!("source statistics unavailable, skipping this cycle's source record"),
        }
        for (index, sink) in self.sinks.iter().enumerate() {
            let Some(stats) = sink.statistics() else {
                continue;
            };
            let record = SinkRecord::build(index, stats);
            self.emit(Some("stats_sink:"), &record).await;
        }
    }

    async fn emit<T: Serialize>(&self, prefix: Option<&str>, record: &T) {
        match serde_json::to_string(record) {
            Ok(json) => {
                let line = match prefix {
                    Some(prefix) => format!("{prefix}{json}\n"),
                    None => format!("{json}\n"),
                };
                self.ipc.send(&line).await;
            }
            Err(e) => warn!(error = %e, "could not encode telemetry record"),
        }
    }
}
