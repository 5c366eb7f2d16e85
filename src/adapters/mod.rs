//! Transport adapters that feed and drain the relay.
//!
//! Every adapter is an I/O task plus a shared counter cell. The task owns the
//! socket and updates the cell as units move; the telemetry engine polls the
//! cell once per cycle through [`SourceAdapter`] or [`SinkAdapter`]. A cell
//! whose transport has no live connection answers `None` so the engine can
//! skip that record instead of reporting stale numbers.

pub mod srt;
pub mod udp;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::stats::{PeerStats, RateWindow, SinkStats, SourceStats};

/// Raised by a listening source when an inbound caller completes its
/// handshake; carries any routing identifier the caller supplied.
#[derive(Debug, Clone)]
pub struct CallerEvent {
    pub remote: SocketAddr,
    pub stream_id: Option<String>,
}

/// Statistics capability of the inbound transport.
pub trait SourceAdapter: Send + Sync {
    /// Snapshot of receive counters, or `None` while disconnected.
    fn statistics(&self) -> Option<SourceStats>;
}

/// Statistics capability of one outbound transport.
pub trait SinkAdapter: Send + Sync {
    /// Snapshot of send counters, or `None` while disconnected.
    fn statistics(&self) -> Option<SinkStats>;
}

#[derive(Debug)]
struct PeerEntry {
    address: SocketAddr,
    bytes: u64,
    packets: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes: u64,
    packets: u64,
    dropped: u64,
    window: RateWindow,
    peers: Vec<PeerEntry>,
}

impl Counters {
    fn record(&mut self, len: usize) {
        self.bytes += len as u64;
        self.packets += 1;
    }

    fn add_peer(&mut self, address: SocketAddr) {
        self.peers.push(PeerEntry {
            address,
            bytes: 0,
            packets: 0,
        });
    }

    /// Bumps the aggregate alongside the peer, so a listener's totals are
    /// always the sum over everyone who connected.
    fn record_peer(&mut self, address: SocketAddr, len: usize) {
        self.record(len);
        if let Some(peer) = self.peers.iter_mut().find(|p| p.address == address) {
            peer.bytes += len as u64;
            peer.packets += 1;
        }
    }

    fn remove_peer(&mut self, address: SocketAddr) {
        self.peers.retain(|p| p.address != address);
    }

    fn peer_stats(&self) -> Vec<PeerStats> {
        self.peers
            .iter()
            .map(|p| PeerStats {
                address: p.address.to_string(),
                bytes: p.bytes,
                packets: p.packets,
            })
            .collect()
    }
}

/// Receive-side counter cell shared between an inbound I/O task and the
/// telemetry engine.
pub struct SourceCell {
    inner: Mutex<Counters>,
    connected: AtomicBool,
    latency_ms: u32,
}

impl SourceCell {
    /// `connected` starts true for transports that are live from bind time
    /// (UDP, SRT listeners) and false for callers still handshaking.
    pub fn new(latency_ms: u32, connected: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Counters::default()),
            connected: AtomicBool::new(connected),
            latency_ms,
        })
    }

    pub fn set_connected(&self, up: bool) {
        self.connected.store(up, Ordering::SeqCst);
    }

    pub fn record_unit(&self, len: usize) {
        self.inner.lock().unwrap().record(len);
    }

    pub fn add_peer(&self, address: SocketAddr) {
        self.inner.lock().unwrap().add_peer(address);
    }

    pub fn record_peer_unit(&self, address: SocketAddr, len: usize) {
        self.inner.lock().unwrap().record_peer(address, len);
    }

    pub fn remove_peer(&self, address: SocketAddr) {
        self.inner.lock().unwrap().remove_peer(address);
    }
}

impl SourceAdapter for SourceCell {
    fn statistics(&self) -> Option<SourceStats> {
        if !self.connected.load(Ordering::SeqCst) {
            return None;
        }
        let mut inner = self.inner.lock().unwrap();
        let c = &mut *inner;
        let (bytes, packets, rate) = c.window.sample(c.bytes, c.packets);
        Some(SourceStats {
            total_bytes: c.bytes,
            bytes,
            packets,
            receive_rate_mbps: rate,
            negotiated_latency_ms: self.latency_ms,
            peers: c.peer_stats(),
            ..Default::default()
        })
    }
}

/// Send-side counter cell shared between an outbound I/O task and the
/// telemetry engine.
pub struct SinkCell {
    inner: Mutex<Counters>,
    connected: AtomicBool,
    latency_ms: u32,
}

impl SinkCell {
    pub fn new(latency_ms: u32, connected: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Counters::default()),
            connected: AtomicBool::new(connected),
            latency_ms,
        })
    }

    pub fn set_connected(&self, up: bool) {
        self.connected.store(up, Ordering::SeqCst);
    }

    pub fn record_unit(&self, len: usize) {
        self.inner.lock().unwrap().record(len);
    }

    pub fn add_peer(&self, address: SocketAddr) {
        self.inner.lock().unwrap().add_peer(address);
    }

    pub fn record_peer_unit(&self, address: SocketAddr, len: usize) {
        self.inner.lock().unwrap().record_peer(address, len);
    }

    pub fn remove_peer(&self, address: SocketAddr) {
        self.inner.lock().unwrap().remove_peer(address);
    }

    /// Units discarded locally because a peer queue was full or the fan-out
    /// channel lagged. Accumulates for the life of the adapter.
    pub fn record_dropped(&self, n: u64) {
        self.inner.lock().unwrap().dropped += n;
    }
}

impl SinkAdapter for SinkCell {
    fn statistics(&self) -> Option<SinkStats> {
        if !self.connected.load(Ordering::SeqCst) {
            return None;
        }
        let mut inner = self.inner.lock().unwrap();
        let c = &mut *inner;
        let (_bytes, packets, rate) = c.window.sample(c.bytes, c.packets);
        Some(SinkStats {
            total_bytes: c.bytes,
            packets,
            packets_dropped: c.dropped,
            send_rate_mbps: rate,
            negotiated_latency_ms: self.latency_ms,
            peers: c.peer_stats(),
            ..Default::default()
        })
    }
}
