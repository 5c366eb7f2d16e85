//! Pipeline assembly.
//!
//! A pipeline is one source task fanning transport units out over a broadcast
//! bus to one task per sink, plus a shutdown bus every task listens on.
//! Adapters register their counter cells here; the registry order of the
//! sinks is the order they appear in the configuration, and it is the index
//! the telemetry engine tags their records with.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::adapters::{self, CallerEvent, SinkAdapter, SourceAdapter};
use crate::config::{RelayConfig, SinkConfig, SourceConfig};
use crate::constants::FANOUT_CAPACITY;
use crate::metadata::SharedMetadata;
use crate::probe::TsProbe;

/// A running relay.
pub struct Pipeline {
    source: Arc<dyn SourceAdapter>,
    sinks: Vec<Arc<dyn SinkAdapter>>,
    local_addr: Option<SocketAddr>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// Channel ends the pipeline hands to its operator: fatal source errors,
/// and caller announcements from a listening source. Sinks never push
/// fatals; at worst they go unavailable.
pub struct PipelineEvents {
    pub fatal: mpsc::Receiver<anyhow::Error>,
    pub callers: mpsc::Receiver<CallerEvent>,
}

/// Wires up and starts every adapter named by the configuration.
pub async fn build(
    config: &RelayConfig,
    metadata: &SharedMetadata,
) -> Result<(Pipeline, PipelineEvents)> {
    metadata.reset();
    let probe = TsProbe::new(metadata.clone());

    let (tx, _) = broadcast::channel::<Bytes>(FANOUT_CAPACITY);
    let (shutdown, _) = broadcast::channel::<()>(1);
    let (fatal_tx, fatal_rx) = mpsc::channel::<anyhow::Error>(8);
    let (caller_tx, caller_rx) = mpsc::channel::<CallerEvent>(32);

    let mut tasks = Vec::new();

    // Sinks subscribe before the source task can publish its first unit.
    let mut sinks: Vec<Arc<dyn SinkAdapter>> = Vec::with_capacity(config.sinks.len());
    for sink in &config.sinks {
        match sink {
            SinkConfig::Udp(udp) => {
                let (cell, task) = adapters::udp::spawn_sink(udp, tx.subscribe(), shutdown.clone());
                tasks.push(task);
                sinks.push(cell);
            }
            SinkConfig::Srt(srt) => {
                let (cell, task) =
                    adapters::srt::spawn_sink(srt, tx.subscribe(), shutdown.clone()).await?;
                tasks.push(task);
                sinks.push(cell);
            }
        }
    }

    let mut local_addr = None;
    let source: Arc<dyn SourceAdapter> = match &config.source {
        SourceConfig::Udp(udp) => {
            let (cell, task, addr) = adapters::udp::spawn_source(
                udp,
                probe.clone(),
                tx.clone(),
                fatal_tx.clone(),
                shutdown.clone(),
            )?;
            local_addr = Some(addr);
            tasks.push(task);
            cell
        }
        SourceConfig::Srt(srt) => {
            let (cell, task) = adapters::srt::spawn_source(
                srt,
                probe.clone(),
                tx.clone(),
                caller_tx.clone(),
                fatal_tx.clone(),
                shutdown.clone(),
            )
            .await?;
            tasks.push(task);
            cell
        }
    };

    info!(sinks = sinks.len(), "pipeline assembled");

    Ok((
        Pipeline {
            source,
            sinks,
            local_addr,
            shutdown,
            tasks,
        },
        PipelineEvents {
            fatal: fatal_rx,
            callers: caller_rx,
        },
    ))
}

impl Pipeline {
    /// Where a UDP source actually bound, once the OS has picked the port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn source(&self) -> Arc<dyn SourceAdapter> {
        self.source.clone()
    }

    pub fn sinks(&self) -> Vec<Arc<dyn SinkAdapter>> {
        self.sinks.clone()
    }

    /// Signals every task and waits for them to wind down.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
