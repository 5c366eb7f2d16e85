//! SRT transport adapters built on srt-tokio.
//!
//! Listener endpoints accept every caller and run one task per connection;
//! caller endpoints dial out and optionally redial after a drop. All counters
//! come from local accounting as units cross the socket, so statistics look
//! the same in both modes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use srt_tokio::{SrtListener, SrtSocket};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::adapters::{CallerEvent, SinkCell, SourceCell};
use crate::config::{SrtConfig, SrtMode};
use crate::constants::{DEFAULT_SRT_LATENCY_MS, PEER_QUEUE_CAPACITY, RECONNECT_DELAY_SECS};
use crate::probe::TsProbe;

/// Starts the inbound SRT endpoint. Listener mode binds and accepts any
/// caller, announcing each handshake on `events`; caller mode dials out and,
/// with auto-reconnect on, keeps redialing until shutdown.
pub async fn spawn_source(
    config: &SrtConfig,
    probe: TsProbe,
    tx: broadcast::Sender<Bytes>,
    events: mpsc::Sender<CallerEvent>,
    fatal: mpsc::Sender<anyhow::Error>,
    shutdown: broadcast::Sender<()>,
) -> Result<(Arc<SourceCell>, JoinHandle<()>)> {
    let latency = config.latency_ms.unwrap_or(DEFAULT_SRT_LATENCY_MS);
    match config.mode {
        SrtMode::Listener => {
            let local = config.listen_addr()?;
            let (listener, mut incoming) = SrtListener::builder()
                .latency(Duration::from_millis(u64::from(latency)))
                .bind(local)
                .await
                .with_context(|| format!("SRT source failed to bind {local}"))?;
            info!(%local, "SRT source listening");

            let cell = SourceCell::new(latency, true);
            let keep_listening = config.keep_listening;
            let task = {
                let cell = cell.clone();
                let mut shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    let _listener = listener;
                    let incoming = incoming.incoming();
                    loop {
                        let request = tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            r = incoming.next() => match r {
                                Some(request) => request,
                                None => break,
                            },
                        };
                        let remote = request.remote();
                        let stream_id = request.stream_id().map(|s| s.to_string());
                        info!(
                            %remote,
                            stream_id = stream_id.as_deref().unwrap_or("(none)"),
                            "source caller connecting"
                        );
                        let _ = events.send(CallerEvent { remote, stream_id }).await;
                        match request.accept(None).await {
                            Ok(socket) => {
                                cell.add_peer(remote);
                                tokio::spawn(read_source_peer(
                                    socket,
                                    remote,
                                    cell.clone(),
                                    probe.clone(),
                                    tx.clone(),
                                    fatal.clone(),
                                    keep_listening,
                                    shutdown.subscribe(),
                                ));
                            }
                            Err(e) => warn!(%remote, error = %e, "source handshake failed"),
                        }
                    }
                })
            };
            Ok((cell, task))
        }
        SrtMode::Caller => {
            let remote = config.call_addr()?;
            let cell = SourceCell::new(latency, false);
            let stream_id = config.stream_id.clone();
            let auto_reconnect = config.auto_reconnect;
            let task = {
                let cell = cell.clone();
                let mut shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    loop {
                        info!(remote = remote.as_str(), "SRT source calling");
                        let connect = SrtSocket::builder()
                            .latency(Duration::from_millis(u64::from(latency)))
                            .call(remote.as_str(), stream_id.as_deref());
                        let connected = tokio::select! {
                            _ = shutdown_rx.recv() => return,
                            r = connect => r,
                        };
                        match connected {
                            Ok(mut socket) => {
                                cell.set_connected(true);
                                info!(remote = remote.as_str(), "SRT source connected");
                                loop {
                                    let item = tokio::select! {
                                        _ = shutdown_rx.recv() => return,
                                        r = socket.next() => r,
                                    };
                                    match item {
                                        Some(Ok((_at, unit))) => {
                                            cell.record_unit(unit.len());
                                            probe.scan(&unit);
                                            let _ = tx.send(unit);
                                        }
                                        Some(Err(e)) => {
                                            warn!(error = %e, "SRT source read failed");
                                            break;
                                        }
                                        None => break,
                                    }
                                }
                                cell.set_connected(false);
                                warn!(remote = remote.as_str(), "SRT source disconnected");
                            }
                            Err(e) => {
                                warn!(remote = remote.as_str(), error = %e, "SRT source connect failed");
                            }
                        }
                        if !auto_reconnect {
                            let _ = fatal
                                .send(anyhow!(
                                    "SRT source {remote} is gone and auto-reconnect is off"
                                ))
                                .await;
                            return;
                        }
                        tokio::select! {
                            _ = shutdown_rx.recv() => return,
                            _ = sleep(Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
                        }
                    }
                })
            };
            Ok((cell, task))
        }
        SrtMode::Rendezvous => anyhow::bail!("rendezvous mode is not supported"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn read_source_peer(
    mut socket: SrtSocket,
    remote: SocketAddr,
    cell: Arc<SourceCell>,
    probe: TsProbe,
    tx: broadcast::Sender<Bytes>,
    fatal: mpsc::Sender<anyhow::Error>,
    keep_listening: bool,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let item = tokio::select! {
            // Shutdown is not a caller leaving; skip the disconnect path.
            _ = shutdown.recv() => return,
            r = socket.next() => r,
        };
        match item {
            Some(Ok((_at, unit))) => {
                cell.record_peer_unit(remote, unit.len());
                probe.scan(&unit);
                let _ = tx.send(unit);
            }
            Some(Err(e)) => {
                warn!(%remote, error = %e, "source read failed");
                break;
            }
            None => break,
        }
    }
    cell.remove_peer(remote);
    info!(%remote, "source caller disconnected");
    if !keep_listening {
        let _ = fatal
            .send(anyhow!("source caller {remote} left and keep-listening is off"))
            .await;
    }
}

/// Starts one outbound SRT endpoint. Trouble on a sink never stops the
/// relay by itself; at worst its statistics become unavailable.
pub async fn spawn_sink(
    config: &SrtConfig,
    mut rx: broadcast::Receiver<Bytes>,
    shutdown: broadcast::Sender<()>,
) -> Result<(Arc<SinkCell>, JoinHandle<()>)> {
    let latency = config.latency_ms.unwrap_or(DEFAULT_SRT_LATENCY_MS);
    match config.mode {
        SrtMode::Listener => {
            let local = config.listen_addr()?;
            let (listener, mut incoming) = SrtListener::builder()
                .latency(Duration::from_millis(u64::from(latency)))
                .bind(local)
                .await
                .with_context(|| format!("SRT sink failed to bind {local}"))?;
            info!(%local, "SRT sink listening");

            let cell = SinkCell::new(latency, true);
            let task = {
                let cell = cell.clone();
                let mut shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    let _listener = listener;
                    let incoming = incoming.incoming();
                    let mut peers: Vec<mpsc::Sender<Bytes>> = Vec::new();
                    loop {
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            r = incoming.next() => {
                                let Some(request) = r else { break };
                                let remote = request.remote();
                                match request.accept(None).await {
                                    Ok(socket) => {
                                        info!(%remote, "sink caller connected");
                                        let (queue_tx, queue_rx) = mpsc::channel(PEER_QUEUE_CAPACITY);
                                        cell.add_peer(remote);
                                        tokio::spawn(write_sink_peer(
                                            socket,
                                            remote,
                                            cell.clone(),
                                            queue_rx,
                                        ));
                                        peers.push(queue_tx);
                                    }
                                    Err(e) => warn!(%remote, error = %e, "sink handshake failed"),
                                }
                            }
                            r = rx.recv() => match r {
                                Ok(unit) => {
                                    peers.retain(|queue| match queue.try_send(unit.clone()) {
                                        Ok(()) => true,
                                        Err(mpsc::error::TrySendError::Full(_)) => {
                                            cell.record_dropped(1);
                                            true
                                        }
                                        // Writer ended and already cleared its peer entry.
                                        Err(mpsc::error::TrySendError::Closed(_)) => false,
                                    });
                                }
                                Err(broadcast::error::RecvError::Lagged(n)) => cell.record_dropped(n),
                                Err(broadcast::error::RecvError::Closed) => break,
                            },
                        }
                    }
                })
            };
            Ok((cell, task))
        }
        SrtMode::Caller => {
            let remote = config.call_addr()?;
            let cell = SinkCell::new(latency, false);
            let stream_id = config.stream_id.clone();
            let auto_reconnect = config.auto_reconnect;
            let task = {
                let cell = cell.clone();
                let mut shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    loop {
                        info!(remote = remote.as_str(), "SRT sink calling");
                        let connect = SrtSocket::builder()
                            .latency(Duration::from_millis(u64::from(latency)))
                            .call(remote.as_str(), stream_id.as_deref());
                        let connected = tokio::select! {
                            _ = shutdown_rx.recv() => return,
                            r = connect => r,
                        };
                        match connected {
                            Ok(mut socket) => {
                                cell.set_connected(true);
                                info!(remote = remote.as_str(), "SRT sink connected");
                                loop {
                                    let unit = tokio::select! {
                                        _ = shutdown_rx.recv() => return,
                                        r = rx.recv() => match r {
                                            Ok(unit) => unit,
                                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                                cell.record_dropped(n);
                                                continue;
                                            }
                                            Err(broadcast::error::RecvError::Closed) => return,
                                        },
                                    };
                                    let len = unit.len();
                                    if let Err(e) = socket.send((Instant::now(), unit)).await {
                                        warn!(remote = remote.as_str(), error = %e, "SRT sink write failed");
                                        break;
                                    }
                                    cell.record_unit(len);
                                }
                                cell.set_connected(false);
                            }
                            Err(e) => {
                                warn!(remote = remote.as_str(), error = %e, "SRT sink connect failed");
                            }
                        }
                        if !auto_reconnect {
                            warn!(remote = remote.as_str(), "SRT sink finished, auto-reconnect is off");
                            return;
                        }
                        tokio::select! {
                            _ = shutdown_rx.recv() => return,
                            _ = sleep(Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
                        }
                    }
                })
            };
            Ok((cell, task))
        }
        SrtMode::Rendezvous => anyhow::bail!("rendezvous mode is not supported"),
    }
}

// A subscriber hanging up only clears its peer entry; the listener keeps
// serving everyone else and keeps accepting.
async fn write_sink_peer(
    mut socket: SrtSocket,
    remote: SocketAddr,
    cell: Arc<SinkCell>,
    mut queue: mpsc::Receiver<Bytes>,
) {
    let mut failed = false;
    while let Some(unit) = queue.recv().await {
        let len = unit.len();
        if let Err(e) = socket.send((Instant::now(), unit)).await {
            warn!(%remote, error = %e, "sink write failed");
            failed = true;
            break;
        }
        cell.record_peer_unit(remote, len);
    }
    cell.remove_peer(remote);
    // A closed queue is pipeline shutdown, not the caller hanging up.
    if failed {
        info!(%remote, "sink caller disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{SinkAdapter, SourceAdapter};
    use crate::metadata::SharedMetadata;

    fn caller_config() -> SrtConfig {
        SrtConfig {
            mode: SrtMode::Caller,
            local_address: None,
            local_port: None,
            address: Some("127.0.0.1".to_string()),
            port: Some(6971),
            latency_ms: Some(80),
            stream_id: Some("relay/test".to_string()),
            auto_reconnect: true,
            keep_listening: true,
        }
    }

    #[tokio::test]
    async fn rendezvous_is_refused() {
        let mut config = caller_config();
        config.mode = SrtMode::Rendezvous;
        let (tx, _rx) = broadcast::channel(4);
        let (events_tx, _events_rx) = mpsc::channel(4);
        let (fatal_tx, _fatal_rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(1);
        let probe = TsProbe::new(SharedMetadata::new());
        assert!(
            spawn_source(&config, probe, tx, events_tx, fatal_tx, shutdown_tx)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn caller_source_stays_unavailable_until_connected() {
        let config = caller_config();
        let (tx, _rx) = broadcast::channel(4);
        let (events_tx, _events_rx) = mpsc::channel(4);
        let (fatal_tx, _fatal_rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(1);
        let probe = TsProbe::new(SharedMetadata::new());
        let (cell, task) =
            spawn_source(&config, probe, tx, events_tx, fatal_tx, shutdown_tx.clone())
                .await
                .unwrap();

        assert!(cell.statistics().is_none());

        let _ = shutdown_tx.send(());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn subscriber_departure_leaves_sink_listening() {
        let config = SrtConfig {
            mode: SrtMode::Listener,
            local_address: Some("127.0.0.1".to_string()),
            local_port: Some(16972),
            address: None,
            port: None,
            latency_ms: Some(80),
            stream_id: None,
            auto_reconnect: true,
            keep_listening: false,
        };
        let (tx, _keep) = broadcast::channel(64);
        let (shutdown_tx, _) = broadcast::channel(1);
        let (cell, task) = spawn_sink(&config, tx.subscribe(), shutdown_tx.clone())
            .await
            .unwrap();

        let first = SrtSocket::builder()
            .latency(Duration::from_millis(80))
            .call("127.0.0.1:16972", None)
            .await
            .unwrap();
        drop(first);

        // a later subscriber is still served after the first one hung up
        let mut second = SrtSocket::builder()
            .latency(Duration::from_millis(80))
            .call("127.0.0.1:16972", None)
            .await
            .unwrap();

        let unit = Bytes::from_static(&[0x47; 188]);
        let received = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let _ = tx.send(unit.clone());
                tokio::select! {
                    item = second.next() => break item,
                    _ = sleep(Duration::from_millis(50)) => {}
                }
            }
        })
        .await
        .unwrap();
        match received {
            Some(Ok((_at, payload))) => assert_eq!(&payload[..], &unit[..]),
            other => panic!("second subscriber got {other:?}"),
        }
        assert!(cell.statistics().is_some());

        let _ = shutdown_tx.send(());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn caller_sink_keeps_redialing_until_shutdown() {
        let config = caller_config();
        let (tx, _keep) = broadcast::channel(4);
        let (shutdown_tx, _) = broadcast::channel(1);
        let (cell, task) = spawn_sink(&config, tx.subscribe(), shutdown_tx.clone())
            .await
            .unwrap();

        // nothing listens on the far end; the dial loop must stay alive
        sleep(Duration::from_millis(200)).await;
        assert!(cell.statistics().is_none());
        assert!(!task.is_finished());

        let _ = shutdown_tx.send(());
        task.await.unwrap();
    }
}
