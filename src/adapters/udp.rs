//! UDP transport adapters.
//!
//! The source binds a datagram socket (joining a multicast group when the
//! address calls for one) and treats every received datagram as one relay
//! unit. The sink dials the configured destination and forwards whatever the
//! fan-out channel delivers. Neither direction has a handshake, so a bound
//! socket counts as connected.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapters::{SinkCell, SourceCell};
use crate::config::{UdpSinkConfig, UdpSourceConfig};
use crate::constants::RECV_BUFFER_SIZE;
use crate::probe::TsProbe;

/// Creates and configures the receive socket. Handles both unicast and
/// multicast addresses.
fn create_recv_socket(address: &str, port: u16) -> Result<std::net::UdpSocket> {
    let bind_addr: SocketAddr = format!("{address}:{port}")
        .parse()
        .with_context(|| format!("invalid UDP source address {address}:{port}"))?;
    let ip = match bind_addr.ip() {
        IpAddr::V4(v4) => v4,
        _ => anyhow::bail!("only IPv4 is supported"),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&bind_addr.into())?;

    // Join multicast group if the address is multicast
    if ip.is_multicast() {
        let iface = Ipv4Addr::UNSPECIFIED; // default interface
        socket.join_multicast_v4(&ip, &iface)?;
    }

    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Binds the receive socket and starts the datagram pump. Returns the
/// counter cell, the pump task and the bound address.
pub fn spawn_source(
    config: &UdpSourceConfig,
    probe: TsProbe,
    tx: broadcast::Sender<Bytes>,
    fatal: mpsc::Sender<anyhow::Error>,
    shutdown: broadcast::Sender<()>,
) -> Result<(Arc<SourceCell>, JoinHandle<()>, SocketAddr)> {
    let socket = create_recv_socket(&config.address, config.port)?;
    let socket = UdpSocket::from_std(socket).context("failed to register UDP source socket")?;
    let local = socket.local_addr()?;
    info!(%local, "UDP source listening");

    let cell = SourceCell::new(0, true);
    let task = {
        let cell = cell.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            loop {
                let received = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    r = socket.recv_from(&mut buf) => r,
                };
                match received {
                    Ok((0, _)) => continue,
                    Ok((len, _peer)) => {
                        let unit = Bytes::copy_from_slice(&buf[..len]);
                        cell.record_unit(len);
                        probe.scan(&unit);
                        let _ = tx.send(unit);
                    }
                    Err(e) => {
                        let _ = fatal.send(anyhow!("UDP source receive failed: {e}")).await;
                        break;
                    }
                }
            }
        })
    };
    Ok((cell, task, local))
}

/// Starts the datagram forwarder for one destination. Setup problems leave
/// the cell disconnected rather than stopping the relay.
pub fn spawn_sink(
    config: &UdpSinkConfig,
    mut rx: broadcast::Receiver<Bytes>,
    shutdown: broadcast::Sender<()>,
) -> (Arc<SinkCell>, JoinHandle<()>) {
    let dest = format!("{}:{}", config.address, config.port);
    let cell = SinkCell::new(0, false);
    let task = {
        let cell = cell.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let socket = match connect_dest(&dest).await {
                Ok(socket) => socket,
                Err(e) => {
                    warn!(dest = dest.as_str(), error = %e, "UDP sink unavailable");
                    return;
                }
            };
            cell.set_connected(true);
            info!(dest = dest.as_str(), "UDP sink ready");
            loop {
                let unit = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    r = rx.recv() => match r {
                        Ok(unit) => unit,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            cell.record_dropped(n);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                match socket.send(&unit).await {
                    Ok(sent) => cell.record_unit(sent),
                    Err(e) => warn!(dest = dest.as_str(), error = %e, "UDP send failed"),
                }
            }
        })
    };
    (cell, task)
}

async fn connect_dest(dest: &str) -> Result<UdpSocket> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("failed to bind UDP sink socket")?;
    socket
        .connect(dest)
        .await
        .with_context(|| format!("cannot reach UDP destination {dest}"))?;
    Ok(socket)
}
