//! Process orchestration: control-channel handshake, configuration intake,
//! pipeline startup, and the shutdown path.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::config::RelayConfig;
use crate::ipc::IpcChannel;
use crate::metadata::SharedMetadata;
use crate::pipeline;
use crate::telemetry::TelemetryEngine;

pub struct Options {
    /// Route identifier announced on the control channel at startup.
    pub route_id: String,
    /// Unix socket the telemetry records are written to.
    pub ipc_socket: PathBuf,
    /// Configuration file; stdin supplies a single JSON line when absent.
    pub config: Option<PathBuf>,
}

/// Runs the relay until interrupted or a transport gives out.
pub async fn run(opts: Options) -> Result<()> {
    let ipc = Arc::new(IpcChannel::connect(&opts.ipc_socket).await?);

    // The route identifier goes out before the configuration is read.
    ipc.send(&format!("route_id:{}", opts.route_id)).await;

    let json = match &opts.config {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read configuration file {}", path.display()))?,
        None => read_config_line().await?,
    };
    let config = RelayConfig::from_json(json.trim()).context("invalid pipeline configuration")?;

    let metadata = SharedMetadata::new();
    let (pipeline, events) = pipeline::build(&config, &metadata).await?;

    let running = Arc::new(AtomicBool::new(true));
    let engine = TelemetryEngine::new(
        pipeline.source(),
        pipeline.sinks(),
        metadata,
        ipc,
        running.clone(),
        events.callers,
    );
    let engine_task = tokio::spawn(engine.run());

    let mut fatal = events.fatal;
    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            Ok(())
        }
        err = fatal.recv() => match err {
            Some(err) => Err(err),
            None => Ok(()),
        },
    };

    running.store(false, Ordering::SeqCst);
    let _ = engine_task.await;
    pipeline.shutdown().await;

    outcome
}

async fn read_config_line() -> Result<String> {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = String::new();
    let n = stdin
        .read_line(&mut line)
        .await
        .context("cannot read pipeline configuration from stdin")?;
    if n == 0 {
        bail!("no pipeline configuration on stdin");
    }
    Ok(line)
}
