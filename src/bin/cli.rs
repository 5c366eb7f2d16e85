use std::path::PathBuf;

use clap::Parser;
use hydra_relay::constants::DEFAULT_IPC_SOCKET;
use hydra_relay::relay::{Options, run};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Opt {
    /// Route identifier announced on the control channel
    route_id: String,

    /// Unix socket the telemetry records are written to
    #[clap(long, default_value = DEFAULT_IPC_SOCKET)]
    ipc_socket: PathBuf,

    /// Pipeline configuration file (one JSON document); read from stdin when omitted
    #[clap(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let opt = Opt::parse();

    run(Options {
        route_id: opt.route_id,
        ipc_socket: opt.ipc_socket,
        config: opt.config,
    })
    .await
}
