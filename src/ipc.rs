//! Control-plane channel: a Unix stream socket carrying newline-framed
//! telemetry records and `key:value` notices. The consumer never talks back;
//! this side only writes.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::warn;

/// Write half of the telemetry channel. Connecting happens once at startup;
/// a connection that breaks later is kept and retried as-is, degrading
/// telemetry without touching the media path.
pub struct IpcChannel {
    stream: Mutex<UnixStream>,
}

impl IpcChannel {
    /// Connects to the consumer's socket. Failure here is fatal to startup.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("cannot reach control socket {}", path.display()))?;
        Ok(Self {
            stream: Mutex::new(stream),
        })
    }

    /// Writes one pre-framed message. Errors are logged and swallowed.
    pub async fn send(&self, message: &str) {
        let mut stream = self.stream.lock().await;
        if let Err(e) = stream.write_all(message.as_bytes()).await {
            warn!(error = %e, "control socket write failed");
        }
    }
}
