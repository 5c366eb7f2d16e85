//! Relay configuration: one source and any number of sinks, decoded from a
//! single JSON document handed over on startup.
//!
//! Adapter objects carry their transport properties under a `type` tag, e.g.
//!
//! ```json
//! {
//!     "source": { "type": "srtsrc", "mode": "listener", "localport": 8000 },
//!     "sinks": [
//!         { "type": "srtsink", "mode": "listener", "localport": 8002 },
//!         { "type": "udpsink", "address": "127.0.0.1", "port": 8003 }
//!     ]
//! }
//! ```

use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SourceConfig {
    #[serde(rename = "srtsrc")]
    Srt(SrtConfig),
    #[serde(rename = "udpsrc")]
    Udp(UdpSourceConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SinkConfig {
    #[serde(rename = "srtsink")]
    Srt(SrtConfig),
    #[serde(rename = "udpsink")]
    Udp(UdpSinkConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SrtMode {
    Listener,
    Caller,
    Rendezvous,
}

/// One SRT endpoint, source or sink. Listener mode binds
/// `localaddress:localport`; caller mode dials `address:port`.
#[derive(Debug, Clone, Deserialize)]
pub struct SrtConfig {
    pub mode: SrtMode,
    #[serde(rename = "localaddress")]
    pub local_address: Option<String>,
    #[serde(rename = "localport")]
    pub local_port: Option<u16>,
    pub address: Option<String>,
    pub port: Option<u16>,
    /// Receive latency in milliseconds; the transport default applies when
    /// unset.
    #[serde(rename = "latency")]
    pub latency_ms: Option<u32>,
    #[serde(rename = "streamid")]
    pub stream_id: Option<String>,
    #[serde(rename = "auto-reconnect", default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(rename = "keep-listening", default = "default_true")]
    pub keep_listening: bool,
}

impl SrtConfig {
    /// Local bind endpoint for listener mode.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let port = self.local_port.context("listener mode needs a localport")?;
        let host = self.local_address.as_deref().unwrap_or("0.0.0.0");
        format!("{host}:{port}")
            .parse()
            .with_context(|| format!("invalid local address {host}:{port}"))
    }

    /// Remote endpoint for caller mode, formatted for the connector.
    pub fn call_addr(&self) -> Result<String> {
        let address = self.address.as_deref().context("caller mode needs an address")?;
        let port = self.port.context("caller mode needs a port")?;
        Ok(format!("{address}:{port}"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UdpSourceConfig {
    /// Bind address; a multicast group is joined automatically.
    #[serde(default = "default_any_address")]
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UdpSinkConfig {
    pub address: String,
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_any_address() -> String {
    "0.0.0.0".to_string()
}

impl RelayConfig {
    /// Decodes and validates the configuration document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: RelayConfig =
            serde_json::from_str(text).context("invalid relay configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let SourceConfig::Srt(srt) = &self.source {
            validate_srt(srt, "source")?;
        }
        for (index, sink) in self.sinks.iter().enumerate() {
            if let SinkConfig::Srt(srt) = sink {
                validate_srt(srt, &format!("sink {index}"))?;
            }
        }
        Ok(())
    }
}

fn validate_srt(config: &SrtConfig, what: &str) -> Result<()> {
    match config.mode {
        SrtMode::Listener => {
            if config.local_port.is_none() {
                bail!("{what}: listener mode needs a localport");
            }
        }
        SrtMode::Caller => {
            if config.address.is_none() || config.port.is_none() {
                bail!("{what}: caller mode needs an address and port");
            }
        }
        SrtMode::Rendezvous => bail!("{what}: rendezvous mode is not supported"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_full_document() {
        let text = r#"{
            "source": {
                "type": "srtsrc",
                "localaddress": "127.0.0.1",
                "localport": 8000,
                "auto-reconnect": true,
                "keep-listening": false,
                "mode": "listener"
            },
            "sinks": [
                {
                    "type": "srtsink",
                    "localaddress": "127.0.0.1",
                    "localport": 8002,
                    "mode": "listener"
                },
                {
                    "type": "udpsink",
                    "address": "127.0.0.1",
                    "port": 8003
                }
            ]
        }"#;

        let config = RelayConfig::from_json(text).unwrap();
        let SourceConfig::Srt(src) = &config.source else {
            panic!("expected an SRT source");
        };
        assert_eq!(src.mode, SrtMode::Listener);
        assert_eq!(src.listen_addr().unwrap().to_string(), "127.0.0.1:8000");
        assert!(src.auto_reconnect);
        assert!(!src.keep_listening);

        assert_eq!(config.sinks.len(), 2);
        let SinkConfig::Udp(udp) = &config.sinks[1] else {
            panic!("expected a UDP sink");
        };
        assert_eq!(udp.address, "127.0.0.1");
        assert_eq!(udp.port, 8003);
    }

    #[test]
    fn caller_fields_and_defaults() {
        let text = r#"{
            "source": {
                "type": "srtsrc",
                "mode": "caller",
                "address": "example.net",
                "port": 9000,
                "latency": 250,
                "streamid": "publish/live"
            },
            "sinks": []
        }"#;

        let config = RelayConfig::from_json(text).unwrap();
        let SourceConfig::Srt(src) = &config.source else {
            panic!("expected an SRT source");
        };
        assert_eq!(src.call_addr().unwrap(), "example.net:9000");
        assert_eq!(src.latency_ms, Some(250));
        assert_eq!(src.stream_id.as_deref(), Some("publish/live"));
        assert!(src.auto_reconnect);
        assert!(src.keep_listening);
    }

    #[test]
    fn listener_without_localport_is_rejected() {
        let text = r#"{
            "source": { "type": "srtsrc", "mode": "listener" },
            "sinks": []
        }"#;
        assert!(RelayConfig::from_json(text).is_err());
    }

    #[test]
    fn caller_without_remote_is_rejected() {
        let text = r#"{
            "source": { "type": "srtsrc", "mode": "caller", "port": 9000 },
            "sinks": []
        }"#;
        assert!(RelayConfig::from_json(text).is_err());
    }

    #[test]
    fn rendezvous_is_rejected() {
        let text = r#"{
            "source": { "type": "srtsrc", "mode": "rendezvous", "localport": 8000 },
            "sinks": []
        }"#;
        assert!(RelayConfig::from_json(text).is_err());
    }

    #[test]
    fn udp_source_defaults_to_any_address() {
        let text = r#"{
            "source": { "type": "udpsrc", "port": 5000 },
            "sinks": []
        }"#;
        let config = RelayConfig::from_json(text).unwrap();
        let SourceConfig::Udp(udp) = &config.source else {
            panic!("expected a UDP source");
        };
        assert_eq!(udp.address, "0.0.0.0");
        assert_eq!(udp.port, 5000);
    }

    #[test]
    fn unknown_adapter_type_is_rejected() {
        let text = r#"{
            "source": { "type": "filesrc", "location": "/tmp/x.ts" },
            "sinks": []
        }"#;
        assert!(RelayConfig::from_json(text).is_err());
    }
}
