use crate::{Connection, ConnectionOptions, Login, Trace, TracingSink};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use stomp_proto::DEFAULT_MAX_FRAME_SIZE;
use tokio::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub credentials: CredentialSettings,
    #[serde(default)]
    pub protocol: ProtocolSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Virtual host sent in CONNECT; defaults to `host`
    #[serde(default)]
    pub vhost: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CredentialSettings {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolSettings {
    #[serde(default = "default_accept_versions")]
    pub accept_versions: Vec<String>,
    #[serde(default = "default_max_frame")]
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output logs as JSON
    #[serde(default)]
    pub json_logs: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    61613
}

fn default_accept_versions() -> Vec<String> {
    crate::DEFAULT_ACCEPT_VERSIONS.iter().map(|v| v.to_string()).collect()
}

fn default_max_frame() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_receive_timeout() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            vhost: None,
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            accept_versions: default_accept_versions(),
            max_frame_bytes: default_max_frame(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            receive_timeout_ms: default_receive_timeout(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: ClientConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self::default()
    }

    pub fn login(&self) -> Login {
        let login = Login::new(&self.credentials.user, &self.credentials.pass)
            .with_versions(&self.protocol.accept_versions);

        match &self.broker.vhost {
            Some(vhost) => login.with_host(vhost),
            None => login,
        }
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.receive_timeout_ms)
    }

    /// Wire tracing is enabled only at `trace` level
    pub fn connection_options(&self) -> ConnectionOptions {
        let trace = self
            .logging
            .log_level
            .eq_ignore_ascii_case("trace")
            .then(|| Arc::new(TracingSink) as Arc<dyn Trace>);

        ConnectionOptions {
            max_frame_size: self.protocol.max_frame_bytes,
            connect_timeout: Duration::from_secs(self.timeouts.connect_timeout_secs),
            trace,
        }
    }

    pub fn connection(&self) -> Connection {
        Connection::with_options(&self.broker.host, self.broker.port, self.connection_options())
    }
}
