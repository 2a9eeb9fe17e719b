//! Bridge configuration
//!
//! Built once at startup from an optional YAML file plus command-line/env
//! overrides, validated, then handed to the [`Orchestrator`](crate::Orchestrator).
//! Nothing downstream reads the environment.

use bridge_inference::InferenceConfig;
use bridge_messenger::{DEFAULT_OSC_PORT, DIALOGUE_ADDRESS};
use bridge_server::{ServerConfig, DEFAULT_MAX_AGENTS};
use bridge_tunnel::TunnelConfig;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing configuration: {0}")]
    Missing(&'static str),
}

/// Inference settings; the endpoint is resolved against the tunnel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceSettings {
    /// Explicit endpoint, only valid without a tunnel
    pub base_url: Option<String>,
    pub model: String,
    pub system_prompt: Option<String>,
    pub timeout_secs: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            model: bridge_inference::config::DEFAULT_MODEL.to_string(),
            system_prompt: None,
            timeout_secs: 120,
        }
    }
}

/// Where generated dialogue is pushed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MessengerSettings {
    pub target: SocketAddr,
    pub address: String,
    /// When false, generated lines are only returned and logged
    pub enabled: bool,
}

impl Default for MessengerSettings {
    fn default() -> Self {
        Self {
            target: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_OSC_PORT)),
            address: DIALOGUE_ADDRESS.to_string(),
            enabled: true,
        }
    }
}

/// Event handler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandlerSettings {
    /// Replacement thought list for `state_change`; empty keeps the defaults
    pub thoughts: Vec<String>,
    /// Register the inference-backed `dialogue` handler
    pub dialogue: bool,
    /// Turns of per-agent memory kept by the dialogue handler
    pub max_history: usize,
    /// Agents whose history the dialogue handler keeps at once
    pub max_agents: usize,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            thoughts: Vec::new(),
            dialogue: true,
            max_history: 16,
            max_agents: DEFAULT_MAX_AGENTS,
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// SSH forwarding to the inference host; `None` is direct mode
    pub tunnel: Option<TunnelConfig>,
    pub inference: InferenceSettings,
    pub server: ServerConfig,
    pub messenger: MessengerSettings,
    pub handlers: HandlerSettings,
}

/// Tunnel fields supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct TunnelOverrides {
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
    pub local_port: Option<u16>,
    pub ssh_username: Option<String>,
    pub key_file: Option<PathBuf>,
    pub ssh_port: Option<u16>,
}

impl TunnelOverrides {
    pub fn is_empty(&self) -> bool {
        self.remote_host.is_none()
            && self.remote_port.is_none()
            && self.local_port.is_none()
            && self.ssh_username.is_none()
            && self.key_file.is_none()
            && self.ssh_port.is_none()
    }

    /// Layer these values over `base`
    ///
    /// With nothing set, `base` is returned unchanged. Otherwise the result
    /// must be a complete tunnel configuration.
    pub fn apply(self, base: Option<TunnelConfig>) -> Result<Option<TunnelConfig>, ConfigError> {
        if self.is_empty() {
            return Ok(base);
        }

        let mut builder = base
            .as_ref()
            .map(TunnelConfig::to_builder)
            .unwrap_or_else(TunnelConfig::builder);

        if let Some(host) = self.remote_host {
            builder = builder.remote_host(host);
        }
        if let Some(port) = self.remote_port {
            builder = builder.remote_port(port);
        }
        if let Some(port) = self.local_port {
            builder = builder.local_port(port);
        }
        if let Some(user) = self.ssh_username {
            builder = builder.ssh_username(user);
        }
        if let Some(key) = self.key_file {
            builder = builder.key_file(key);
        }
        if let Some(port) = self.ssh_port {
            builder = builder.ssh_port(port);
        }

        builder
            .build()
            .map(Some)
            .map_err(|e| ConfigError::Invalid(format!("tunnel: {}", e)))
    }
}

impl BridgeConfig {
    /// Load and validate a YAML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: BridgeConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(tunnel) = &self.tunnel {
            if self.inference.base_url.is_some() {
                return Err(ConfigError::Invalid(
                    "inference.base_url cannot be combined with a tunnel; the endpoint is the tunnel's local port"
                        .to_string(),
                ));
            }
            if tunnel.remote_port == 0 || tunnel.local_port == 0 {
                return Err(ConfigError::Invalid(
                    "tunnel ports must be non-zero".to_string(),
                ));
            }
            if self.server.bind_addr.port() == tunnel.local_port {
                return Err(ConfigError::Invalid(format!(
                    "event server and tunnel both want port {}",
                    tunnel.local_port
                )));
            }
        }

        if let Some(url) = &self.inference.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "inference.base_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }

        if self.inference.model.trim().is_empty() {
            return Err(ConfigError::Invalid("inference.model is empty".to_string()));
        }
        if self.inference.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "inference.timeout_secs must be positive".to_string(),
            ));
        }

        if !self.messenger.address.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "messenger.address must start with '/', got '{}'",
                self.messenger.address
            )));
        }

        if self.server.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "server.max_message_size must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether inference traffic goes through a tunnel
    pub fn is_tunneled(&self) -> bool {
        self.tunnel.is_some()
    }

    /// Resolve the inference client configuration
    ///
    /// Tunneled: the tunnel's local port. Direct: the explicit `base_url`.
    pub fn inference_config(&self) -> Result<InferenceConfig, ConfigError> {
        let mut config = match (&self.tunnel, &self.inference.base_url) {
            (Some(tunnel), _) => InferenceConfig::local(tunnel.local_port),
            (None, Some(url)) => InferenceConfig {
                base_url: url.trim_end_matches('/').to_string(),
                ..InferenceConfig::local(0)
            },
            (None, None) => {
                return Err(ConfigError::Missing(
                    "inference endpoint (configure a tunnel or inference.base_url)",
                ))
            }
        };

        config = config
            .with_model(self.inference.model.clone())
            .with_timeout(Duration::from_secs(self.inference.timeout_secs));
        if let Some(prompt) = &self.inference.system_prompt {
            config = config.with_system_prompt(prompt.clone());
        }

        Ok(config)
    }
}
