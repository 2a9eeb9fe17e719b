//! Tunnel configuration

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Parameters of one SSH forwarding session
///
/// `local_port` is shared with the inference client: whatever listens on
/// `127.0.0.1:local_port` is assumed to be the forwarded endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// SSH server that hosts the inference endpoint
    pub remote_host: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Port of the inference endpoint on the remote host
    pub remote_port: u16,
    pub local_port: u16,
    pub ssh_username: String,
    /// Private key used for public key authentication
    pub key_file: PathBuf,
    /// SSH client binary
    #[serde(default = "default_ssh_program")]
    pub ssh_program: PathBuf,
    /// How long to wait for the forwarded port to accept connections
    #[serde(with = "duration_secs", default = "default_ready_timeout")]
    pub ready_timeout: Duration,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_program() -> PathBuf {
    PathBuf::from("ssh")
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Helper module for serializing Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl TunnelConfig {
    pub fn builder() -> TunnelConfigBuilder {
        TunnelConfigBuilder::default()
    }

    /// Builder seeded with this configuration, for applying overrides
    pub fn to_builder(&self) -> TunnelConfigBuilder {
        TunnelConfigBuilder {
            remote_host: Some(self.remote_host.clone()),
            ssh_port: Some(self.ssh_port),
            remote_port: Some(self.remote_port),
            local_port: Some(self.local_port),
            ssh_username: Some(self.ssh_username.clone()),
            key_file: Some(self.key_file.clone()),
            ssh_program: Some(self.ssh_program.clone()),
            ready_timeout: Some(self.ready_timeout),
        }
    }

    /// Address the forwarded endpoint is reachable on while the tunnel is up
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.local_port))
    }

    /// `user@host` destination string
    pub fn destination(&self) -> String {
        format!("{}@{}", self.ssh_username, self.remote_host)
    }

    /// Arguments passed to the SSH client
    pub fn ssh_args(&self) -> Vec<String> {
        vec![
            "-N".to_string(),
            "-L".to_string(),
            format!("127.0.0.1:{}:127.0.0.1:{}", self.local_port, self.remote_port),
            "-i".to_string(),
            self.key_file.display().to_string(),
            "-p".to_string(),
            self.ssh_port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            self.destination(),
        ]
    }
}

/// Builder for TunnelConfig
#[derive(Default)]
pub struct TunnelConfigBuilder {
    remote_host: Option<String>,
    ssh_port: Option<u16>,
    remote_port: Option<u16>,
    local_port: Option<u16>,
    ssh_username: Option<String>,
    key_file: Option<PathBuf>,
    ssh_program: Option<PathBuf>,
    ready_timeout: Option<Duration>,
}

impl TunnelConfigBuilder {
    pub fn remote_host(mut self, host: impl Into<String>) -> Self {
        self.remote_host = Some(host.into());
        self
    }

    pub fn ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = Some(port);
        self
    }

    pub fn remote_port(mut self, port: u16) -> Self {
        self.remote_port = Some(port);
        self
    }

    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    pub fn ssh_username(mut self, user: impl Into<String>) -> Self {
        self.ssh_username = Some(user.into());
        self
    }

    pub fn key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_file = Some(path.into());
        self
    }

    pub fn ssh_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.ssh_program = Some(program.into());
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<TunnelConfig, String> {
        let remote_host = self
            .remote_host
            .filter(|h| !h.is_empty())
            .ok_or("remote_host is required")?;
        let remote_port = self.remote_port.ok_or("remote_port is required")?;
        let local_port = self.local_port.ok_or("local_port is required")?;
        let ssh_username = self
            .ssh_username
            .filter(|u| !u.is_empty())
            .ok_or("ssh_username is required")?;
        let key_file = self.key_file.ok_or("key_file is required")?;

        if remote_port == 0 || local_port == 0 {
            return Err("ports must be non-zero".to_string());
        }

        Ok(TunnelConfig {
            remote_host,
            ssh_port: self.ssh_port.unwrap_or_else(default_ssh_port),
            remote_port,
            local_port,
            ssh_username,
            key_file,
            ssh_program: self.ssh_program.unwrap_or_else(default_ssh_program),
            ready_timeout: self.ready_timeout.unwrap_or_else(default_ready_timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TunnelConfig {
        TunnelConfig::builder()
            .remote_host("10.0.0.5")
            .remote_port(11434)
            .local_port(12345)
            .ssh_username("imagination")
            .key_file("/home/me/.ssh/id_ed25519")
            .build()
            .unwrap()
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = sample();
        assert_eq!(config.ssh_port, 22);
        assert_eq!(config.ssh_program, PathBuf::from("ssh"));
        assert_eq!(config.ready_timeout, Duration::from_secs(10));
        assert_eq!(config.local_addr(), "127.0.0.1:12345".parse().unwrap());
        assert_eq!(config.destination(), "imagination@10.0.0.5");
    }

    #[test]
    fn test_config_builder_requires_fields() {
        assert!(TunnelConfig::builder().build().is_err());
        assert!(TunnelConfig::builder()
            .remote_host("h")
            .remote_port(1)
            .local_port(0)
            .ssh_username("u")
            .key_file("k")
            .build()
            .is_err());
    }

    #[test]
    fn test_config_from_yaml_uses_defaults() {
        let yaml = r#"
remote_host: imagination.example.com
remote_port: 11434
local_port: 12345
ssh_username: imagination
key_file: /keys/id_ed25519
ready_timeout: 3
"#;
        let config: TunnelConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ssh_port, 22);
        assert_eq!(config.ready_timeout, Duration::from_secs(3));
        assert_eq!(config.key_file, PathBuf::from("/keys/id_ed25519"));
    }

    #[test]
    fn test_ssh_args() {
        let args = sample().ssh_args();
        assert_eq!(args[0], "-N");
        assert_eq!(args[1], "-L");
        assert_eq!(args[2], "127.0.0.1:12345:127.0.0.1:11434");
        assert!(args.contains(&"ExitOnForwardFailure=yes".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args.last().unwrap(), "imagination@10.0.0.5");
    }
}
