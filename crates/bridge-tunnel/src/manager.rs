//! Tunnel lifecycle management

use crate::config::TunnelConfig;
use std::net::SocketAddr;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Interval between readiness probes of the forwarded port
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on stderr kept for error classification
const MAX_STDERR_BYTES: usize = 4096;

/// Tunnel lifecycle errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("SSH authentication failed for {destination}: {reason}")]
    Auth { destination: String, reason: String },

    #[error("Failed to establish tunnel to {remote}: {reason}")]
    Connect { remote: String, reason: String },

    #[error("Local port {port} is already in use\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Stop the other tunnel or choose a different LOCAL_PORT")]
    PortInUse { port: u16 },

    #[error("Failed to launch SSH client '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("A tunnel is already active on 127.0.0.1:{port}")]
    AlreadyActive { port: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One live forwarding session
///
/// The SSH child is killed when the handle is dropped, so the forwarding
/// path never outlives its owner.
pub struct TunnelHandle {
    child: Option<Child>,
    stderr_task: Option<JoinHandle<String>>,
    local_addr: SocketAddr,
    remote: String,
    started_at: Instant,
}

impl TunnelHandle {
    /// Local address that forwards to the remote endpoint
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote `host:port` the tunnel forwards to
    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether the SSH process is still running
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Terminate the session. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                warn!(
                    remote = %self.remote,
                    status = %status,
                    "SSH tunnel process had already exited"
                );
            }
            _ => {
                if let Err(e) = child.kill().await {
                    error!(remote = %self.remote, "Failed to kill SSH tunnel process: {}", e);
                }
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        info!(
            remote = %self.remote,
            local_addr = %self.local_addr,
            uptime_secs = self.started_at.elapsed().as_secs(),
            "Tunnel stopped"
        );
    }
}

/// Opens and tears down the SSH tunnel described by a [`TunnelConfig`]
///
/// Holds at most one live [`TunnelHandle`]. Failed starts are not retried;
/// the caller decides what to do next.
pub struct TunnelManager {
    config: TunnelConfig,
    handle: Option<TunnelHandle>,
}

impl TunnelManager {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            handle: None,
        }
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.config.local_addr()
    }

    pub fn handle(&self) -> Option<&TunnelHandle> {
        self.handle.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Start the tunnel and wait until the local port is forwarding
    pub async fn start(&mut self) -> Result<&TunnelHandle, TunnelError> {
        if self.handle.is_some() {
            return Err(TunnelError::AlreadyActive {
                port: self.config.local_port,
            });
        }

        let remote = format!("{}:{}", self.config.remote_host, self.config.remote_port);
        info!(
            remote = %remote,
            local_port = self.config.local_port,
            user = %self.config.ssh_username,
            "Starting SSH tunnel"
        );

        check_key_file(&self.config).await?;
        check_port_free(self.config.local_port).await?;

        let mut child = Command::new(&self.config.ssh_program)
            .args(self.config.ssh_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TunnelError::Spawn {
                program: self.config.ssh_program.display().to_string(),
                source: e,
            })?;

        debug!(pid = ?child.id(), "SSH client spawned");

        let stderr_task = child.stderr.take().map(collect_stderr);
        let mut handle = TunnelHandle {
            child: Some(child),
            stderr_task,
            local_addr: self.config.local_addr(),
            remote,
            started_at: Instant::now(),
        };

        if let Err(e) = self.wait_ready(&mut handle).await {
            handle.stop().await;
            return Err(e);
        }

        info!(
            local_addr = %handle.local_addr,
            remote = %handle.remote,
            elapsed_ms = handle.started_at.elapsed().as_millis() as u64,
            "Tunnel active"
        );

        Ok(&*self.handle.insert(handle))
    }

    /// Stop the tunnel if one is running
    pub async fn stop(&mut self) {
        match self.handle.take() {
            Some(mut handle) => handle.stop().await,
            None => debug!("Tunnel stop requested but no tunnel is active"),
        }
    }

    async fn wait_ready(&self, handle: &mut TunnelHandle) -> Result<(), TunnelError> {
        let deadline = Instant::now() + self.config.ready_timeout;

        loop {
            let exited = match handle.child.as_mut() {
                Some(child) => child.try_wait()?,
                None => None,
            };

            if let Some(status) = exited {
                let stderr = match handle.stderr_task.take() {
                    Some(task) => tokio::time::timeout(Duration::from_secs(1), task)
                        .await
                        .ok()
                        .and_then(|r| r.ok())
                        .unwrap_or_default(),
                    None => String::new(),
                };
                return Err(classify_exit(&self.config, status, &stderr));
            }

            if TcpStream::connect(handle.local_addr).await.is_ok() {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(TunnelError::Connect {
                    remote: handle.remote.clone(),
                    reason: format!(
                        "forwarded port {} not ready after {:?}",
                        handle.local_addr.port(),
                        self.config.ready_timeout
                    ),
                });
            }

            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

async fn check_key_file(config: &TunnelConfig) -> Result<(), TunnelError> {
    let auth_error = |reason: String| TunnelError::Auth {
        destination: config.destination(),
        reason,
    };

    let metadata = tokio::fs::metadata(&config.key_file).await.map_err(|e| {
        auth_error(format!(
            "key file {} is not accessible: {}",
            config.key_file.display(),
            e
        ))
    })?;

    if !metadata.is_file() {
        return Err(auth_error(format!(
            "key file {} is not a regular file",
            config.key_file.display()
        )));
    }

    tokio::fs::File::open(&config.key_file).await.map_err(|e| {
        auth_error(format!(
            "key file {} is not readable: {}",
            config.key_file.display(),
            e
        ))
    })?;

    Ok(())
}

async fn check_port_free(port: u16) -> Result<(), TunnelError> {
    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            Err(TunnelError::PortInUse { port })
        }
        Err(e) => Err(TunnelError::Io(e)),
    }
}

/// Forward SSH diagnostics to the log and keep the head for classification
fn collect_stderr(stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut collected = String::new();

        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "bridge_tunnel::ssh", "{}", line);
            if collected.len() + line.len() < MAX_STDERR_BYTES {
                collected.push_str(&line);
                collected.push('\n');
            }
        }

        collected
    })
}

/// Map an early SSH exit to a tunnel error
fn classify_exit(config: &TunnelConfig, status: ExitStatus, stderr: &str) -> TunnelError {
    let detail = stderr.trim();
    let reason = if detail.is_empty() {
        format!("ssh exited with {}", status)
    } else {
        format!("ssh exited with {}: {}", status, detail)
    };

    let lower = detail.to_ascii_lowercase();
    if lower.contains("permission denied")
        || lower.contains("publickey")
        || lower.contains("authentication fail")
        || lower.contains("load key")
    {
        return TunnelError::Auth {
            destination: config.destination(),
            reason,
        };
    }

    if lower.contains("address already in use") || lower.contains("cannot listen to port") {
        return TunnelError::PortInUse {
            port: config.local_port,
        };
    }

    TunnelError::Connect {
        remote: format!("{}:{}", config.remote_host, config.remote_port),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TunnelConfig {
        TunnelConfig::builder()
            .remote_host("imagination.example.com")
            .remote_port(11434)
            .local_port(12345)
            .ssh_username("imagination")
            .key_file("/nonexistent/key")
            .build()
            .unwrap()
    }

    #[cfg(unix)]
    fn status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_auth_failure() {
        let err = classify_exit(
            &config(),
            status(255),
            "imagination@imagination.example.com: Permission denied (publickey).\n",
        );
        assert!(matches!(err, TunnelError::Auth { .. }));
        assert!(err.to_string().contains("imagination@imagination.example.com"));
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_port_in_use() {
        let err = classify_exit(
            &config(),
            status(255),
            "bind [127.0.0.1]:12345: Address already in use\nchannel_setup_fwd_listener_tcpip: cannot listen to port: 12345\n",
        );
        assert!(matches!(err, TunnelError::PortInUse { port: 12345 }));
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_unreachable_host() {
        let err = classify_exit(
            &config(),
            status(255),
            "ssh: connect to host imagination.example.com port 22: Connection refused",
        );
        match err {
            TunnelError::Connect { remote, reason } => {
                assert_eq!(remote, "imagination.example.com:11434");
                assert!(reason.contains("Connection refused"));
            }
            other => panic!("Expected Connect error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_silent_exit() {
        let err = classify_exit(&config(), status(1), "");
        assert!(matches!(err, TunnelError::Connect { .. }));
        assert!(err.to_string().contains("ssh exited with"));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut manager = TunnelManager::new(config());
        manager.stop().await;
        manager.stop().await;
        assert!(!manager.is_active());
    }

    #[tokio::test]
    async fn test_missing_key_is_auth_error() {
        let mut manager = TunnelManager::new(config());
        let err = manager.start().await.err().unwrap();
        assert!(matches!(err, TunnelError::Auth { .. }));
        assert!(err.to_string().contains("/nonexistent/key"));
        assert!(!manager.is_active());
    }
}
