//! SSH port-forwarding tunnel
//!
//! Makes a remote inference host reachable on a local port by running an
//! `ssh -N -L` session as a supervised child process.

pub mod config;
pub mod manager;

pub use config::{TunnelConfig, TunnelConfigBuilder};
pub use manager::{TunnelError, TunnelHandle, TunnelManager};
