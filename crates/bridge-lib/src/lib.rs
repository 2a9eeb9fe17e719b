//! Imagination Bridge library
//!
//! Ties the bridge crates together: configuration, and the orchestrator that
//! runs the tunnel around the event server or a one-shot dialogue request.
//!
//! ```ignore
//! use bridge_lib::{BridgeConfig, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = BridgeConfig::load("bridge.yml".as_ref())?;
//! let mut orchestrator = Orchestrator::new(config);
//! orchestrator.serve(CancellationToken::new()).await?;
//! ```

pub mod config;
pub mod orchestrator;

pub use config::{
    BridgeConfig, ConfigError, HandlerSettings, InferenceSettings, MessengerSettings,
    TunnelOverrides,
};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorState};

// Re-export the component crates
pub use bridge_inference::{InferenceClient, InferenceConfig, InferenceError};
pub use bridge_messenger::{OutboundMessenger, DIALOGUE_ADDRESS};
pub use bridge_proto::Framing;
pub use bridge_server::{EventServer, ServerConfig};
pub use bridge_tunnel::{TunnelConfig, TunnelError};
