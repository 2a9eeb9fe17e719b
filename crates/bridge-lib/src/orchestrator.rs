//! Process supervisor
//!
//! Owns the tunnel for the lifetime of one serving (or one-shot) phase and
//! guarantees that every successful tunnel start is followed by exactly one
//! stop, whatever the phase returned.

use crate::config::{BridgeConfig, ConfigError};
use bridge_inference::{InferenceClient, InferenceError};
use bridge_messenger::{MessengerError, OutboundMessenger};
use bridge_proto::EventKind;
use bridge_server::{
    DialogueHandler, DispatchTable, EventServer, ServerError, ThoughtHandler,
};
use bridge_tunnel::{TunnelError, TunnelManager};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Messenger(#[from] MessengerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Lifecycle of one orchestrated run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    TunnelStarting,
    TunnelActive,
    Serving,
    TunnelStopping,
    Terminated,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::TunnelStarting => "tunnel_starting",
            OrchestratorState::TunnelActive => "tunnel_active",
            OrchestratorState::Serving => "serving",
            OrchestratorState::TunnelStopping => "tunnel_stopping",
            OrchestratorState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Runs the bridge: tunnel up, serve or speak, tunnel down
pub struct Orchestrator {
    config: BridgeConfig,
    tunnel: Option<TunnelManager>,
    state: watch::Sender<OrchestratorState>,
    listening: watch::Sender<Option<SocketAddr>>,
    transitions: Vec<OrchestratorState>,
}

impl Orchestrator {
    pub fn new(config: BridgeConfig) -> Self {
        let tunnel = config.tunnel.clone().map(TunnelManager::new);
        let (state, _) = watch::channel(OrchestratorState::Idle);
        let (listening, _) = watch::channel(None);

        Self {
            config,
            tunnel,
            state,
            listening,
            transitions: vec![OrchestratorState::Idle],
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    /// Every state entered so far, in order
    pub fn transitions(&self) -> &[OrchestratorState] {
        &self.transitions
    }

    /// Follow state changes from another task
    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    /// Address of the event server once it is listening
    pub fn listening(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.listening.subscribe()
    }

    fn transition(&mut self, next: OrchestratorState) {
        let previous = self.state();
        if previous == next {
            return;
        }
        debug!(from = %previous, to = %next, "Orchestrator state change");
        self.transitions.push(next);
        self.state.send_replace(next);
    }

    /// Run the event server until `shutdown` is cancelled
    pub async fn serve(&mut self, shutdown: CancellationToken) -> Result<(), OrchestratorError> {
        self.start_tunnel().await?;
        self.transition(OrchestratorState::Serving);

        let outcome = self.run_server(shutdown).await;
        if let Err(e) = &outcome {
            error!("Serving failed: {}", e);
        }

        self.listening.send_replace(None);
        self.stop_tunnel().await;
        outcome
    }

    /// One-shot: generate a line for `prompt` and push it to the simulation
    ///
    /// Returns the generated text. The send is skipped when the messenger is
    /// disabled.
    pub async fn speak(&mut self, prompt: &str) -> Result<String, OrchestratorError> {
        self.start_tunnel().await?;
        self.transition(OrchestratorState::Serving);

        let outcome = self.run_speak(prompt).await;
        if let Err(e) = &outcome {
            error!("Dialogue request failed: {}", e);
        }

        self.stop_tunnel().await;
        outcome
    }

    /// Verify the inference endpoint is reachable; returns installed models
    pub async fn check(&mut self) -> Result<Vec<String>, OrchestratorError> {
        self.start_tunnel().await?;
        self.transition(OrchestratorState::Serving);

        let outcome = self.run_check().await;

        self.stop_tunnel().await;
        outcome
    }

    /// Tear down after an interrupted phase
    ///
    /// No-op when nothing was started or the run already terminated.
    pub async fn release(&mut self) {
        match self.state() {
            OrchestratorState::Idle | OrchestratorState::Terminated => {}
            state => {
                warn!(state = %state, "Releasing interrupted run");
                self.listening.send_replace(None);
                self.stop_tunnel().await;
            }
        }
    }

    /// Build the handler table from configuration
    pub fn dispatch_table(&self) -> Result<DispatchTable, OrchestratorError> {
        let settings = &self.config.handlers;
        let mut table = DispatchTable::new();
        table.register(
            EventKind::StateChange,
            Arc::new(ThoughtHandler::new(settings.thoughts.clone())),
        );

        if settings.dialogue {
            match self.config.inference_config() {
                Ok(inference) => {
                    let client = InferenceClient::new(inference)?;
                    table.register(
                        EventKind::Dialogue,
                        Arc::new(
                            DialogueHandler::new(client, settings.max_history)
                                .with_max_agents(settings.max_agents),
                        ),
                    );
                }
                Err(ConfigError::Missing(what)) => {
                    warn!("Dialogue events disabled: no {}", what);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(table)
    }

    async fn start_tunnel(&mut self) -> Result<(), OrchestratorError> {
        let Some(manager) = self.tunnel.as_mut() else {
            debug!("Direct mode, no tunnel to start");
            return Ok(());
        };

        self.state.send_replace(OrchestratorState::TunnelStarting);
        self.transitions.push(OrchestratorState::TunnelStarting);
        info!(remote = %manager.config().destination(), "Starting tunnel");

        let started = match manager.start().await {
            Ok(handle) => {
                info!(
                    local = %handle.local_addr(),
                    remote = %handle.remote(),
                    pid = ?handle.pid(),
                    "Tunnel active"
                );
                Ok(())
            }
            Err(e) => Err(e),
        };

        match started {
            Ok(()) => {
                self.transition(OrchestratorState::TunnelActive);
                Ok(())
            }
            Err(e) => {
                error!("Tunnel failed to start: {}", e);
                self.transition(OrchestratorState::Terminated);
                Err(e.into())
            }
        }
    }

    async fn stop_tunnel(&mut self) {
        if let Some(manager) = self.tunnel.as_mut() {
            self.state.send_replace(OrchestratorState::TunnelStopping);
            self.transitions.push(OrchestratorState::TunnelStopping);
            manager.stop().await;
        }
        self.transition(OrchestratorState::Terminated);
    }

    async fn run_server(&self, shutdown: CancellationToken) -> Result<(), OrchestratorError> {
        let table = Arc::new(self.dispatch_table()?);
        let server = EventServer::bind(self.config.server.clone(), table).await?;
        self.listening.send_replace(Some(server.local_addr()));

        server.serve(shutdown).await?;
        Ok(())
    }

    async fn run_check(&self) -> Result<Vec<String>, OrchestratorError> {
        let client = InferenceClient::new(self.config.inference_config()?)?;
        info!(endpoint = %client.endpoint(), "Checking inference endpoint");
        Ok(client.list_models().await?)
    }

    async fn run_speak(&self, prompt: &str) -> Result<String, OrchestratorError> {
        let client = InferenceClient::new(self.config.inference_config()?)?;
        let dialogue = client.complete(prompt, None).await?;
        info!(chars = dialogue.len(), "Generated dialogue: {}", dialogue);

        let settings = &self.config.messenger;
        if settings.enabled {
            let messenger = OutboundMessenger::connect(settings.target).await?;
            messenger.send(&settings.address, &dialogue).await?;
            info!(
                target_addr = %settings.target,
                address = %settings.address,
                "Sent dialogue"
            );
        } else {
            debug!("Messenger disabled, not sending dialogue");
        }

        Ok(dialogue)
    }
}
