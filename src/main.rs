//! Imagination Bridge CLI
//!
//! Connects a running simulation to a remote language model: serves the local
//! event socket, or generates one line of dialogue and pushes it over OSC.

use anyhow::{Context, Result};
use bridge_lib::{BridgeConfig, Framing, Orchestrator, TunnelOverrides};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// Prompt used by `speak` when none is given
const DEFAULT_PROMPT: &str =
    "Start a conversation in a cringe way in one informal sentence. No special characters.";

/// Imagination Bridge - simulation events in, model dialogue out
#[derive(Parser, Debug)]
#[command(name = "imagination-bridge")]
#[command(about = "Bridge a simulation to a remote language model over an SSH tunnel")]
#[command(version = VERSION)]
struct Cli {
    /// YAML configuration file (command-line and environment values win)
    #[arg(short, long, env = "BRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[arg(long, env = "BRIDGE_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Talk to the inference endpoint directly, ignoring tunnel settings
    #[arg(long, global = true)]
    no_tunnel: bool,

    #[command(flatten)]
    tunnel: TunnelArgs,

    #[command(flatten)]
    inference: InferenceArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct TunnelArgs {
    /// SSH host serving the inference endpoint
    #[arg(long, env = "IMAGINATION_IP", global = true)]
    remote_host: Option<String>,

    /// Inference port on the remote host
    #[arg(long, env = "IMAGINATION_PORT", global = true)]
    remote_port: Option<u16>,

    /// Local end of the forwarded port
    #[arg(long, env = "LOCAL_PORT", global = true)]
    local_port: Option<u16>,

    /// SSH login name
    #[arg(long, env = "SSH_USERNAME", global = true)]
    ssh_username: Option<String>,

    /// SSH private key file
    #[arg(long, env = "SSH_KEYFILE", global = true)]
    key_file: Option<PathBuf>,

    /// SSH server port
    #[arg(long, env = "SSH_PORT", global = true)]
    ssh_port: Option<u16>,
}

#[derive(Args, Debug)]
struct InferenceArgs {
    /// Inference endpoint for direct mode (e.g. http://127.0.0.1:11434)
    #[arg(long, env = "INFERENCE_URL", global = true)]
    inference_url: Option<String>,

    /// Model name
    #[arg(long, env = "INFERENCE_MODEL", global = true)]
    model: Option<String>,

    /// System message sent ahead of every conversation
    #[arg(long, env = "INFERENCE_SYSTEM_PROMPT", global = true)]
    system_prompt: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    inference_timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve simulation events on the local socket until interrupted
    #[command(long_about = r#"
Open the tunnel (unless --no-tunnel) and serve simulation events on the local
socket until Ctrl+C or SIGTERM. Each message is a JSON object with
event_type, agent_id and data; each gets exactly one response line.

EXAMPLES:
  # Tunnel settings from the environment
  IMAGINATION_IP=10.0.0.5 IMAGINATION_PORT=11434 LOCAL_PORT=12345 \
  SSH_USERNAME=me SSH_KEYFILE=~/.ssh/id_ed25519 imagination-bridge serve

  # Local model, one raw-framed connection for a single-read client
  imagination-bridge --no-tunnel --inference-url http://127.0.0.1:11434 \
    serve --framing raw --once
    "#)]
    Serve {
        /// Event socket address
        #[arg(long, env = "BRIDGE_BIND")]
        bind: Option<SocketAddr>,

        /// Message framing: lines or raw
        #[arg(long)]
        framing: Option<Framing>,

        /// Serve connections in parallel
        #[arg(long)]
        concurrent: bool,

        /// Exit after the first connection closes
        #[arg(long)]
        once: bool,

        /// Do not register the inference-backed dialogue handler
        #[arg(long)]
        no_dialogue: bool,
    },

    /// Generate one line of dialogue and send it to the simulation over OSC
    Speak {
        /// Prompt for the model
        #[arg(default_value = DEFAULT_PROMPT)]
        prompt: String,

        /// OSC destination
        #[arg(long, env = "OSC_TARGET")]
        osc_target: Option<SocketAddr>,

        /// OSC address pattern
        #[arg(long)]
        osc_address: Option<String>,

        /// Print the line without sending it
        #[arg(long)]
        no_send: bool,
    },

    /// Check that the inference endpoint is reachable and list its models
    Check,
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

/// Build the configuration: file first, then environment and flags
fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => BridgeConfig::default(),
    };

    if cli.no_tunnel {
        // Stray tunnel variables in the environment are ignored in direct mode
        config.tunnel = None;
    } else {
        let overrides = TunnelOverrides {
            remote_host: cli.tunnel.remote_host.clone(),
            remote_port: cli.tunnel.remote_port,
            local_port: cli.tunnel.local_port,
            ssh_username: cli.tunnel.ssh_username.clone(),
            key_file: cli.tunnel.key_file.clone(),
            ssh_port: cli.tunnel.ssh_port,
        };
        config.tunnel = overrides
            .apply(config.tunnel.take())
            .context("Incomplete tunnel settings (use --no-tunnel for direct mode)")?;
    }

    let inference = &cli.inference;
    if let Some(url) = &inference.inference_url {
        config.inference.base_url = Some(url.clone());
    }
    if let Some(model) = &inference.model {
        config.inference.model = model.clone();
    }
    if let Some(prompt) = &inference.system_prompt {
        config.inference.system_prompt = Some(prompt.clone());
    }
    if let Some(secs) = inference.inference_timeout {
        config.inference.timeout_secs = secs;
    }

    Ok(config)
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT (Ctrl+C)"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

fn log_mode(config: &BridgeConfig) {
    match &config.tunnel {
        Some(tunnel) => info!(
            "Tunnel: 127.0.0.1:{} -> {}:{} via {}",
            tunnel.local_port,
            tunnel.remote_host,
            tunnel.remote_port,
            tunnel.destination()
        ),
        None => match &config.inference.base_url {
            Some(url) => info!("Direct mode, inference endpoint {}", url),
            None => warn!("Direct mode without an inference endpoint"),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level);

    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Serve {
            bind,
            framing,
            concurrent,
            once,
            no_dialogue,
        } => {
            if let Some(bind) = bind {
                config.server.bind_addr = bind;
            }
            if let Some(framing) = framing {
                config.server.framing = framing;
            }
            config.server.concurrent |= concurrent;
            config.server.single_connection |= once;
            if no_dialogue {
                config.handlers.dialogue = false;
            }
            config.validate().context("Invalid configuration")?;

            info!("Imagination Bridge {} starting", VERSION);
            log_mode(&config);

            let mut orchestrator = Orchestrator::new(config);
            let shutdown = CancellationToken::new();

            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = shutdown_signal().await {
                    error!("{:#}", e);
                }
                trigger.cancel();
            });

            orchestrator
                .serve(shutdown)
                .await
                .context("Bridge stopped with an error")?;

            info!("Imagination Bridge stopped");
            Ok(())
        }

        Commands::Speak {
            prompt,
            osc_target,
            osc_address,
            no_send,
        } => {
            if let Some(target) = osc_target {
                config.messenger.target = target;
            }
            if let Some(address) = osc_address {
                config.messenger.address = address;
            }
            if no_send {
                config.messenger.enabled = false;
            }
            config.validate().context("Invalid configuration")?;
            log_mode(&config);

            let mut orchestrator = Orchestrator::new(config);

            let outcome = tokio::select! {
                result = orchestrator.speak(&prompt) => Some(result),
                _ = shutdown_signal() => None,
            };

            match outcome {
                Some(result) => {
                    let dialogue = result.context("Failed to generate dialogue")?;
                    println!("{}", dialogue);
                    Ok(())
                }
                None => {
                    orchestrator.release().await;
                    anyhow::bail!("Interrupted")
                }
            }
        }

        Commands::Check => {
            config.validate().context("Invalid configuration")?;
            log_mode(&config);

            let mut orchestrator = Orchestrator::new(config);

            let outcome = tokio::select! {
                result = orchestrator.check() => Some(result),
                _ = shutdown_signal() => None,
            };

            let Some(result) = outcome else {
                orchestrator.release().await;
                anyhow::bail!("Interrupted");
            };

            let models = result.context("Inference endpoint check failed")?;
            if models.is_empty() {
                warn!("Endpoint is reachable but reports no models");
            }
            for model in &models {
                println!("{}", model);
            }
            Ok(())
        }
    }
}
