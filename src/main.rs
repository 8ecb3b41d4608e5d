//! Ollama Provisioner - CLI entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ollama_provisioner::{
    ProgressEvent, ProvisionerConfig, ProvisioningEngine, SizeClass,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "ollama-provisioner")]
#[command(about = "Provision a local Ollama runtime and its models", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve and print the current provisioning status
    Status,
    /// List viable server install modes for this environment
    Modes,
    /// Install the server using an install mode (see `modes`)
    InstallServer {
        /// Mode id; defaults to the preferred mode for this environment
        #[arg(long)]
        mode: Option<String>,
    },
    /// Launch the server
    StartServer,
    /// Pull the model artifacts for a size class
    Pull {
        #[arg(long, value_enum, default_value_t = SizeClass::Small)]
        size: SizeClass,
    },
    /// End-to-end setup: ensure the server runs, then pull models
    Setup {
        #[arg(long, value_enum, default_value_t = SizeClass::Small)]
        size: SizeClass,
    },
    /// List models available on the running server
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
    }

    let config = ProvisionerConfig::load(cli.config)?;
    config.validate()?;

    tracing::debug!(
        server_url = %config.server_url,
        registry_url = %config.registry_url,
        "Configuration loaded"
    );

    let engine = Arc::new(ProvisioningEngine::from_config(config)?);

    match cli.command {
        Commands::Status => {
            let snapshot = engine
                .fetch_status()
                .await
                .expect("first status fetch is never debounced");
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Modes => {
            let info = engine.init().await;
            for mode in info.install_modes {
                println!("{:<12} {}", mode.id, mode.label);
            }
        }
        Commands::InstallServer { mode } => {
            let mode = match mode {
                Some(mode) => mode,
                None => {
                    let info = engine.init().await;
                    info.install_modes
                        .first()
                        .map(|m| m.id.clone())
                        .context("no install mode available")?
                }
            };
            wire_ctrl_c(engine.clone());

            tracing::info!(mode = %mode, "Installing server");
            let done = engine
                .install_server(&mode, &progress_printer())
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            if done {
                tracing::info!("Install dispatched; poll `status` to watch it complete");
            } else {
                tracing::warn!("Install did not run; follow the opened instructions");
            }
        }
        Commands::StartServer => {
            let launched = engine
                .start_server()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            if launched {
                tracing::info!("Server launch dispatched");
            } else {
                tracing::warn!("No launch strategy for this platform");
            }
        }
        Commands::Pull { size } | Commands::Setup { size } => {
            wire_ctrl_c(engine.clone());

            tracing::info!(size = %size, "Pulling model artifacts");
            let pulled = engine
                .pull_models(size, &progress_printer())
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            if pulled {
                let snapshot = engine.resolve_status().await;
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                tracing::info!("Models ready");
            } else {
                tracing::warn!("Pull cancelled");
            }
        }
        Commands::Models => {
            let models = engine
                .available_models()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            for model in models {
                println!("{model}");
            }
        }
    }

    Ok(())
}

/// Cancel the engine's in-flight operation on Ctrl+C.
fn wire_ctrl_c(engine: Arc<ProvisioningEngine>) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            engine.cancel_installation().await;
        }
    });
}

/// Progress sink logging roughly once per percent, leaving finer-grained
/// rendering to richer front ends.
fn progress_printer() -> impl Fn(ProgressEvent) + Send + Sync {
    let last_logged = AtomicU64::new(0);
    move |event: ProgressEvent| {
        if event.total == 0 {
            return;
        }
        let threshold = (event.total / 100).max(1);
        let previous = last_logged.load(Ordering::Relaxed);
        if event.completed < event.total && event.completed.saturating_sub(previous) < threshold {
            return;
        }
        last_logged.store(event.completed, Ordering::Relaxed);
        let percent = event.completed * 100 / event.total;
        tracing::info!(
            status = %event.status,
            completed = event.completed,
            total = event.total,
            "{percent}%"
        );
    }
}
