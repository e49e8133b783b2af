//! kubevirt-console CLI
//!
//! Single binary for serial console access:
//! - `console`: attach this terminal to a VMI's serial console
//! - `web`: serve the console to browsers over websockets

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kubevirt_console::commands::{self, ClusterOptions};
use kubevirt_console::output::print_error;
use vc_core::config::{self, ConsoleConfig};
use vc_core::ConsoleTarget;

/// Time left to abandoned tasks (a pending stdin read) once a command is done
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "kubevirt-console")]
#[command(author, version, about = "Serial console access for KubeVirt virtual machine instances")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Time to wait for the console to become available (e.g. "90s", "10m")
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Kubernetes API server URL
    #[arg(long, global = true, env = "KUBEVIRT_CONSOLE_SERVER")]
    server: Option<String>,

    /// Bearer token for the API server
    #[arg(long, global = true, env = "KUBEVIRT_CONSOLE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Skip verification of the API server's TLS certificate
    #[arg(long, global = true)]
    insecure_skip_tls_verify: bool,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the serial console of a virtual machine instance
    Console {
        /// Name of the virtual machine instance
        vmi: String,
        /// Namespace of the virtual machine instance
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Serve the serial console to browsers
    Web {
        /// Address to listen on (overrides config)
        #[arg(long)]
        listen: Option<String>,
        /// Initial namespace offered to browsers
        #[arg(long)]
        namespace: Option<String>,
        /// Serve a dedicated console for this VMI only
        #[arg(long)]
        vmi: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            print_error(&format!("Failed to start async runtime: {}", e));
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));
    // Stdin reads cannot be cancelled; do not wait for them
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    match result {
        Ok(code) => code,
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    // Console output owns the terminal, keep the console command quiet
    let default_level = match (&cli.command, cli.quiet, cli.verbose) {
        (_, true, _) => "error",
        (Commands::Console { .. }, false, 0) => "warn",
        (Commands::Web { .. }, false, 0) => "info",
        (_, false, 1) => "info",
        (_, false, 2) => "debug",
        (_, false, _) => "trace",
    };
    let level = cli.log_level.as_deref().unwrap_or(default_level);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_ref())?;
    let timeout = cli.timeout.unwrap_or(config.timeout);
    let options = ClusterOptions {
        server: cli.server,
        token: cli.token,
        insecure_skip_tls_verify: cli.insecure_skip_tls_verify,
    };

    match cli.command {
        Commands::Console { vmi, namespace } => {
            let namespace = commands::resolve_namespace(namespace.as_deref(), &config)?;
            let provider = commands::build_provider(&options, &config)?;

            let interrupt = CancellationToken::new();
            spawn_signal_handler(interrupt.clone());

            let termination = commands::console_command(
                provider,
                ConsoleTarget::new(namespace, vmi),
                timeout,
                &interrupt,
            )
            .await;
            tracing::debug!("Console session ended: {}", termination);

            Ok(if termination.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::Web {
            listen,
            namespace,
            vmi,
        } => {
            let settings = commands::web_settings(timeout, namespace, vmi, &config)?;
            let provider = commands::build_provider(&options, &config)?;
            let listen = listen.unwrap_or_else(|| config.web.listen.clone());

            let shutdown = CancellationToken::new();
            spawn_signal_handler(shutdown.clone());

            commands::web_command(provider, settings, &listen, shutdown).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load the config file; a missing or broken default file falls back to
/// defaults, an explicit path must load
fn load_config(config_path: Option<&PathBuf>) -> Result<ConsoleConfig> {
    if let Some(config_path) = config_path {
        return config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            ConsoleConfig::default()
        }))
    } else {
        tracing::debug!("Using default configuration");
        Ok(ConsoleConfig::default())
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
        }

        token.cancel();
    });
}
