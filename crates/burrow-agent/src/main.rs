//! burrow daemon
//!
//! Supervises a fleet of SSH reverse tunnels declared in a JSON
//! configuration document, reconnecting tunnels whose transport failed
//! and following config changes at runtime.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burrow_agent::{Supervisor, SupervisorOptions};
use burrow_core::config::{self, AuthConfig, AuthMethod, ConfigSource};

#[derive(Parser)]
#[command(name = "burrow")]
#[command(version)]
#[command(about = "Supervisor for SSH reverse tunnels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tunnel supervisor
    Run {
        /// Path or URL of the JSON tunnel configuration
        #[arg(short, long)]
        config: Option<String>,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Reconciliation interval in seconds
        #[arg(short, long, default_value_t = 1)]
        interval: u64,

        /// Username presented to tunnel servers
        #[arg(short, long)]
        user: Option<String>,

        /// Private key used for SSH authentication
        #[arg(long, value_name = "FILE")]
        identity: Option<PathBuf>,

        /// Environment variable holding an SSH password
        #[arg(long, value_name = "VAR")]
        password_env: Option<String>,
    },

    /// Print the burrow version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run {
            config,
            verbose,
            interval,
            user,
            identity,
            password_env,
        } => {
            run(config, verbose, interval, user, identity, password_env).await
        }
    }
}

async fn run(
    config: Option<String>,
    verbose: bool,
    interval: u64,
    user: Option<String>,
    identity: Option<PathBuf>,
    password_env: Option<String>,
) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let location = config.unwrap_or_else(|| {
        config::default_config_path().to_string_lossy().into_owned()
    });
    let source = ConfigSource::from_location(&location);

    let method = if let Some(path) = identity {
        AuthMethod::Key {
            path,
            passphrase: None,
        }
    } else if let Some(var) = password_env {
        let password = std::env::var(&var)
            .with_context(|| format!("password environment variable {var} is not set"))?;
        AuthMethod::Password(password)
    } else {
        AuthMethod::None
    };
    let auth = AuthConfig {
        username: user.unwrap_or_else(whoami::username),
        method,
    };

    let supervisor = Supervisor::new(
        source,
        auth,
        SupervisorOptions {
            interval: Duration::from_secs(interval.max(1)),
            ..Default::default()
        },
    );

    tracing::info!("starting tunnel supervisor (config: {location})");
    supervisor
        .start()
        .await
        .with_context(|| format!("failed to load tunnel config from {location}"))?;

    wait_for_shutdown().await?;

    tracing::info!("stopping tunnel supervisor");
    supervisor.stop_all().await;
    Ok(())
}

/// Block until SIGINT or SIGTERM arrives
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigint.recv() => tracing::info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
