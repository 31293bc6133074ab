//! osh-server: SSH command server.
//!
//! Accepts public-key-authenticated connections and serves each session
//! channel with either one-shot command execution or an interactive
//! line-oriented shell over a small built-in command set.

mod auth;
mod channel;
mod config;
mod subsystem;
mod terminal;
mod transport;

use auth::Authenticator;
use clap::Parser;
use config::ServerConfig;
use osh_core::commands::CommandRegistry;
use osh_core::AuthorizedKeySet;
use std::path::PathBuf;
use std::sync::Arc;
use subsystem::SubsystemRegistry;
use tracing::{error, info, warn};
use transport::ServerContext;

/// osh-server — SSH command server
#[derive(Parser, Debug)]
#[command(name = "osh-server", version, about = "SSH command server")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.osh/config.toml")]
    config: String,

    /// Host private key (OpenSSH PEM)
    #[arg(long)]
    host_key: Option<String>,

    /// Authorized public keys listing
    #[arg(long)]
    authorized_keys: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting osh-server");

    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(
        Some(&config_path),
        cli.host_key.as_deref(),
        cli.authorized_keys.as_deref(),
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    // Both key inputs are startup-fatal: the server never runs without a
    // host key, and never runs with a partial allowlist.
    let host_key_pem = match std::fs::read_to_string(&server_config.host_key_path) {
        Ok(pem) => pem,
        Err(e) => {
            error!(
                path = %server_config.host_key_path.display(),
                error = %e,
                "unable to read host key"
            );
            std::process::exit(1);
        }
    };

    let authorized_blob = match std::fs::read_to_string(&server_config.authorized_keys_path) {
        Ok(blob) => blob,
        Err(e) => {
            error!(
                path = %server_config.authorized_keys_path.display(),
                error = %e,
                "unable to read authorized keys"
            );
            std::process::exit(1);
        }
    };

    let key_set = match AuthorizedKeySet::parse(&authorized_blob) {
        Ok(set) => set,
        Err(e) => {
            error!(error = %e, "unable to parse authorized keys");
            std::process::exit(1);
        }
    };
    if key_set.is_empty() {
        warn!("authorized keys listing is empty — every authentication will fail");
    } else {
        info!(count = key_set.len(), "loaded authorized keys");
    }

    let context = ServerContext {
        authenticator: Authenticator::new(key_set),
        commands: Arc::new(CommandRegistry::builtin()),
        subsystems: Arc::new(SubsystemRegistry::new()),
    };

    tokio::select! {
        result = transport::serve(&host_key_pem, context) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("osh-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
