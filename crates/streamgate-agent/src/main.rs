//! streamgate daemon
//!
//! Keeps remote Jellyfin streams inside the home uplink:
//!
//! - Polls uplink usage from the router (LuCI) or local interface counters
//! - Finds sessions streaming to clients outside the local network
//! - Rewrites each remote user's bitrate limit and restarts their stream
//! - Restores original limits on shutdown

mod jellyfin;
mod logging;
mod pidfile;
mod router;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;

use streamgate_core::config::Config;
use streamgate_core::controller::Controller;

use crate::jellyfin::JellyfinClient;
use crate::pidfile::PidFile;
use crate::router::RouterSource;

/// Uplink bandwidth allocator for remote Jellyfin streams.
#[derive(Parser, Debug)]
#[command(name = "streamgate", version, about = "Jellyfin remote-stream bandwidth manager")]
struct Cli {
    /// Configuration file path.
    #[arg(short, long, default_value = "streamgate.toml")]
    config: PathBuf,

    /// Log intended changes without applying them.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Test connectivity to the router and Jellyfin, then exit.
    #[arg(long, default_value_t = false)]
    test: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.dry_run {
        config.daemon.dry_run = true;
    }
    let _log_guard = logging::init(&config.daemon)?;

    tracing::info!(
        config = %cli.config.display(),
        dry_run = config.daemon.dry_run,
        algorithm = %config.bandwidth.algorithm,
        "streamgate starting"
    );

    let router = RouterSource::from_config(&config.router).context("router client")?;
    let jellyfin = JellyfinClient::new(&config.jellyfin).context("jellyfin client")?;
    let mut controller = Controller::new(&config, router, jellyfin)?;

    if cli.test {
        return Ok(if controller.validate_connectivity().await {
            println!("all connectivity tests passed");
            ExitCode::SUCCESS
        } else {
            println!("connectivity tests failed");
            ExitCode::FAILURE
        });
    }

    if !controller.validate_connectivity().await {
        tracing::error!("connectivity validation failed, exiting");
        return Ok(ExitCode::FAILURE);
    }

    let pid_file = match PidFile::create(&config.daemon.pid_file) {
        Ok(pid_file) => pid_file,
        Err(e) => {
            tracing::error!("{e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    tracing::debug!(path = %pid_file.path().display(), "holding PID file");

    // ── Shutdown handling ───────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    controller.run(shutdown_rx).await;

    tracing::info!("streamgate shutting down");
    drop(pid_file);
    controller.restore_limits().await;

    tracing::info!("streamgate stopped");
    Ok(ExitCode::SUCCESS)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
