//! Coordinator binary: the `start | stop | status | logs` CLI
//! that launches the HTTP API, the background drivers, and the relay
//! listener as one foreground process, plus the minimal controls an operator
//! needs to manage it as a long-running service.

mod api;
mod config;
mod drivers;
mod error;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;

use catalog::CatalogStore;
use config::Config;
use state::AppState;

#[derive(Parser)]
#[command(name = "coordinator")]
#[command(about = "DCP catalog and swarm distribution coordinator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator in the foreground: HTTP API, relay, and drivers.
    Start,
    /// Signal a running coordinator (found via its pid file) to shut down.
    Stop,
    /// Report whether a coordinator process is running.
    Status,
    /// Note where to find coordinator logs.
    Logs,
}

fn pid_file_path() -> PathBuf {
    std::env::var("COORDINATOR_PID_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/coordinator.pid"))
}

fn write_pid_file() -> Result<()> {
    std::fs::write(pid_file_path(), std::process::id().to_string())?;
    Ok(())
}

fn read_pid_file() -> Option<i32> {
    std::fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn process_is_alive(pid: i32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,coordinator=debug".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => run_start().await,
        Commands::Stop => run_stop(),
        Commands::Status => run_status(),
        Commands::Logs => run_logs(),
    }
}

async fn run_start() -> Result<()> {
    let config = Config::load().context("loading configuration")?;
    info!(role = ?config.role, "starting coordinator");

    let store = CatalogStore::connect(&config.database_url())
        .await
        .context("connecting to catalog database")?;
    let state = AppState::new(store, config.clone());

    write_pid_file().context("writing pid file")?;

    let app = api::router(state.clone());
    let api_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port))
        .await
        .with_context(|| format!("binding API port {}", config.api_port))?;
    info!(port = config.api_port, "API listening");
    let api_handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(api_listener, app).await {
            tracing::error!(error = %err, "API server exited");
        }
    });

    let relay_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.relay_port))
        .await
        .with_context(|| format!("binding relay port {}", config.relay_port))?;
    info!(port = config.relay_port, "relay listening");
    let relay_server = relay::RelayServer::new(100);
    let relay_handle = {
        let relay_server = Arc::clone(&relay_server);
        tokio::spawn(async move {
            if let Err(err) = relay_server.run(relay_listener).await {
                tracing::error!(error = %err, "relay server exited");
            }
        })
    };

    let scan_handle = drivers::run_scan_driver(state.clone());
    let watch_handle = drivers::run_watch_driver(state.clone());
    let build_handle = drivers::run_build_driver(state.clone());
    let sweep_handle = drivers::run_claim_sweep_driver(state.clone());

    let shutdown = async {
        let ctrl_c = signal::ctrl_c();
        #[cfg(unix)]
        let mut sigterm =
            signal::unix::signal(signal::unix::SignalKind::terminate()).expect("install SIGTERM handler");
        #[cfg(unix)]
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received ctrl-c");
        }
    };

    shutdown.await;
    info!("shutting down");
    api_handle.abort();
    relay_handle.abort();
    scan_handle.abort();
    watch_handle.abort();
    build_handle.abort();
    sweep_handle.abort();
    let _ = std::fs::remove_file(pid_file_path());
    Ok(())
}

fn run_stop() -> Result<()> {
    let pid = read_pid_file().ok_or_else(|| anyhow!("no pid file at {}", pid_file_path().display()))?;
    if !process_is_alive(pid) {
        println!("coordinator is not running");
        let _ = std::fs::remove_file(pid_file_path());
        return Ok(());
    }

    #[cfg(unix)]
    {
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            return Err(anyhow!("failed to signal pid {pid}"));
        }
    }
    println!("sent shutdown signal to pid {pid}");
    Ok(())
}

fn run_status() -> Result<()> {
    match read_pid_file() {
        Some(pid) if process_is_alive(pid) => println!("coordinator is running (pid {pid})"),
        Some(_) => println!("coordinator is not running (stale pid file)"),
        None => println!("coordinator is not running"),
    }
    Ok(())
}

fn run_logs() -> Result<()> {
    println!("coordinator logs structured events to stdout via tracing; set RUST_LOG to adjust verbosity");
    println!("pid file: {}", pid_file_path().display());
    Ok(())
}
