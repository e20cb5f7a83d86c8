use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taskd::{config::DaemonConfig, ipc, ws, AppContext};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "taskd",
    about = "Task-management daemon — JSON control protocol + real-time event feed",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Control protocol (newline-delimited JSON) port
    #[arg(long, env = "TASKD_CONTROL_PORT")]
    control_port: Option<u16>,

    /// Real-time WebSocket port
    #[arg(long, env = "TASKD_WS_PORT")]
    ws_port: Option<u16>,

    /// Bind address (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "TASKD_BIND")]
    bind: Option<String>,

    /// Path to a config.toml
    #[arg(long, env = "TASKD_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TASKD_LOG")]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand given).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = DaemonConfig::load(
        args.config.as_deref(),
        args.control_port,
        args.ws_port,
        args.bind,
        args.log,
    );

    // Init once — must happen before any tracing calls.
    tracing_subscriber::fmt()
        .with_env_filter(config.log_level.clone())
        .compact()
        .init();

    match args.command {
        None | Some(Command::Serve) => serve(config).await,
    }
}

async fn serve(config: DaemonConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting taskd");

    let (restart_tx, mut restart_rx) = tokio::sync::mpsc::unbounded_channel();
    let ctx = AppContext::new(config, Some(restart_tx));

    // Background services owned by daemon lifetime: both handles are
    // aborted when the gateway stops, never left dangling.
    let ws_server = tokio::spawn(ws::run(ctx.clone()));
    let metrics_ticker = ws::spawn_metrics_ticker(ctx.clone());

    let gateway = tokio::spawn(ipc::run(ctx.clone()));
    tokio::select! {
        result = gateway => {
            result??;
        }
        _ = restart_rx.recv() => {
            info!("restart requested — shutting down for supervisor restart");
        }
    }

    metrics_ticker.abort();
    ws_server.abort();
    drop(ctx);
    info!("taskd stopped");
    Ok(())
}
