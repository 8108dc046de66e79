// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Entry point: loads config, stands up the MIDI backend and event bus,
//! spawns the engine thread plus the HTTP and WebSocket servers, and
//! waits for a shutdown signal.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use sketchatone_core::config::default_config_path;
use sketchatone_core::logging::{init_logging, LoggingConfig};
use sketchatone_core::{Config, EventBus, Scheduler};
use sketchatone_server::{engine, hid, http, websocket};

#[derive(Parser, Debug)]
#[command(
    name = "sketchatone-server",
    version,
    about = "Tablet-to-MIDI strummer engine with a WebSocket/HTTP front end"
)]
struct Args {
    /// Path to the JSON config file. Defaults to the platform config dir.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory of static files served over HTTP (the browser UI).
    #[arg(long, value_name = "DIR", default_value = "public")]
    public_dir: PathBuf,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    /// Log at trace level (implies --verbose).
    #[arg(short = 'T', long)]
    trace: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.trace {
        "trace"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    let logging = LoggingConfig::default().with_level(level);
    if let Err(err) = init_logging(&logging) {
        eprintln!("failed to initialize logging: {err}");
    }

    info!(version = env!("CARGO_PKG_VERSION"), "sketchatone-server starting");

    let config_path = args.config.unwrap_or_else(default_config_path);
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(path = %config_path.display(), error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    info!(path = %config_path.display(), "configuration loaded");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "failed to start async runtime");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run(config, config_path, args.public_dir)) {
        error!(error = %err, "server exited with an error");
        std::process::exit(1);
    }
}

async fn run(
    config: Config,
    config_path: PathBuf,
    public_dir: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let server_config = config.server.clone();

    let scheduler = Scheduler::start();
    let bus = Arc::new(EventBus::new());
    bus.set_throttle_ms(server_config.ws_message_throttle);

    // No HID driver is wired up yet in this server, but the engine thread
    // still selects on its receiver so a future driver only needs to call
    // `FrameSender::push`.
    let (_frame_sender, frame_source) = hid::frame_channel();

    let (notifications, _) = broadcast::channel(64);

    let (engine_handle, engine_join) =
        engine::spawn(config.clone(), scheduler, bus.clone(), frame_source, notifications.clone());

    let ws_server = websocket::WsServer::new(engine_handle.clone(), bus.clone(), config_path, notifications);

    let http_addr = SocketAddr::from(([0, 0, 0, 0], server_config.http_port));
    let ws_addr = SocketAddr::from(([0, 0, 0, 0], server_config.ws_port));

    let http_task = tokio::spawn(http::run(http_addr, public_dir));
    let ws_task = tokio::spawn(ws_server.run(ws_addr));

    wait_for_shutdown().await;
    info!("shutdown signal received, tearing down");

    http_task.abort();
    ws_task.abort();
    engine_handle.shutdown_and_join(engine_join);

    info!("sketchatone-server stopped");
    Ok(())
}

/// Waits for SIGTERM/SIGINT (Ctrl+C on non-Unix). Once the first signal
/// arrives, a second spawns a forced exit in case teardown hangs.
async fn wait_for_shutdown() {
    first_signal().await;
    tokio::spawn(async {
        first_signal().await;
        warn!("second shutdown signal, forcing exit");
        std::process::exit(130);
    });
}

#[cfg(unix)]
async fn first_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            std::future::pending().await
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "failed to install SIGINT handler");
            std::future::pending().await
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn first_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
