#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # vesper-bridge
//!
//! Bridges a local serial port, PTY, Unix socket, TCP socket, or (on
//! Windows) named pipe to a remote TCP PPP service, with optional Hayes AT
//! modem emulation on the local side.
//!
//! Runs a single session supervisor until interrupted or a configuration
//! error makes starting pointless — there is no subcommand split; see
//! `Cli` below for the full flag surface.

use std::sync::Mutex;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use vesper_bridge::config::Config;
use vesper_bridge::error::BridgeError;
use vesper_bridge::supervisor;

/// Bridge a local device to a remote PPP service.
#[derive(Parser)]
#[command(name = "vesper-bridge", version, about)]
struct Cli {
    /// Path to a TOML config file. Defaults to `vesper-bridge.toml` in the
    /// current directory.
    #[arg(short, long)]
    config: Option<String>,

    /// Override `device.spec` from the config file.
    #[arg(long)]
    device: Option<String>,

    /// Override `device.baud_rate` from the config file.
    #[arg(short = 'b', long)]
    baud: Option<u32>,

    /// Enable Hayes AT modem emulation on the local side, overriding
    /// `modem.emulate` from the config file.
    #[arg(short = 'e', long, action = clap::ArgAction::SetTrue)]
    emulate: bool,

    /// Override `auth.username` from the config file (or `VESPER_USERNAME`).
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Override `auth.password` from the config file (or `VESPER_PASSWORD`).
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Override `session.connection_retries` from the config file.
    #[arg(short = 'r', long)]
    retries: Option<u32>,

    /// Override `session.inactivity_timeout_secs` from the config file.
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Tee logs to this file in addition to stderr.
    #[arg(long)]
    log: Option<String>,

    /// Increase log verbosity (`-v` = debug, `-vv` = trace). Overridden by
    /// `RUST_LOG` if set.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("vesper-bridge: {e}");
            std::process::exit(e.exit_code());
        }
    };

    if let Some(device) = cli.device {
        config.device.spec = device;
    }
    if let Some(baud) = cli.baud {
        config.device.baud_rate = baud;
    }
    if cli.emulate {
        config.modem.emulate = true;
    }
    if let Some(username) = cli.username {
        config.auth.username = username;
    }
    if let Some(password) = cli.password {
        config.auth.password = password;
    }
    if let Some(retries) = cli.retries {
        config.session.connection_retries = retries;
    }
    if let Some(timeout) = cli.timeout {
        config.session.inactivity_timeout_secs = timeout;
    }
    if let Some(log_file) = cli.log {
        config.logging.log_file = Some(log_file);
    }

    init_tracing(&config, cli.verbose);

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("config error: {e}");
        }
        std::process::exit(1);
    }

    info!("vesper-bridge v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "bridging {} <-> {}:{} (modem emulation {})",
        config.device.spec,
        config.remote.host,
        config.remote.port,
        if config.modem.emulate { "on" } else { "off" }
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);

    let signal_task = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("vesper-bridge: shutdown signal received");
        let _ = cancel_tx.send(true);
    });

    let result = supervisor::run(config, cancel_rx).await;
    signal_task.abort();

    match result {
        Ok(()) => {
            info!("vesper-bridge: stopped");
        }
        Err(BridgeError::Cancelled) => {
            info!("vesper-bridge: stopped (interrupted)");
            std::process::exit(BridgeError::Cancelled.exit_code());
        }
        Err(e) => {
            error!("vesper-bridge: fatal error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

/// Wait for SIGINT or (on Unix) SIGTERM.
async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("register SIGTERM");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT");
    }
}

/// Initialize tracing from config, `RUST_LOG`, and `-v`/`-vv`, in that order
/// of precedence (`RUST_LOG` always wins if set). Tees to `logging.log_file`
/// when configured, falling back to stderr-only if the file can't be opened.
fn init_tracing(config: &Config, verbose: u8) {
    let default_level = match verbose {
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = std::env::var("RUST_LOG").unwrap_or(default_level);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &config.logging.log_file {
        Some(path) => {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => builder.with_writer(Mutex::new(file)).init(),
                Err(e) => {
                    builder.init();
                    error!("vesper-bridge: failed to open log file {path}: {e}, logging to stderr only");
                }
            }
        }
        None => builder.init(),
    }
}
