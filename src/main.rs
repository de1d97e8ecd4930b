//! Telnet Recorder - persistent line logger for a telnet-style endpoint
//!
//! Connects to one device, timestamps every line it sends and appends the
//! lines to `runlog_<YYYYMMDD>.log` files, reconnecting forever until asked to
//! stop.
//!
//! ## Configuration
//!
//! Read from `config.yaml` (or the file named by `TELNET_RECORDER_CONFIG`),
//! then overridden from the environment:
//!
//! - `TELNET_RECORDER_HOST` / `TELNET_RECORDER_PORT`: endpoint (default 127.0.0.1:23)
//! - `TELNET_RECORDER_LOG_DIR`: log directory (default ./logs)
//! - `TELNET_RECORDER_KEEP_DAYS`: days of logs to keep (default 7)
//! - `TELNET_RECORDER_CONNECT_TIMEOUT_SECS`: dial timeout (default 5)
//! - `TELNET_RECORDER_BACKOFF_SECS`: wait between attempts (default 3)
//! - `RUST_LOG`: Logging level filter (default: info)

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use telnet_recorder::config::Config;
use telnet_recorder::monitor::Monitor;
use telnet_recorder::rotator::LogRotator;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::load() {
        Ok(config) => {
            info!(
                host = %config.host,
                port = config.port,
                log_dir = %config.log_dir.display(),
                keep_days = config.keep_days,
                source = ?config.source,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let rotator = LogRotator::new(config.log_directory());
    let mut monitor =
        Monitor::new(config.endpoint(), rotator, cancel).with_backoff(config.backoff);

    match monitor.run().await {
        Ok(_) => println!("Telnet monitor exit."),
        Err(e) => {
            error!(error = %e, "Cannot continue without a writable log file");
            std::process::exit(1);
        }
    }
}

/// Send diagnostics to stderr so stdout carries only the mirrored records.
///
/// `RUST_LOG` selects the filter; anything unparsable falls back to `info`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Cancel `token` on SIGINT or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received, stopping...");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to listen for SIGTERM");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
        }
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}
