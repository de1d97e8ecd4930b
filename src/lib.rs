//! Telnet Recorder Library
//!
//! Keeps a single telnet-style TCP endpoint connected, timestamps every line
//! it sends and appends the lines to daily log files with bounded retention:
//!
//! - **config**: YAML + environment configuration for the recorder
//! - **record**: Timestamped lines and the record/file name formats
//! - **framer**: Line framing over a raw byte stream
//! - **retention**: Age-based deletion of old log files
//! - **rotator**: Ownership of the day's log file and rotation at midnight
//! - **session**: One connection, from dial to disconnect
//! - **monitor**: The reconnect state machine tying it all together
//!
//! # Example
//!
//! ```no_run
//! use telnet_recorder::config::Config;
//! use telnet_recorder::monitor::Monitor;
//! use telnet_recorder::rotator::LogRotator;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load().expect("Failed to load config");
//!     let rotator = LogRotator::new(config.log_directory());
//!     let cancel = CancellationToken::new();
//!
//!     let mut monitor = Monitor::new(config.endpoint(), rotator, cancel.clone())
//!         .with_backoff(config.backoff);
//!     monitor.run().await.expect("log directory unavailable");
//! }
//! ```

pub mod config;
pub mod framer;
pub mod monitor;
pub mod record;
pub mod retention;
pub mod rotator;
pub mod session;

pub use config::{Config, ConfigError, Endpoint, LogDirectory};
pub use framer::{LineCodec, LineFramer};
pub use monitor::{Monitor, MonitorError, MonitorState, MonitorStats};
pub use record::LogLine;
pub use retention::{sweep, SweepReport};
pub use rotator::{ActiveLogFile, LogRotator, RotateError, RotatorStats};
pub use session::{ConnectError, Dialer, Session, SessionEnd, SessionEndReason, TcpDialer};
