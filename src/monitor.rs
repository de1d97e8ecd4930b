//! The reconnect loop.
//!
//! The monitor is an explicit state machine:
//!
//! ```text
//! Idle ──▶ Dialing ──ok──▶ Connected ──ended──▶ Backoff ──▶ Idle
//!            │                 │                   ▲
//!            └──────failed─────┼───────────────────┘
//!                              │
//!  cancel (from any state) ────┴──▶ ShuttingDown
//! ```
//!
//! Connection and read failures never escape the loop. The only error that
//! does is failing to open a log file.

use std::time::Duration;

use chrono::Local;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Endpoint;
use crate::rotator::{LogRotator, RotateError};
use crate::session::{Dialer, Session, SessionEndReason, TcpDialer};

/// Fixed wait between connection attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(3);

/// States of the reconnect loop.
pub enum MonitorState<S> {
    /// About to start an attempt
    Idle,

    /// Dialing the endpoint
    Dialing,

    /// Connected; the session has not run yet
    Connected(Session<S>),

    /// Waiting before the next attempt
    Backoff,

    /// Cancellation observed; the log file is closed on entry
    ShuttingDown,
}

impl<S> MonitorState<S> {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorState::Idle => "idle",
            MonitorState::Dialing => "dialing",
            MonitorState::Connected(_) => "connected",
            MonitorState::Backoff => "backoff",
            MonitorState::ShuttingDown => "shutting_down",
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self, MonitorState::ShuttingDown)
    }
}

/// The one unrecoverable failure of the monitor.
#[derive(Debug)]
pub enum MonitorError {
    /// No writable log destination could be provided
    Provisioning(RotateError),
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::Provisioning(e) => write!(f, "Log destination unavailable: {}", e),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Provisioning(e) => Some(e),
        }
    }
}

impl From<RotateError> for MonitorError {
    fn from(err: RotateError) -> Self {
        MonitorError::Provisioning(err)
    }
}

/// Counters kept across the monitor's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Dials started
    pub connect_attempts: u64,

    /// Dials that failed or timed out
    pub connect_failures: u64,

    /// Sessions run to completion
    pub sessions: u64,

    /// Lines recorded over all sessions
    pub lines: u64,
}

/// Keeps one endpoint connected and recorded until cancelled.
pub struct Monitor<D: Dialer = TcpDialer> {
    endpoint: Endpoint,
    dialer: D,
    rotator: LogRotator,
    cancel: CancellationToken,
    backoff: Duration,
    stats: MonitorStats,
}

impl Monitor<TcpDialer> {
    /// Monitor `endpoint` over plain TCP.
    pub fn new(endpoint: Endpoint, rotator: LogRotator, cancel: CancellationToken) -> Self {
        Self::with_dialer(endpoint, TcpDialer, rotator, cancel)
    }
}

impl<D: Dialer> Monitor<D> {
    pub fn with_dialer(
        endpoint: Endpoint,
        dialer: D,
        rotator: LogRotator,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            endpoint,
            dialer,
            rotator,
            cancel,
            backoff: DEFAULT_BACKOFF,
            stats: MonitorStats::default(),
        }
    }

    /// Change the wait between attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until cancelled.
    ///
    /// Opens today's log file first (which also runs a retention sweep), then
    /// cycles through the states until shutdown. The log file is closed
    /// before returning, on success and on error.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Provisioning` if a log file cannot be opened.
    pub async fn run(&mut self) -> Result<MonitorStats, MonitorError> {
        if !self.rotator.is_open() {
            if let Err(e) = self.rotator.rotate(Local::now().date_naive()) {
                self.rotator.close();
                return Err(e.into());
            }
        }

        let mut state = MonitorState::Idle;
        loop {
            let done = state.is_shutting_down();
            state = match self.step(state).await {
                Ok(next) => next,
                Err(e) => {
                    self.rotator.close();
                    return Err(e);
                }
            };
            if done {
                break;
            }
        }

        info!(
            connect_attempts = self.stats.connect_attempts,
            connect_failures = self.stats.connect_failures,
            sessions = self.stats.sessions,
            lines = self.stats.lines,
            "Monitor stopped"
        );
        Ok(self.stats.clone())
    }

    /// Perform exactly one transition out of `state`.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Provisioning` if the session needed a new log
    /// file and it could not be opened.
    pub async fn step(
        &mut self,
        state: MonitorState<D::Stream>,
    ) -> Result<MonitorState<D::Stream>, MonitorError> {
        let from = state.name();

        let next = match state {
            MonitorState::Idle => {
                if self.cancel.is_cancelled() {
                    MonitorState::ShuttingDown
                } else {
                    MonitorState::Dialing
                }
            }

            MonitorState::Dialing => self.dial().await,

            MonitorState::Connected(session) => {
                let end = session.run(&mut self.rotator, &self.cancel).await?;
                self.stats.sessions += 1;
                self.stats.lines += end.lines;

                if end.reason == SessionEndReason::Cancelled || self.cancel.is_cancelled() {
                    MonitorState::ShuttingDown
                } else {
                    MonitorState::Backoff
                }
            }

            MonitorState::Backoff => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => MonitorState::ShuttingDown,
                    _ = sleep(self.backoff) => MonitorState::Idle,
                }
            }

            MonitorState::ShuttingDown => {
                if self.rotator.close() {
                    info!("Log file closed");
                }
                MonitorState::ShuttingDown
            }
        };

        debug!(from, to = next.name(), "Monitor transition");
        Ok(next)
    }

    async fn dial(&mut self) -> MonitorState<D::Stream> {
        let addr = self.endpoint.addr();
        info!(addr = %addr, "Connecting to {}", addr);
        self.stats.connect_attempts += 1;

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return MonitorState::ShuttingDown,
            result = self.dialer.dial(&self.endpoint) => result,
        };

        match result {
            Ok(stream) => {
                info!(addr = %addr, "Connected.");
                MonitorState::Connected(Session::new(addr, stream))
            }
            Err(e) => {
                self.stats.connect_failures += 1;
                warn!(
                    error = %e,
                    "Connect failed, retry in {}s",
                    self.backoff.as_secs_f32()
                );
                MonitorState::Backoff
            }
        }
    }

    pub fn rotator(&self) -> &LogRotator {
        &self.rotator
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }
}
