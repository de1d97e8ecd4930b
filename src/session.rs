//! One connection to the monitored endpoint.
//!
//! A [`Session`] owns its stream and its [`LineFramer`]. [`Session::run`]
//! consumes the session and shuts the stream down exactly once, on whichever
//! path the session ends.
//!
//! Cancellation races the pending read against the token in `select!`. If the
//! token fires first, the read future is dropped (no bytes are lost from the
//! codec buffer) and the stream is shut down here. If the read completes first,
//! the line is written and cancellation is seen on the next iteration. A
//! stream that reports itself closed or reset is a normal end of session, not
//! a failure.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Endpoint;
use crate::framer::LineFramer;
use crate::record::LogLine;
use crate::rotator::{LogRotator, RotateError};

/// Why a session stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// End of stream, or the connection is no longer usable
    PeerClosed,

    /// A read failed for another reason
    ReadError,

    /// Shutdown was requested while the session was running
    Cancelled,
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    pub reason: SessionEndReason,

    /// Lines recorded during the session
    pub lines: u64,
}

/// Failure to establish a connection. Always transient.
#[derive(Debug)]
pub enum ConnectError {
    /// The dial did not complete within the connect timeout
    Timeout { addr: String, after: Duration },

    /// The dial failed (refused, unreachable, DNS failure, ...)
    Io { addr: String, source: io::Error },
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Timeout { addr, after } => {
                write!(f, "Connection to {} timed out after {:?}", addr, after)
            }
            ConnectError::Io { addr, source } => {
                write!(f, "Connection to {} failed: {}", addr, source)
            }
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectError::Io { source, .. } => Some(source),
            ConnectError::Timeout { .. } => None,
        }
    }
}

/// Establishes the byte stream for a session.
pub trait Dialer {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn dial(
        &mut self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Stream, ConnectError>> + Send;
}

/// Plain TCP dialer bounded by the endpoint's connect timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&mut self, endpoint: &Endpoint) -> Result<TcpStream, ConnectError> {
        let addr = endpoint.addr();

        match timeout(endpoint.connect_timeout, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Could not set TCP_NODELAY");
                }
                Ok(stream)
            }
            Ok(Err(source)) => Err(ConnectError::Io { addr, source }),
            Err(_) => Err(ConnectError::Timeout {
                addr,
                after: endpoint.connect_timeout,
            }),
        }
    }
}

/// A live connection and its line framer.
pub struct Session<S> {
    addr: String,
    framer: LineFramer<S>,
}

impl Session<TcpStream> {
    /// Dial `endpoint` over TCP.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` if the dial fails or times out.
    pub async fn open(endpoint: &Endpoint) -> Result<Self, ConnectError> {
        Self::dial_with(&mut TcpDialer, endpoint).await
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Dial `endpoint` through `dialer`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` if the dialer fails.
    pub async fn dial_with<D>(dialer: &mut D, endpoint: &Endpoint) -> Result<Self, ConnectError>
    where
        D: Dialer<Stream = S>,
    {
        let stream = dialer.dial(endpoint).await?;
        Ok(Self::new(endpoint.addr(), stream))
    }

    /// Wrap an already-connected stream.
    pub fn new(addr: impl Into<String>, stream: S) -> Self {
        Self {
            addr: addr.into(),
            framer: LineFramer::new(stream),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Record lines until the peer goes away, a read fails or `cancel` fires.
    ///
    /// Each line is stamped with the local time it was read and handed to
    /// `rotator`.
    ///
    /// # Errors
    ///
    /// Returns `RotateError` if the rotator cannot open a new day's file. The
    /// stream is shut down before returning in every case.
    pub async fn run(
        mut self,
        rotator: &mut LogRotator,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, RotateError> {
        let mut lines: u64 = 0;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(SessionEndReason::Cancelled),
                next = self.framer.next_line() => next,
            };

            match next {
                Some(Ok(text)) => {
                    if let Err(e) = rotator.write(&LogLine::now(text)) {
                        break Err(e);
                    }
                    lines += 1;
                }
                None => break Ok(SessionEndReason::PeerClosed),
                Some(Err(e)) if is_disconnect(&e) => {
                    debug!(addr = %self.addr, error = %e, "Connection no longer usable");
                    break Ok(SessionEndReason::PeerClosed);
                }
                Some(Err(e)) => {
                    warn!(addr = %self.addr, error = %e, "Read error");
                    break Ok(SessionEndReason::ReadError);
                }
            }
        };

        let addr = self.addr.clone();
        self.close().await;

        let reason = outcome?;
        match reason {
            SessionEndReason::PeerClosed => info!(addr = %addr, lines, "Disconnected, reconnecting..."),
            SessionEndReason::ReadError => info!(addr = %addr, lines, "Session ended after read error"),
            SessionEndReason::Cancelled => info!(addr = %addr, lines, "Session cancelled"),
        }

        Ok(SessionEnd { reason, lines })
    }

    async fn close(self) {
        let mut stream = self.framer.into_inner();
        if let Err(e) = stream.shutdown().await {
            debug!(addr = %self.addr, error = %e, "Socket shutdown reported an error");
        }
    }
}

/// Errors meaning the peer is gone rather than that something broke.
fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}
