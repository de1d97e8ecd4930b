//! Line framing for the telnet byte stream.
//!
//! [`LineCodec`] splits bytes on `\n`, strips one trailing `\r`, and keeps any
//! partial line in the codec buffer until the rest of it arrives, so the
//! output does not depend on how the peer's bytes were chunked into reads.
//! [`LineFramer`] drives the codec over one connection's reader.

use std::io;

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::debug;

/// Longest line emitted in one piece; longer lines are split.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Decoder yielding one `String` per `\n`-terminated line.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD. A line whose
/// content exceeds `max_length` bytes is emitted in `max_length` pieces.
/// An unterminated fragment left at end of stream is discarded.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes of the buffer already known to contain no `\n`
    scanned: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            scanned: 0,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let max = self.max_length;

        // Room for max bytes of content plus a `\r\n` terminator.
        let window = buf.len().min(max + 2);
        let start = self.scanned.min(window);

        let newline = buf[start..window]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| start + offset);

        if let Some(index) = newline {
            let content_len = if index > 0 && buf[index - 1] == b'\r' {
                index - 1
            } else {
                index
            };

            if content_len <= max {
                self.scanned = 0;
                let mut line = buf.split_to(index + 1);
                line.truncate(content_len);
                return Ok(Some(decode_text(&line)));
            }
        }

        // Without a terminator in the window, the line is over-long once
        // more than max + 1 bytes are buffered, or once max + 1 are buffered
        // and the last of them cannot start a `\r\n`.
        let over_long = newline.is_some()
            || buf.len() > max + 1
            || (buf.len() == max + 1 && buf[max] != b'\r');

        if over_long {
            self.scanned = 0;
            let piece = buf.split_to(max);
            debug!(max_length = max, "Splitting over-long line");
            return Ok(Some(decode_text(&piece)));
        }

        self.scanned = buf.len();
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }

        if !buf.is_empty() {
            debug!(bytes = buf.len(), "Discarding unterminated line at end of stream");
            buf.clear();
            self.scanned = 0;
        }

        Ok(None)
    }
}

fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Lazy sequence of lines read from one connection.
///
/// Scoped to a single connection: it is created when the session starts and
/// dropped with it.
pub struct LineFramer<R> {
    inner: FramedRead<R, LineCodec>,
}

impl<R: AsyncRead + Unpin> LineFramer<R> {
    pub fn new(reader: R) -> Self {
        Self::with_codec(reader, LineCodec::new())
    }

    pub fn with_codec(reader: R, codec: LineCodec) -> Self {
        Self {
            inner: FramedRead::new(reader, codec),
        }
    }

    /// Next complete line, `None` once the stream has ended.
    ///
    /// Cancel safe: dropping the returned future loses no buffered bytes.
    pub async fn next_line(&mut self) -> Option<io::Result<String>> {
        self.inner.next().await
    }

    /// Give back the underlying reader; unread buffered bytes are dropped.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}
