//! FTP Command framing
//!
//! Reads CRLF-terminated command lines from the control connection into a
//! bounded, growable buffer. A line longer than the bound, or one that ends
//! without CRLF, is a framing error.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::FramingError;

/// Bounded line reader over the read half of a control connection.
///
/// `next_line` is cancel-safe: bytes of a partially received line stay in
/// the internal buffer when the future is dropped, so it can sit in a
/// `select!` next to the idle timer.
pub struct CommandReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    limit: usize,
}

impl<R: AsyncRead + Unpin> CommandReader<R> {
    /// `limit` bounds one line including its CRLF.
    pub fn new(inner: R, limit: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
            limit,
        }
    }

    /// Returns the next line without its CRLF, or `None` once the peer has
    /// closed the connection between lines. Octets are passed through as-is.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                self.pending.clear();
                return Err(FramingError::MissingCrlf);
            }

            if let Some(idx) = available.iter().position(|&b| b == b'\n') {
                self.pending.extend_from_slice(&available[..=idx]);
                self.reader.consume(idx + 1);
                let line = std::mem::take(&mut self.pending);
                return self.finish(line).map(Some);
            }

            let consumed = available.len();
            self.pending.extend_from_slice(available);
            self.reader.consume(consumed);

            if self.pending.len() > self.limit {
                self.pending.clear();
                return Err(FramingError::LineTooLong { limit: self.limit });
            }
        }
    }

    fn finish(&self, mut line: Vec<u8>) -> Result<Vec<u8>, FramingError> {
        if line.len() > self.limit {
            return Err(FramingError::LineTooLong { limit: self.limit });
        }
        if !line.ends_with(b"\r\n") {
            return Err(FramingError::MissingCrlf);
        }
        line.truncate(line.len() - 2);
        Ok(line)
    }
}
