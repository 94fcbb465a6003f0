//! Message channel over a target's stdin/stdout
//!
//! Strictly synchronous: the caller sends one message, then (for requests)
//! receives exactly one line before sending the next.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::process::{ChildStdin, ChildStdout};

use crate::common::{Error, Result};

use super::codec;

/// Line-framed JSON channel
pub struct MessageChannel<R = ChildStdout, W = ChildStdin> {
    /// Buffered reader for target stdout
    reader: BufReader<R>,
    /// Buffered writer for target stdin
    writer: BufWriter<W>,
}

impl<R, W> MessageChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }

    /// Serialize `message` onto a single line and flush it
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let json = serde_json::to_string(message)?;
        tracing::debug!("rpc >>> {}", json);
        codec::write_message(&mut self.writer, &json).await
    }

    /// Read one line and parse it as JSON, bounded by `timeout`
    pub async fn receive(&mut self, timeout: Duration) -> Result<Value> {
        let line = tokio::time::timeout(timeout, codec::read_message(&mut self.reader))
            .await
            .map_err(|_| Error::Timeout(timeout))??;

        tracing::debug!("rpc <<< {}", line);

        serde_json::from_str(&line).map_err(|e| Error::Parse(format!("{} in {:?}", e, preview(&line))))
    }
}

/// First 80 characters of a line for error messages
fn preview(line: &str) -> String {
    const MAX: usize = 80;
    match line.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    }
}
