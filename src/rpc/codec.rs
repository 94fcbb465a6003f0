//! Line-delimited wire codec
//!
//! Each message is one JSON document on a single line:
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"initialize",...}\n
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Upper bound on a single line, 16MB is far beyond any listing reply
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Read one line from the stream, without its terminator
///
/// End-of-stream before any byte arrives is reported as `ChannelClosed`.
/// A final line without a trailing newline is still returned.
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, Error> {
    read_bounded(reader, MAX_LINE_BYTES).await
}

/// Read one line, buffering at most `limit + 1` bytes of it
async fn read_bounded<R: AsyncBufRead + Unpin>(reader: &mut R, limit: usize) -> Result<String, Error> {
    let mut buf = Vec::new();
    let bytes_read = reader
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(Error::Io)?;

    if bytes_read == 0 {
        return Err(Error::ChannelClosed);
    }

    let terminated = buf.last() == Some(&b'\n');
    let content_len = if terminated { buf.len() - 1 } else { buf.len() };
    if content_len > limit {
        return Err(Error::Parse(format!("Line exceeds {} bytes", limit)));
    }

    let mut line = String::from_utf8(buf).map_err(|e| Error::Parse(format!("Invalid UTF-8: {}", e)))?;
    let trimmed_len = line.trim_end_matches(&['\r', '\n'][..]).len();
    line.truncate(trimmed_len);
    Ok(line)
}

/// Write one message followed by a newline and flush immediately
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<(), Error> {
    if json.contains('\n') {
        return Err(Error::Parse(
            "Outbound message spans multiple lines".to_string(),
        ));
    }

    let write = async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    };

    write.await.map_err(|e| {
        if e.kind() == io::ErrorKind::BrokenPipe {
            Error::ChannelClosed
        } else {
            Error::Io(e)
        }
    })
}
