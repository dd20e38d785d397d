//! Newline-delimited message framing for JSON-RPC over stdio.
//!
//! The MCP stdio transport carries one JSON-RPC message per line:
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"tools/list"}\n
//! ```
//!
//! Messages must not contain raw newlines; `serde_json::to_string` never
//! produces them. Blank lines are skipped and a trailing `\r` is tolerated.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum message size (16MB) to prevent OOM from malicious/buggy peers.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Read the next message line from the stream.
///
/// Returns `Ok(None)` once the peer closes the stream.
///
/// # Errors
///
/// Returns an error if:
/// - The underlying read fails
/// - A line exceeds MAX_MESSAGE_SIZE
/// - The line is not valid UTF-8
pub async fn read_message<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    read_message_with_limit(reader, MAX_MESSAGE_SIZE).await
}

/// Same as [`read_message`] with an explicit size limit.
pub async fn read_message_with_limit<R>(reader: &mut R, limit: usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    loop {
        let mut raw = Vec::new();
        let bytes_read = (&mut *reader)
            .take(limit as u64 + 1)
            .read_until(b'\n', &mut raw)
            .await
            .context("Failed to read message line")?;

        // EOF - peer closed the stream
        if bytes_read == 0 {
            return Ok(None);
        }

        let terminated = raw.last() == Some(&b'\n');
        if !terminated && raw.len() > limit {
            bail!("Message size exceeds maximum {} bytes", limit);
        }

        let line = String::from_utf8(raw).context("Message is not valid UTF-8")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        return Ok(Some(trimmed.to_string()));
    }
}

/// Write one message followed by a newline and flush.
///
/// # Errors
///
/// Returns an error if the body contains a raw newline, or if the write or
/// flush fails.
pub async fn write_message<W>(writer: &mut W, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if body.contains('\n') {
        bail!("Message body contains an embedded newline");
    }

    writer
        .write_all(body.as_bytes())
        .await
        .context("Failed to write message body")?;
    writer
        .write_all(b"\n")
        .await
        .context("Failed to write message delimiter")?;
    writer.flush().await.context("Failed to flush message")?;

    Ok(())
}
