//! Content-Length message framing, in-memory and over async streams.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DapError;

const SEPARATOR: &str = "\r\n\r\n";

/// Largest body accepted from a peer (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Frame a JSON value with its Content-Length header.
pub fn encode_message(value: &Value) -> Result<Vec<u8>, DapError> {
    let body = serde_json::to_vec(value).map_err(|e| DapError::InvalidMessage(e.to_string()))?;
    let header = format!("Content-Length: {}{SEPARATOR}", body.len());
    let mut buf = Vec::with_capacity(header.len() + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decode one framed message from the front of `data`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_message(data: &[u8]) -> Result<(Value, usize), DapError> {
    let sep_pos = data
        .windows(SEPARATOR.len())
        .position(|w| w == SEPARATOR.as_bytes())
        .ok_or_else(|| DapError::Transport("incomplete header: missing \\r\\n\\r\\n".into()))?;

    let header = std::str::from_utf8(&data[..sep_pos])
        .map_err(|e| DapError::Transport(format!("invalid UTF-8 in header: {e}")))?;
    let content_length = header
        .split("\r\n")
        .find_map(content_length_of)
        .ok_or_else(|| DapError::Transport("missing Content-Length header".into()))??;

    let body_start = sep_pos + SEPARATOR.len();
    let end = body_start
        .checked_add(content_length)
        .ok_or_else(|| too_large(content_length))?;
    if data.len() < end {
        return Err(DapError::Transport(format!(
            "incomplete body: expected {content_length} bytes, have {}",
            data.len() - body_start
        )));
    }

    let value = serde_json::from_slice(&data[body_start..end])
        .map_err(|e| DapError::InvalidMessage(format!("JSON parse error: {e}")))?;
    Ok((value, end))
}

fn too_large(length: usize) -> DapError {
    DapError::Transport(format!(
        "Content-Length {length} exceeds limit of {MAX_MESSAGE_SIZE} bytes"
    ))
}

/// Parse a `Content-Length:` header line; `None` for any other header.
fn content_length_of(line: &str) -> Option<Result<usize, DapError>> {
    let value = line.trim().strip_prefix("Content-Length:")?.trim();
    let parsed = value
        .parse()
        .map_err(|e| DapError::Transport(format!("invalid Content-Length value '{value}': {e}")))
        .and_then(|length| {
            if length > MAX_MESSAGE_SIZE {
                Err(too_large(length))
            } else {
                Ok(length)
            }
        });
    Some(parsed)
}

/// Read one framed message. Returns `Ok(None)` on a clean EOF between
/// messages.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Value>, DapError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length = None;
    let mut saw_header = false;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            if saw_header {
                return Err(DapError::Transport("connection closed inside header".into()));
            }
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;
        if let Some(parsed) = content_length_of(trimmed) {
            content_length = Some(parsed?);
        }
    }

    let length =
        content_length.ok_or_else(|| DapError::Transport("missing Content-Length header".into()))?;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| DapError::InvalidMessage(format!("JSON parse error: {e}")))
}

/// Write one framed message and flush.
pub async fn write_message<W>(writer: &mut W, value: &Value) -> Result<(), DapError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_message(value)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
