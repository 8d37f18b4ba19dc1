//! Line codec for signaling messages.

use crate::signaling::SignalMessage;
use futures::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::io;

/// Maximum line size (1 MB).
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Encodes a message as one JSON line, newline included.
pub fn encode_line(message: &SignalMessage) -> io::Result<String> {
    let mut line = serde_json::to_string(message).map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidData, format!("JSON encode error: {e}"))
    })?;
    if line.len() >= MAX_LINE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {} bytes", line.len()),
        ));
    }
    line.push('\n');
    Ok(line)
}

/// Decodes one line (with or without its trailing newline).
pub fn decode_line(line: &str) -> io::Result<SignalMessage> {
    serde_json::from_str(line.trim_end()).map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidData, format!("JSON decode error: {e}"))
    })
}

/// Reads the next message, skipping blank lines.
///
/// Returns `Ok(None)` at end of stream.
pub async fn read_signal<T: AsyncBufRead + Unpin>(io: &mut T) -> io::Result<Option<SignalMessage>> {
    loop {
        let mut line = String::new();
        let read = (&mut *io)
            .take(MAX_LINE_SIZE as u64)
            .read_line(&mut line)
            .await?;

        if read == 0 {
            return Ok(None);
        }
        if !line.ends_with('\n') && read as u64 >= MAX_LINE_SIZE as u64 {
            // Leave the reader at the start of the next line.
            skip_line(io).await?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {MAX_LINE_SIZE} bytes"),
            ));
        }
        if line.trim().is_empty() {
            continue;
        }
        return decode_line(&line).map(Some);
    }
}

/// Discards input up to and including the next newline, or to end of
/// stream.
async fn skip_line<T: AsyncBufRead + Unpin>(io: &mut T) -> io::Result<()> {
    loop {
        let buf = io.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }
        let (n, done) = match buf.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (buf.len(), false),
        };
        io.consume_unpin(n);
        if done {
            return Ok(());
        }
    }
}

/// Writes one message as a JSON line and flushes.
pub async fn write_signal<T: AsyncWrite + Unpin>(io: &mut T, message: &SignalMessage) -> io::Result<()> {
    let line = encode_line(message)?;
    io.write_all(line.as_bytes()).await?;
    io.flush().await?;
    Ok(())
}
