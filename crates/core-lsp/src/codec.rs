//! `Content-Length`-framed JSON-RPC over byte streams.

use std::io::{BufRead, Write};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("input closed")]
    Eof,
    #[error("malformed header: {0:?}")]
    BadHeader(String),
    #[error("missing Content-Length header")]
    MissingLength,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read one framed message body. Headers are latin-1 lines terminated by
/// `\r\n`; an empty line ends the header block. Only `Content-Length`
/// matters; other headers are skipped.
pub fn read_frame(reader: &mut impl BufRead) -> Result<String, FrameError> {
    let mut length: Option<usize> = None;
    // Bounded: there are typically exactly two header lines.
    for _ in 0..10 {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(FrameError::Eof);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("Content-Length:") {
            length = Some(
                value
                    .trim()
                    .parse()
                    .map_err(|_| FrameError::BadHeader(trimmed.to_owned()))?,
            );
        }
    }
    let length = length.ok_or(FrameError::MissingLength)?;
    let mut body = vec![0u8; length];
    std::io::Read::read_exact(reader, &mut body)?;
    String::from_utf8(body).map_err(|e| FrameError::BadHeader(e.to_string()))
}

/// Write one framed message.
pub fn write_frame(writer: &mut impl Write, body: &str) -> std::io::Result<()> {
    write!(writer, "Content-Length: {}\r\n\r\n{}", body.len(), body)?;
    writer.flush()
}
