//! Wire protocol framing (§4.E).
//!
//! A message is a short textual verb, padded to [`TRANSPORT_BUFFER_SIZE`].
//! Binary payloads (file content) are chunked so that no single chunk
//! exceeds one transport buffer; a short final chunk terminates the body.
//! This module owns framing only — the verbs themselves (`OPENDIR`, `GET`,
//! `SYNCH STAT`) live in [`verbs`], and hub discovery lives in
//! [`discovery`].

pub mod discovery;
pub mod verbs;

use std::io::{Read, Write};
use thiserror::Error;

/// The original's `CF_BUFSIZE`: the fixed per-call transport buffer size
/// (§3: "a fixed transport-layer buffer size").
pub const TRANSPORT_BUFFER_SIZE: usize = 4096;

/// `GET` always requests one buffer minus one byte per turn (§4.E).
pub const GET_CHUNK_SIZE: usize = TRANSPORT_BUFFER_SIZE - 1;

/// The magic token ending an `OPENDIR` listing (§4.E).
pub const DIRECTORY_LISTING_TERMINATOR: &str = "CFD_TERMINATOR";

/// Protocol-level failures. Any of these moves the owning connection-cache
/// entry to `BROKEN` (§4.E client guarantee).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server rejected the call: {0}")]
    Bad(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("clock skew with server exceeds policy")]
    ClockSkew,
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> crate::error::ErrorKind {
        crate::error::ErrorKind::Resource
    }
}

/// Write one framed message: the verb line, NUL-padded out to
/// [`TRANSPORT_BUFFER_SIZE`] bytes.
pub fn write_frame(w: &mut impl Write, text: &str) -> Result<(), Error> {
    if text.len() >= TRANSPORT_BUFFER_SIZE {
        return Err(Error::Malformed(format!(
            "frame body of {} bytes exceeds transport buffer size {TRANSPORT_BUFFER_SIZE}",
            text.len()
        )));
    }
    let mut buf = vec![0u8; TRANSPORT_BUFFER_SIZE];
    buf[..text.len()].copy_from_slice(text.as_bytes());
    w.write_all(&buf)?;
    Ok(())
}

/// Read one framed message: exactly [`TRANSPORT_BUFFER_SIZE`] bytes, trimmed
/// of trailing NUL padding.
pub fn read_frame(r: &mut impl Read) -> Result<String, Error> {
    let mut buf = vec![0u8; TRANSPORT_BUFFER_SIZE];
    r.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..end].to_vec())
        .map_err(|e| Error::Malformed(format!("non-UTF-8 frame: {e}")))
}

/// Read one frame without trimming at the first NUL byte. Used for
/// directory-listing chunks, where NUL is a field separator *within* the
/// payload rather than end-of-text padding.
pub fn read_frame_raw(r: &mut impl Read) -> Result<[u8; TRANSPORT_BUFFER_SIZE], Error> {
    let mut buf = [0u8; TRANSPORT_BUFFER_SIZE];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Treat a response frame as `OK: …` or `BAD …`, per §4.E.
pub fn classify_response(frame: &str) -> Result<&str, Error> {
    if let Some(rest) = frame.strip_prefix("BAD") {
        return Err(Error::Bad(rest.trim_start_matches(':').trim().to_string()));
    }
    frame.strip_prefix("OK").map(|rest| rest.trim_start_matches(':').trim()).ok_or_else(|| {
        Error::Malformed(format!("expected OK/BAD response, got {frame:?}"))
    })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, "OPENDIR masterfiles").unwrap();
        assert_eq!(buf.len(), TRANSPORT_BUFFER_SIZE);

        let mut cursor = Cursor::new(buf);
        let text = read_frame(&mut cursor).unwrap();
        assert_eq!(text, "OPENDIR masterfiles");
    }

    #[test]
    fn classify_response_distinguishes_ok_and_bad() {
        assert_eq!(classify_response("OK: 200").unwrap(), "200");
        assert!(matches!(classify_response("BAD: access denied"), Err(Error::Bad(msg)) if msg == "access denied"));
        assert!(classify_response("garbage").is_err());
    }

    #[test]
    fn oversized_body_is_rejected_before_write() {
        let mut buf = Vec::new();
        let oversized = "x".repeat(TRANSPORT_BUFFER_SIZE);
        assert!(write_frame(&mut buf, &oversized).is_err());
    }
}
