//! The five verbs the agent speaks as a client (§4.E): `OPENDIR`, `GET`,
//! `SYNCH … STAT`, `EXEC`, plus the `BAD`/`OK` response convention shared by
//! all of them. Each function is synchronous on the connection it's given,
//! matching the client guarantee that a call occupies one cache entry for
//! its whole duration.

use super::{
    classify_response, read_frame, read_frame_raw, write_frame, Error, DIRECTORY_LISTING_TERMINATOR,
    GET_CHUNK_SIZE,
};
use std::io::{Read, Write};

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// `OPENDIR <path>` → the NUL-separated directory listing, stripped of the
/// terminator. Relative paths are rooted at the server's work directory.
pub fn opendir(conn: &mut (impl Read + Write), path: &str) -> Result<Vec<String>, Error> {
    write_frame(conn, &format!("OPENDIR {path}"))?;

    let mut accumulated = Vec::new();
    loop {
        let chunk = read_frame_raw(conn)?;
        if accumulated.is_empty() && chunk.starts_with(b"BAD") {
            let end = chunk.iter().position(|&b| b == 0).unwrap_or(chunk.len());
            return Err(Error::Bad(String::from_utf8_lossy(&chunk[3..end]).trim().to_string()));
        }
        accumulated.extend_from_slice(&chunk);
        if let Some(pos) = find_subslice(&accumulated, DIRECTORY_LISTING_TERMINATOR.as_bytes()) {
            accumulated.truncate(pos);
            break;
        }
    }

    Ok(accumulated
        .split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).to_string())
        .collect())
}

fn read_chunk(conn: &mut impl Read, chunk_size: usize) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; chunk_size];
    let mut total = 0;
    while total < chunk_size {
        let n = conn.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    buf.truncate(total);
    Ok(buf)
}

/// `GET <chunk_size> <path>` → the file body, `chunk_size` bytes per turn
/// (currently always [`GET_CHUNK_SIZE`]). `file_size` comes from a
/// preceding [`stat`] call and bounds how many chunks are expected; a short
/// chunk always terminates the body even if `file_size` hasn't been reached
/// (a truncated remote file), matching §4.E's framing rule.
pub fn get(conn: &mut (impl Read + Write), path: &str, file_size: u64) -> Result<Vec<u8>, Error> {
    write_frame(conn, &format!("GET {GET_CHUNK_SIZE} {path}"))?;

    let mut data = Vec::with_capacity(file_size.min(1 << 20) as usize);
    loop {
        let chunk = read_chunk(conn, GET_CHUNK_SIZE)?;
        let short = chunk.len() < GET_CHUNK_SIZE;
        data.extend_from_slice(&chunk);
        if short || data.len() as u64 >= file_size {
            break;
        }
    }
    Ok(data)
}

/// One field of a `SYNCH … STAT` response. The original transfers the raw
/// `struct stat` fields as space-separated numbers in a server-version
/// dependent order; we keep the raw vector and expose the conventional
/// positions (status code, then `st_mode`, `st_uid`, `st_gid`, `st_size`,
/// `st_atime`, `st_mtime`, `st_ctime`) as named accessors, matching the
/// field order the original's `stat_cache.h` documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStat {
    fields: Vec<i64>,
}

impl RemoteStat {
    fn parse(body: &str) -> Result<Self, Error> {
        let fields = body
            .split_whitespace()
            .map(|t| t.parse::<i64>().map_err(|_| Error::Malformed(format!("non-numeric stat field {t:?}"))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { fields })
    }

    #[must_use]
    pub fn raw_fields(&self) -> &[i64] {
        &self.fields
    }
    #[must_use]
    pub fn mode(&self) -> Option<i64> {
        self.fields.get(1).copied()
    }
    #[must_use]
    pub fn uid(&self) -> Option<i64> {
        self.fields.get(2).copied()
    }
    #[must_use]
    pub fn gid(&self) -> Option<i64> {
        self.fields.get(3).copied()
    }
    #[must_use]
    pub fn size(&self) -> Option<i64> {
        self.fields.get(4).copied()
    }
    #[must_use]
    pub fn mtime(&self) -> Option<i64> {
        self.fields.get(6).copied()
    }
}

/// `SYNCH <client_epoch_seconds> STAT <path>` → a [`RemoteStat`]. The server
/// rejects the call (as `BAD`, surfaced as [`Error::ClockSkew`] when the
/// rejection text says so) if the client's clock has drifted too far.
pub fn stat(conn: &mut (impl Read + Write), client_epoch_seconds: u64, path: &str) -> Result<RemoteStat, Error> {
    write_frame(conn, &format!("SYNCH {client_epoch_seconds} STAT {path}"))?;
    let response = read_frame(conn)?;
    match classify_response(&response) {
        Ok(body) => RemoteStat::parse(body),
        Err(Error::Bad(msg)) if msg.to_lowercase().contains("clock") => Err(Error::ClockSkew),
        Err(e) => Err(e),
    }
}

/// `EXEC <command>` → the command's combined output, framed the same way as
/// an `OPENDIR` listing (chunked, terminated by the same magic token) since
/// both are server-generated streams of unknown length.
pub fn exec(conn: &mut (impl Read + Write), command: &str) -> Result<String, Error> {
    write_frame(conn, &format!("EXEC {command}"))?;

    let mut accumulated = Vec::new();
    loop {
        let chunk = read_frame_raw(conn)?;
        if accumulated.is_empty() && chunk.starts_with(b"BAD") {
            let end = chunk.iter().position(|&b| b == 0).unwrap_or(chunk.len());
            return Err(Error::Bad(String::from_utf8_lossy(&chunk[3..end]).trim().to_string()));
        }
        accumulated.extend_from_slice(&chunk);
        if let Some(pos) = find_subslice(&accumulated, DIRECTORY_LISTING_TERMINATOR.as_bytes()) {
            accumulated.truncate(pos);
            break;
        }
    }
    Ok(String::from_utf8_lossy(&accumulated).trim_end_matches('\0').to_string())
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framed_response(body: &str) -> Vec<u8> {
        let mut buf = vec![0u8; super::super::TRANSPORT_BUFFER_SIZE];
        buf[..body.len()].copy_from_slice(body.as_bytes());
        buf
    }

    struct MockConn {
        inbound: Cursor<Vec<u8>>,
        outbound: Vec<u8>,
    }
    impl Read for MockConn {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inbound.read(buf)
        }
    }
    impl Write for MockConn {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbound.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn opendir_parses_nul_separated_listing() {
        let mut listing = b".\0..\0update.cf\0".to_vec();
        listing.extend_from_slice(DIRECTORY_LISTING_TERMINATOR.as_bytes());
        listing.resize(super::super::TRANSPORT_BUFFER_SIZE, 0);

        let mut conn = MockConn { inbound: Cursor::new(listing), outbound: Vec::new() };
        let names = opendir(&mut conn, "masterfiles").unwrap();
        assert_eq!(names, vec![".", "..", "update.cf"]);
        assert!(String::from_utf8_lossy(&conn.outbound).starts_with("OPENDIR masterfiles"));
    }

    #[test]
    fn opendir_surfaces_bad_response() {
        let response = framed_response("BAD: no such directory");
        let mut conn = MockConn { inbound: Cursor::new(response), outbound: Vec::new() };
        let err = opendir(&mut conn, "nope").unwrap_err();
        assert!(matches!(err, Error::Bad(msg) if msg == "no such directory"));
    }

    #[test]
    fn stat_parses_ok_response_fields() {
        let response = framed_response("OK: 0 33188 0 0 1024 1700000000 1700000001 1700000002");
        let mut conn = MockConn { inbound: Cursor::new(response), outbound: Vec::new() };
        let stat = stat(&mut conn, 1_700_000_100, "masterfiles/update.cf").unwrap();
        assert_eq!(stat.mode(), Some(33188));
        assert_eq!(stat.size(), Some(1024));
    }

    #[test]
    fn stat_clock_skew_is_a_distinguished_error() {
        let response = framed_response("BAD: clock skew exceeds policy");
        let mut conn = MockConn { inbound: Cursor::new(response), outbound: Vec::new() };
        let err = stat(&mut conn, 1, "x").unwrap_err();
        assert!(matches!(err, Error::ClockSkew));
    }

    #[test]
    fn get_stops_at_short_final_chunk() {
        // Body is shorter than one chunk and the stream ends there (EOF),
        // so the short read itself — not `file_size` — must end the body.
        let body = b"hello world".to_vec();
        let mut conn = MockConn { inbound: Cursor::new(body), outbound: Vec::new() };
        let data = get(&mut conn, "masterfiles/update.cf", 10_000).unwrap();
        assert_eq!(data, b"hello world");
    }
}
