//! Git pkt-line framing.
//!
//! A pkt-line is a 4-hex-digit, lowercase, zero-padded length prefix equal
//! to `len(payload) + 4`, followed by the payload. The all-zero "0000"
//! flush packet terminates a section and carries no payload.

use crate::{Error, Result};

/// Flush packet (marks end of a section).
pub const FLUSH_PKT: &[u8] = b"0000";

/// Maximum pkt-line size including the length prefix.
pub const MAX_PKT_LINE: usize = 65520;

/// Frame a payload as a single pkt-line.
pub fn pkt_line(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() + 4;
    debug_assert!(len <= MAX_PKT_LINE);
    let mut pkt = format!("{len:04x}").into_bytes();
    pkt.extend_from_slice(payload);
    pkt
}

/// Accumulates pkt-lines into one buffer.
pub struct PktLineWriter {
    buffer: Vec<u8>,
}

impl PktLineWriter {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn write(&mut self, payload: &[u8]) {
        self.buffer.extend_from_slice(&pkt_line(payload));
    }

    pub fn write_str(&mut self, s: &str) {
        self.write(s.as_bytes());
    }

    pub fn flush(&mut self) {
        self.buffer.extend_from_slice(FLUSH_PKT);
    }

    /// Append pre-framed bytes verbatim.
    pub fn write_raw(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

impl Default for PktLineWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// One parsed pkt-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine<'a> {
    Flush,
    Data(&'a [u8]),
}

/// Parses pkt-lines out of a byte buffer.
pub struct PktLineReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PktLineReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read the next pkt-line, or `None` at end of input.
    pub fn read(&mut self) -> Result<Option<PktLine<'a>>> {
        if self.pos + 4 > self.data.len() {
            return Ok(None);
        }

        let prefix = std::str::from_utf8(&self.data[self.pos..self.pos + 4])
            .map_err(|_| Error::Protocol("invalid pkt-line length".into()))?;

        if prefix == "0000" {
            self.pos += 4;
            return Ok(Some(PktLine::Flush));
        }

        let len = usize::from_str_radix(prefix, 16)
            .map_err(|_| Error::Protocol("invalid pkt-line length".into()))?;
        if len < 4 {
            return Err(Error::Protocol("pkt-line length too small".into()));
        }
        if len > MAX_PKT_LINE {
            return Err(Error::Protocol("pkt-line too large".into()));
        }
        if self.pos + len > self.data.len() {
            return Err(Error::Protocol("pkt-line truncated".into()));
        }

        let payload = &self.data[self.pos + 4..self.pos + len];
        self.pos += len;
        Ok(Some(PktLine::Data(payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_with_lowercase_padded_prefix() {
        assert_eq!(pkt_line(b"hello"), b"0009hello");
    }

    #[test]
    fn service_announcement_framing() {
        // 27-byte payload -> 0x1f total length.
        let payload = b"# service=git-upload-pack\n";
        assert_eq!(payload.len() + 4, 0x1f);

        let mut writer = PktLineWriter::new();
        writer.write(payload);
        writer.flush();
        assert_eq!(
            writer.as_bytes(),
            b"001f# service=git-upload-pack\n0000".as_slice()
        );
    }

    #[test]
    fn reader_roundtrip() {
        let data = b"0009hello0006ab0000";
        let mut reader = PktLineReader::new(data);
        assert_eq!(reader.read().unwrap(), Some(PktLine::Data(b"hello")));
        assert_eq!(reader.read().unwrap(), Some(PktLine::Data(b"ab")));
        assert_eq!(reader.read().unwrap(), Some(PktLine::Flush));
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn reader_rejects_truncated_input() {
        let mut reader = PktLineReader::new(b"0009hel");
        assert!(reader.read().is_err());
    }

    #[test]
    fn reader_rejects_undersized_length() {
        let mut reader = PktLineReader::new(b"0002");
        assert!(reader.read().is_err());
    }
}
