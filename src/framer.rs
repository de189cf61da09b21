//! Incremental line framer for the serial byte stream.
//!
//! The peripheral emits newline-delimited JSON, but the serial layer hands us
//! arbitrary byte chunks. This module reassembles those chunks into complete
//! lines, feeding whole frames to the codec and carrying partial data across
//! reads.

use thiserror::Error;

/// Maximum bytes buffered while waiting for a line terminator. A buffer that
/// grows past this without a newline is not protocol traffic (wedged firmware,
/// binary garbage on the wire) and gets discarded wholesale.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum FramerError {
    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("discarded {0} buffered bytes without a line terminator")]
    Overflow(usize),
}

/// Splits an incoming byte stream into newline-terminated frames.
///
/// Feed chunks with [`push`](Self::push), then drain completed lines with
/// [`next_line`](Self::next_line). Bytes after the last newline are carried
/// until the following push. A malformed frame only fails that frame; the
/// framer stays usable for everything after it.
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(1024),
        }
    }

    /// Append a chunk of raw bytes from the link.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete line. `Ok(None)` means no full line is
    /// buffered yet.
    ///
    /// Lines are terminated by `\n`; a trailing `\r` is stripped so CRLF
    /// consoles work unchanged. Blank lines yield nothing. Returns `Err` for
    /// a frame that is not valid UTF-8 and when the carry buffer overflows,
    /// both of which drop the offending bytes and leave the framer healthy.
    pub fn next_line(&mut self) -> Result<Option<String>, FramerError> {
        loop {
            match self.buf.iter().position(|&b| b == b'\n') {
                Some(idx) => {
                    let mut line: Vec<u8> = self.buf.drain(..=idx).collect();
                    line.pop(); // the newline itself
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    if line.is_empty() {
                        continue;
                    }
                    return Ok(Some(String::from_utf8(line)?));
                }
                None => {
                    if self.buf.len() > MAX_LINE_BYTES {
                        let dropped = self.buf.len();
                        self.buf.clear();
                        return Err(FramerError::Overflow(dropped));
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Bytes currently carried while waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(framer: &mut LineFramer) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = framer.next_line().expect("expected a clean line") {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_single_line() {
        let mut framer = LineFramer::new();
        framer.push(b"{\"type\":\"heartbeat_ack\"}\n");
        assert_eq!(drain(&mut framer), vec!["{\"type\":\"heartbeat_ack\"}"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_line_split_across_pushes() {
        let mut framer = LineFramer::new();
        framer.push(b"{\"type\":\"sta");
        assert!(framer.next_line().unwrap().is_none());
        assert_eq!(framer.pending(), 12);

        framer.push(b"tus\"}\n");
        assert_eq!(drain(&mut framer), vec!["{\"type\":\"status\"}"]);
    }

    #[test]
    fn test_multiple_lines_in_one_push() {
        let mut framer = LineFramer::new();
        framer.push(b"one\ntwo\nthree\npartial");
        assert_eq!(drain(&mut framer), vec!["one", "two", "three"]);
        assert_eq!(framer.pending(), 7);
    }

    #[test]
    fn test_crlf_stripped() {
        let mut framer = LineFramer::new();
        framer.push(b"hello\r\nworld\r\n");
        assert_eq!(drain(&mut framer), vec!["hello", "world"]);
    }

    #[test]
    fn test_blank_lines_yield_nothing() {
        let mut framer = LineFramer::new();
        framer.push(b"\n\r\n\nreal\n\n");
        assert_eq!(drain(&mut framer), vec!["real"]);
        assert!(framer.next_line().unwrap().is_none());
    }

    #[test]
    fn test_invalid_utf8_fails_only_that_frame() {
        let mut framer = LineFramer::new();
        framer.push(b"good\n\xff\xfe\nalso good\n");

        assert_eq!(framer.next_line().unwrap().unwrap(), "good");
        assert!(matches!(
            framer.next_line(),
            Err(FramerError::InvalidUtf8(_))
        ));
        assert_eq!(framer.next_line().unwrap().unwrap(), "also good");
    }

    #[test]
    fn test_overflow_discards_buffer() {
        let mut framer = LineFramer::new();
        framer.push(&vec![b'x'; MAX_LINE_BYTES + 1]);

        match framer.next_line() {
            Err(FramerError::Overflow(n)) => assert_eq!(n, MAX_LINE_BYTES + 1),
            other => panic!("expected overflow, got {:?}", other),
        }
        assert_eq!(framer.pending(), 0);

        // Still usable afterwards.
        framer.push(b"recovered\n");
        assert_eq!(framer.next_line().unwrap().unwrap(), "recovered");
    }

    #[test]
    fn test_exactly_at_limit_keeps_waiting() {
        let mut framer = LineFramer::new();
        framer.push(&vec![b'x'; MAX_LINE_BYTES]);
        assert!(framer.next_line().unwrap().is_none());

        framer.push(b"\n");
        let line = framer.next_line().unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_BYTES);
    }
}
