//! Request framing on the RTSP control connection.
//!
//! A message is complete once the `\r\n\r\n` header terminator has arrived,
//! plus `Content-Length` body bytes when that header is present. Clients
//! using interleaved transport also send `$`-framed RTCP receiver reports
//! on the same connection; those are skipped.

use crate::transport::interleaved::INTERLEAVED_MAGIC;

/// Receive buffer cap. A request that does not complete within this many
/// bytes is dropped.
pub const MAX_REQUEST_SIZE: usize = 4096;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Accumulates bytes from the control connection and yields whole messages.
#[derive(Debug)]
pub struct RequestBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl Default for RequestBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MAX_REQUEST_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Reached the cap without holding a complete message.
    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.capacity
    }

    /// Drop everything buffered.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Remove and return the next complete RTSP message, if one is buffered.
    pub fn next_message(&mut self) -> Option<Vec<u8>> {
        loop {
            let skip = self.buf.iter().take_while(|&&b| b == b'\r' || b == b'\n').count();
            self.buf.drain(..skip);

            if self.buf.first() != Some(&INTERLEAVED_MAGIC) {
                break;
            }
            // `$ | channel | len(2) | payload`
            let frame_len = match self.buf.get(2..4) {
                Some(len) => 4 + usize::from(u16::from_be_bytes([len[0], len[1]])),
                None => return None,
            };
            if self.buf.len() < frame_len {
                return None;
            }
            self.buf.drain(..frame_len);
        }

        let header_end = find(&self.buf, HEADER_TERMINATOR)? + HEADER_TERMINATOR.len();
        let total = header_end + content_length(&self.buf[..header_end]);
        if self.buf.len() < total {
            return None;
        }
        Some(self.buf.drain(..total).collect())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}
