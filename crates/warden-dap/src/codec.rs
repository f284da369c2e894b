//! Length-prefixed frame codec for the debug-protocol byte stream.
//!
//! Frames are an HTTP-like header section terminated by a blank line, then a
//! JSON payload of exactly `Content-Length` bytes:
//!
//! ```text
//! Content-Length: 123\r\n
//! \r\n
//! { ...json... }
//! ```
//!
//! The decoder is incremental: bytes arrive in arbitrary chunks, complete
//! payloads pop out, and a trailing partial frame stays buffered. Framing
//! errors are recovered locally — a header block without a usable
//! Content-Length is discarded and scanning resumes at the next blank-line
//! boundary. One bad frame never terminates the stream.

use tracing::warn;

use crate::error::DapResult;
use crate::messages::ProtocolMessage;

/// Upper bound on a single frame payload.
///
/// Caps the incoming `Content-Length` so a corrupt header cannot force an
/// enormous allocation; anything larger is treated as a malformed header and
/// skipped.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Serialize a message and wrap it in a `Content-Length` frame.
pub fn encode(message: &ProtocolMessage) -> DapResult<Vec<u8>> {
    let payload = serde_json::to_vec(message)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", payload.len()).into_bytes();
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Incremental frame decoder over a growing byte buffer.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete payload, if one is buffered.
    ///
    /// Returns `None` when more bytes are needed. Malformed headers are
    /// consumed silently (logged) and scanning continues, so a `None` here
    /// never means the stream is wedged.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let (header_end, body_start) = match find_blank_line(&self.buf) {
                Some(at) => at,
                None => {
                    // No terminator in sight. If the buffer has outgrown any
                    // plausible header section we are mid-garbage; drop what we
                    // have and resynchronize on future input.
                    if self.buf.len() > MAX_FRAME_BYTES {
                        warn!(
                            buffered = self.buf.len(),
                            "discarding unterminated header data"
                        );
                        self.buf.clear();
                    }
                    return None;
                }
            };

            let length = parse_content_length(&self.buf[..header_end]);
            let Some(length) = length.filter(|&len| len <= MAX_FRAME_BYTES) else {
                warn!("discarding malformed frame header");
                self.buf.drain(..body_start);
                continue;
            };

            if self.buf.len() - body_start < length {
                return None;
            }

            let payload = self.buf[body_start..body_start + length].to_vec();
            self.buf.drain(..body_start + length);
            return Some(payload);
        }
    }

    /// Pop the next payload that parses as a protocol message.
    ///
    /// A payload that is not valid JSON (or not a known message shape) is
    /// dropped and decoding continues with the following frame.
    pub fn next_message(&mut self) -> Option<ProtocolMessage> {
        while let Some(payload) = self.next_frame() {
            match serde_json::from_slice::<ProtocolMessage>(&payload) {
                Ok(message) => return Some(message),
                Err(err) => {
                    warn!(error = %err, "dropping undecodable frame payload");
                }
            }
        }
        None
    }
}

/// Find the header/body boundary: the earliest `\r\n\r\n` or bare `\n\n`.
/// Returns (header_end, body_start).
fn find_blank_line(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = find_subslice(buf, b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = find_subslice(buf, b"\n\n").map(|i| (i, i + 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_content_length(header: &[u8]) -> Option<usize> {
    let header = std::str::from_utf8(header).ok()?;
    for line in header.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("Content-Length") {
            return value.trim().parse::<usize>().ok();
        }
    }
    None
}
