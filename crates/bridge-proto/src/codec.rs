//! Framing for the event socket

use crate::messages::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How messages are delimited on the event socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// One JSON object per `\n`-terminated line, one response line per message
    #[default]
    Lines,
    /// One socket read is one message; responses carry no terminator.
    ///
    /// Matches clients that write a message and block on a single read.
    /// Breaks under TCP coalescing or fragmentation.
    Raw,
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lines" | "newline" => Ok(Framing::Lines),
            "raw" => Ok(Framing::Raw),
            other => Err(format!(
                "unknown framing '{}' (expected 'lines' or 'raw')",
                other
            )),
        }
    }
}

/// Event socket codec
///
/// Format (lines): `<json>\n` in both directions. A trailing `\r` is
/// stripped and blank lines are skipped.
pub struct EventCodec {
    framing: Framing,
    max_message_size: usize,
    /// Set after an oversized line until its terminating newline arrives
    discarding: bool,
}

impl EventCodec {
    pub fn new(framing: Framing, max_message_size: usize) -> Self {
        Self {
            framing,
            max_message_size,
            discarding: false,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Decode one message payload from the buffer
    ///
    /// Returns Ok(Some(payload)) if a complete message was decoded,
    /// Ok(None) if more data is needed,
    /// Err if an oversized message was dropped (the codec stays usable).
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        match self.framing {
            Framing::Raw => {
                if buf.is_empty() {
                    return Ok(None);
                }
                Ok(Some(buf.split().freeze()))
            }
            Framing::Lines => self.decode_line(buf),
        }
    }

    /// Decode whatever is left once the peer has closed its write side
    ///
    /// An unterminated final line is accepted as a message.
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if let Some(msg) = self.decode(buf)? {
            return Ok(Some(msg));
        }
        if self.discarding {
            buf.clear();
            self.discarding = false;
            return Ok(None);
        }
        let rest = buf.split().freeze();
        let trimmed = trim_line(rest);
        if trimmed.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(trimmed))
    }

    fn decode_line(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        loop {
            let Some(newline) = buf.iter().position(|b| *b == b'\n') else {
                if !self.discarding && buf.len() > self.max_message_size {
                    let size = buf.len();
                    buf.clear();
                    self.discarding = true;
                    return Err(ProtocolError::MessageTooLarge {
                        size,
                        limit: self.max_message_size,
                    });
                }
                if self.discarding {
                    buf.clear();
                }
                return Ok(None);
            };

            let line = buf.split_to(newline + 1).freeze();

            if self.discarding {
                // Tail of a line that was already reported as too large
                self.discarding = false;
                continue;
            }

            let line = trim_line(line.slice(..newline));
            if line.len() > self.max_message_size {
                return Err(ProtocolError::MessageTooLarge {
                    size: line.len(),
                    limit: self.max_message_size,
                });
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(line));
        }
    }

    /// Encode a response string for the wire
    ///
    /// In line framing, embedded line breaks are folded into spaces so one
    /// response always occupies exactly one line.
    pub fn encode_response(&self, response: &str, dst: &mut BytesMut) {
        match self.framing {
            Framing::Raw => dst.put_slice(response.as_bytes()),
            Framing::Lines => {
                dst.reserve(response.len() + 1);
                if response.contains(['\n', '\r']) {
                    let folded = response.replace("\r\n", " ").replace(['\n', '\r'], " ");
                    dst.put_slice(folded.as_bytes());
                } else {
                    dst.put_slice(response.as_bytes());
                }
                dst.put_u8(b'\n');
            }
        }
    }
}

fn trim_line(line: Bytes) -> Bytes {
    match line.last() {
        Some(b'\r') => line.slice(..line.len() - 1),
        _ => line,
    }
}
