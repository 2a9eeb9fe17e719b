//! OSC 1.0 message encoding
//!
//! Format:
//!
//! ```text
//! +-------------------+---------------------+----------------------+
//! | address (OSC-str) | type tags (OSC-str) | arguments            |
//! +-------------------+---------------------+----------------------+
//! ```
//!
//! An OSC-string is the UTF-8 bytes followed by 1-4 NUL bytes so the total
//! length is a multiple of 4. `i` and `f` arguments are 32-bit big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// OSC encoding errors
#[derive(Debug, Error, PartialEq)]
pub enum OscError {
    #[error("Invalid OSC address '{0}': must start with '/' and contain no spaces or '#'")]
    InvalidAddress(String),

    #[error("OSC string contains a NUL byte")]
    NulInString,

    #[error("Truncated OSC packet")]
    Truncated,

    #[error("Invalid type tag string")]
    InvalidTypeTags,

    #[error("Unsupported OSC type tag '{0}'")]
    UnsupportedType(char),

    #[error("OSC string is not valid UTF-8")]
    InvalidUtf8,
}

/// Typed OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
}

impl OscArg {
    fn type_tag(&self) -> char {
        match self {
            OscArg::Int(_) => 'i',
            OscArg::Float(_) => 'f',
            OscArg::Str(_) => 's',
        }
    }
}

impl From<&str> for OscArg {
    fn from(value: &str) -> Self {
        OscArg::Str(value.to_string())
    }
}

impl From<String> for OscArg {
    fn from(value: String) -> Self {
        OscArg::Str(value)
    }
}

impl From<i32> for OscArg {
    fn from(value: i32) -> Self {
        OscArg::Int(value)
    }
}

impl From<f32> for OscArg {
    fn from(value: f32) -> Self {
        OscArg::Float(value)
    }
}

/// Addressed message with typed arguments
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    /// Message carrying a single string argument
    pub fn with_text(address: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(address).arg(OscArg::Str(text.into()))
    }

    pub fn arg(mut self, arg: impl Into<OscArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Encode to a single OSC packet
    pub fn encode(&self) -> Result<Bytes, OscError> {
        validate_address(&self.address)?;

        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        tags.extend(self.args.iter().map(OscArg::type_tag));

        let mut buf = BytesMut::with_capacity(padded_len(self.address.len()) + padded_len(tags.len()));
        put_osc_string(&mut buf, &self.address)?;
        put_osc_string(&mut buf, &tags)?;

        for arg in &self.args {
            match arg {
                OscArg::Int(v) => buf.put_i32(*v),
                OscArg::Float(v) => buf.put_f32(*v),
                OscArg::Str(s) => put_osc_string(&mut buf, s)?,
            }
        }

        Ok(buf.freeze())
    }

    /// Decode a single OSC packet (bundles are not supported)
    pub fn decode(mut buf: Bytes) -> Result<Self, OscError> {
        let address = get_osc_string(&mut buf)?;
        validate_address(&address)?;

        // Packets without a type tag string carry no arguments
        if buf.is_empty() {
            return Ok(Self::new(address));
        }

        let tags = get_osc_string(&mut buf)?;
        let mut tag_chars = tags.chars();
        if tag_chars.next() != Some(',') {
            return Err(OscError::InvalidTypeTags);
        }

        let mut args = Vec::new();
        for tag in tag_chars {
            let arg = match tag {
                'i' => {
                    if buf.remaining() < 4 {
                        return Err(OscError::Truncated);
                    }
                    OscArg::Int(buf.get_i32())
                }
                'f' => {
                    if buf.remaining() < 4 {
                        return Err(OscError::Truncated);
                    }
                    OscArg::Float(buf.get_f32())
                }
                's' => OscArg::Str(get_osc_string(&mut buf)?),
                other => return Err(OscError::UnsupportedType(other)),
            };
            args.push(arg);
        }

        Ok(Self { address, args })
    }
}

fn validate_address(address: &str) -> Result<(), OscError> {
    if !address.starts_with('/') || address.contains([' ', '#', '\0']) {
        return Err(OscError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

/// Length of an OSC-string holding `len` bytes of text
fn padded_len(len: usize) -> usize {
    (len / 4 + 1) * 4
}

fn put_osc_string(buf: &mut BytesMut, s: &str) -> Result<(), OscError> {
    if s.contains('\0') {
        return Err(OscError::NulInString);
    }
    let padding = padded_len(s.len()) - s.len();
    buf.put_slice(s.as_bytes());
    buf.put_bytes(0, padding);
    Ok(())
}

fn get_osc_string(buf: &mut Bytes) -> Result<String, OscError> {
    let end = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or(OscError::Truncated)?;
    let total = padded_len(end);
    if buf.len() < total {
        return Err(OscError::Truncated);
    }

    let raw = buf.split_to(total);
    String::from_utf8(raw[..end].to_vec()).map_err(|_| OscError::InvalidUtf8)
}
