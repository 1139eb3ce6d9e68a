//! Conversions between characteristic payload bytes and typed values or text

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// A value with a fixed little-endian wire representation.
///
/// `decode` only accepts input of exactly [`WIDTH`](FixedWidth::WIDTH) bytes.
pub trait FixedWidth: Sized {
    /// Encoded size in bytes
    const WIDTH: usize;

    /// Decodes a value from exactly `WIDTH` bytes
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;

    /// Encodes the value into `WIDTH` little-endian bytes
    fn encode(&self) -> Vec<u8>;
}

fn length_mismatch(expected: usize, bytes: &[u8]) -> DecodeError {
    DecodeError::LengthMismatch {
        expected,
        actual: bytes.len(),
    }
}

macro_rules! impl_fixed_width {
    ($($ty:ty),*) => {
        $(
            impl FixedWidth for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
                    let raw = bytes.try_into().map_err(|_| length_mismatch(Self::WIDTH, bytes))?;
                    Ok(<$ty>::from_le_bytes(raw))
                }

                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

impl_fixed_width!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl FixedWidth for bool {
    const WIDTH: usize = 1;

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        match bytes {
            [byte] => Ok(*byte == 1),
            _ => Err(length_mismatch(Self::WIDTH, bytes)),
        }
    }

    fn encode(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }
}

/// Text encoding used to carry characteristic values to and from the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    /// The value is UTF-8 text
    #[serde(rename = "utf-8")]
    Utf8,
    /// The value is a string of hex digits
    #[serde(rename = "hex")]
    Hex,
}

impl Encoding {
    /// Wire name of the encoding
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Hex => "hex",
        }
    }

    /// Converts request text into the bytes to write.
    pub fn encode_text(self, text: &str) -> Result<Vec<u8>, DecodeError> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Hex => decode_hex(text),
        }
    }

    /// Renders `bytes` as UTF-8 text when valid, else as lowercase hex, and reports which was used.
    pub fn render(bytes: &[u8]) -> (String, Encoding) {
        match std::str::from_utf8(bytes) {
            Ok(text) => (text.to_owned(), Encoding::Utf8),
            Err(_) => (hex_string(bytes), Encoding::Hex),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase hex rendering with no separators.
pub fn hex_string(bytes: &[u8]) -> String {
    use fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Parses a string of hex digits. A leading `0x` is ignored and odd-length input is left-padded with `0`.
pub fn decode_hex(text: &str) -> Result<Vec<u8>, DecodeError> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidHex);
    }

    let padded;
    let digits = if digits.len() % 2 == 1 {
        padded = format!("0{digits}");
        padded.as_str()
    } else {
        digits
    };

    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or(DecodeError::InvalidHex)
        })
        .collect()
}

/// Renders `bytes` as UTF-8 when valid, else as lowercase hex.
pub fn text_or_hex(bytes: &[u8]) -> String {
    Encoding::render(bytes).0
}
