//! Text encodings applied when reading and writing through a handle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Encoding used to turn file bytes into text and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    /// Strict UTF-8; invalid sequences are an error.
    #[default]
    Utf8,
    /// UTF-8 with invalid sequences replaced by U+FFFD.
    Utf8Lossy,
    /// ISO-8859-1, one byte per char.
    Latin1,
}

impl Encoding {
    /// Canonical name of the encoding.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Utf8Lossy => "utf8-lossy",
            Encoding::Latin1 => "latin1",
        }
    }

    /// Decode raw file content. Returns `None` if the bytes are invalid.
    pub fn decode(self, bytes: Vec<u8>) -> Option<String> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes).ok(),
            Encoding::Utf8Lossy => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Encoding::Latin1 => Some(bytes.into_iter().map(char::from).collect()),
        }
    }

    /// Encode text for writing. Returns `None` if a char cannot be represented.
    pub fn encode(self, text: String) -> Option<Vec<u8>> {
        match self {
            Encoding::Utf8 | Encoding::Utf8Lossy => Some(text.into_bytes()),
            Encoding::Latin1 => text.chars().map(|c| u8::try_from(c).ok()).collect(),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown encoding name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown encoding: {0}")]
pub struct UnknownEncoding(pub String);

impl FromStr for Encoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "utf8-lossy" => Ok(Encoding::Utf8Lossy),
            "latin1" => Ok(Encoding::Latin1),
            _ => Err(UnknownEncoding(s.to_string())),
        }
    }
}
