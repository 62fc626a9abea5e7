//! Primary key values
//!
//! A block's primary-key column is materialized as a slice of [`Key`]s before
//! indexes are built. Keys compare within their own variant; a column is
//! expected to hold a single variant.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single primary-key value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    Int(i64),
    UInt(u64),
    Bytes(Vec<u8>),
}

impl Key {
    const TAG_INT: u8 = 1;
    const TAG_UINT: u8 = 2;
    const TAG_BYTES: u8 = 3;

    /// Stable byte encoding used for hashing into bloom filters.
    ///
    /// Format: tag (1) + big-endian integer or raw bytes
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Key::Int(v) => {
                let mut buf = Vec::with_capacity(9);
                buf.push(Self::TAG_INT);
                buf.extend_from_slice(&v.to_be_bytes());
                buf
            }
            Key::UInt(v) => {
                let mut buf = Vec::with_capacity(9);
                buf.push(Self::TAG_UINT);
                buf.extend_from_slice(&v.to_be_bytes());
                buf
            }
            Key::Bytes(b) => {
                let mut buf = Vec::with_capacity(1 + b.len());
                buf.push(Self::TAG_BYTES);
                buf.extend_from_slice(b);
                buf
            }
        }
    }

    /// Parse a key from its command-line form: `123`, `u:123`, or `s:text`
    pub fn parse(text: &str) -> Key {
        if let Some(rest) = text.strip_prefix("s:") {
            return Key::Bytes(rest.as_bytes().to_vec());
        }
        if let Some(rest) = text.strip_prefix("u:") {
            if let Ok(v) = rest.parse::<u64>() {
                return Key::UInt(v);
            }
        }
        match text.parse::<i64>() {
            Ok(v) => Key::Int(v),
            Err(_) => Key::Bytes(text.as_bytes().to_vec()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{}", v),
            Key::UInt(v) => write!(f, "u:{}", v),
            Key::Bytes(b) => write!(f, "s:{}", String::from_utf8_lossy(b)),
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<u64> for Key {
    fn from(v: u64) -> Self {
        Key::UInt(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Bytes(v.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Key::Bytes(v)
    }
}
