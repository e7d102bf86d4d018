//! Fixed-width identifiers used in history keys

use crate::error::{HistoryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width of a [`TopicType`] inside keys
pub const TOPIC_LENGTH: usize = 4;

/// Width of a [`RequestId`] inside keys
pub const REQUEST_ID_LENGTH: usize = 32;

/// Parse `N` bytes from hex, with or without a `0x` prefix
fn parse_hex<const N: usize>(s: &str) -> Result<[u8; N]> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(digits).map_err(|e| HistoryError::InvalidHex(format!("{}: {}", s, e)))?;
    bytes.as_slice().try_into().map_err(|_| HistoryError::InvalidKey {
        expected: N,
        actual: bytes.len(),
    })
}

fn slice_to_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| HistoryError::InvalidKey {
        expected: N,
        actual: bytes.len(),
    })
}

/// Pub/sub topic a history cursor tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TopicType(pub [u8; TOPIC_LENGTH]);

impl TopicType {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        slice_to_array(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; TOPIC_LENGTH]> for TopicType {
    fn from(bytes: [u8; TOPIC_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for TopicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for TopicType {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self> {
        parse_hex(s).map(Self)
    }
}

/// Opaque identifier correlating a mailserver request with its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct RequestId(pub [u8; REQUEST_ID_LENGTH]);

impl RequestId {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        slice_to_array(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True for the unset id of a fresh request
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl From<[u8; REQUEST_ID_LENGTH]> for RequestId {
    fn from(bytes: [u8; REQUEST_ID_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for RequestId {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self> {
        parse_hex(s).map(Self)
    }
}
