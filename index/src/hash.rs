//! # Block Hashes
//!
//! A block hash is 32 opaque bytes. The index never computes one and never
//! checks one; it only stores, compares and prints them. That keeps this
//! type small: a `Copy` newtype with hex formatting and serde support so
//! snapshots stay readable in logs and JSON.
//!
//! Hex is rendered in stored byte order. Callers that want the reversed
//! display convention some chains use should reverse the bytes before
//! constructing the hash.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::HashParseError;

/// Length of a block hash in bytes.
pub const HASH_LENGTH: usize = 32;

/// Height of the first block in any chain.
pub const GENESIS_HEIGHT: u64 = 0;

/// A 256-bit block identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockHash([u8; HASH_LENGTH]);

impl BlockHash {
    /// The all-zero hash. A freshly created index reports this as its tip.
    pub const ZERO: BlockHash = BlockHash([0u8; HASH_LENGTH]);

    /// Wraps raw hash bytes.
    pub const fn from_bytes(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Returns `true` for [`BlockHash::ZERO`].
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }

    /// Lowercase hex encoding, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; HASH_LENGTH]> for BlockHash {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for BlockHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::LowerHex for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(self, f)
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({:x})", self)
    }
}

impl FromStr for BlockHash {
    type Err = HashParseError;

    /// Parses exactly 64 hex characters, upper or lower case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_LENGTH * 2 {
            return Err(HashParseError::InvalidLength {
                expected: HASH_LENGTH * 2,
                got: s.len(),
            });
        }
        let mut bytes = [0u8; HASH_LENGTH];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
