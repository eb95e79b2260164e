//! Blake3 digests and their hex rendering.
//!
//! Every commitment in the ledger (block hash, state root, tokens root,
//! transactions root) is a [`Hash`]. The canonical text form is `0x` followed
//! by 64 lowercase hex digits, which is also the form the proof-of-work target
//! is checked against.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte digest.
pub type H256 = [u8; 32];

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash(pub H256);

impl Hash {
    /// The all-zero digest, used as the parent of the genesis block.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: H256) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &H256 {
        &self.0
    }

    /// Lowercase hex without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 64 hex digits, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let arr: H256 = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }

    /// Number of leading `0` hex digits.
    pub fn leading_zero_digits(&self) -> usize {
        let mut count = 0;
        for byte in self.0 {
            if byte == 0 {
                count += 2;
                continue;
            }
            if byte < 0x10 {
                count += 1;
            }
            break;
        }
        count
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(0x{})", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<H256> for Hash {
    fn from(bytes: H256) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash arbitrary bytes.
pub fn hash(data: &[u8]) -> Hash {
    Hash(blake3::hash(data).into())
}

/// Hash several byte slices as if they were concatenated.
pub fn hash_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

/// Hash the bincode encoding of a value.
///
/// Only used for plain data structs whose encoding cannot fail.
pub fn hash_encoded<T: Serialize>(value: &T) -> Hash {
    let encoded = bincode::serialize(value).expect("serialization should not fail");
    hash(&encoded)
}
