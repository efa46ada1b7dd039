//! Content-derived cache keys.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

const KEY_LEN: usize = 64;

/// Lowercase hex SHA-256 of the source file bytes.
///
/// Any edit to the source yields a new key, so a stale cache is never
/// found under the new key; it just ages out through pruning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_source(source: &[u8]) -> Self {
        let digest = Sha256::digest(source);
        let mut hex = String::with_capacity(KEY_LEN);
        for byte in digest {
            let _ = write!(&mut hex, "{:02x}", byte);
        }
        CacheKey(hex)
    }

    /// Accept an externally stored key; must be 64 lowercase hex digits.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        let valid = s.len() == KEY_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(CacheKey(s.to_string()))
        } else {
            Err(StoreError::InvalidKey(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn file_name(&self) -> String {
        format!("{}.{}", self.0, crate::CACHE_EXTENSION)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CacheKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheKey::parse(s)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        CacheKey::parse(&s)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}
