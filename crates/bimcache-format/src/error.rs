//! Error taxonomy for cache encode/decode.
//!
//! Fatal kinds (`VersionMismatch`, `CorruptCache`, `MalformedSection`) mean the
//! caller should discard the cache and re-derive the model from source.
//! `UnknownSection` is informational: the section was skipped by length.

use crate::section::SectionKind;
use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

/// Section-local decode failure.
///
/// Produced by [`crate::buffer::ByteReader`] and the per-section decoders; the
/// reader wraps it into [`CacheError::MalformedSection`] together with the
/// section it came from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("read of {requested} bytes at offset {position} overruns buffer of {available} bytes")]
    UnexpectedEof {
        position: usize,
        requested: usize,
        available: usize,
    },

    #[error("invalid UTF-8 in string at offset {position}")]
    InvalidUtf8 { position: usize },

    #[error("{0}")]
    Inconsistent(String),
}

impl DecodeError {
    pub(crate) fn inconsistent(msg: impl Into<String>) -> Self {
        DecodeError::Inconsistent(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("unsupported cache format version {found:#06x} (reader supports major {supported_major})")]
    VersionMismatch { found: u16, supported_major: u8 },

    #[error("corrupt cache: {0}")]
    CorruptCache(String),

    #[error("unknown section type {code:#06x} ({length} bytes) skipped")]
    UnknownSection { code: u16, length: u32 },

    #[error("malformed {section} section: {source}")]
    MalformedSection {
        section: SectionKind,
        #[source]
        source: DecodeError,
    },

    #[error("{what} does not fit the on-disk width ({value})")]
    TooLarge { what: &'static str, value: usize },

    #[error("section type {0:#06x} is reserved for a built-in section")]
    ReservedSection(u16),

    #[error("duplicate express identifier #{0}")]
    DuplicateEntity(u32),

    #[error("geometry payload rejected by mesh codec: {0}")]
    Geometry(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        CacheError::CorruptCache(msg.into())
    }

    pub(crate) fn malformed(section: SectionKind, source: DecodeError) -> Self {
        CacheError::MalformedSection { section, source }
    }

    /// Whether the cache as a whole must be considered unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CacheError::UnknownSection { .. })
    }

    /// Whether the error says something about the cached bytes themselves
    /// (as opposed to I/O or caller input). Callers regenerate on these.
    pub fn is_stale_or_corrupt(&self) -> bool {
        matches!(
            self,
            CacheError::VersionMismatch { .. }
                | CacheError::CorruptCache(_)
                | CacheError::MalformedSection { .. }
        )
    }
}

/// Convert an in-memory length to its `u32` on-disk width.
pub(crate) fn len_u32(len: usize, what: &'static str) -> CacheResult<u32> {
    u32::try_from(len).map_err(|_| CacheError::TooLarge { what, value: len })
}
