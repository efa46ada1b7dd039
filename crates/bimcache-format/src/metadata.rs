//! Metadata section: provenance of a cache file.

use chrono::{DateTime, SubsecRound, TimeZone, Utc};

use crate::buffer::{ByteReader, ByteWriter};
use crate::error::{CacheResult, DecodeError};

/// Identifier written into every cache produced by this crate.
pub const WRITER_ID: &str = concat!("bimcache-format/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetadata {
    /// Schema of the source model, e.g. `IFC4`.
    pub schema: String,
    pub source_name: Option<String>,
    /// Content key of the source file.
    pub source_key: Option<String>,
    pub source_size: u64,
    /// Millisecond precision.
    pub created_at: DateTime<Utc>,
    pub writer: String,
}

impl CacheMetadata {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            source_name: None,
            source_key: None,
            source_size: 0,
            created_at: Utc::now().trunc_subsecs(3),
            writer: WRITER_ID.to_string(),
        }
    }

    pub fn with_source(
        mut self,
        name: impl Into<String>,
        key: impl Into<String>,
        size: u64,
    ) -> Self {
        self.source_name = Some(name.into());
        self.source_key = Some(key.into());
        self.source_size = size;
        self
    }

    pub fn encode(&self, w: &mut ByteWriter) -> CacheResult<()> {
        w.write_str(&self.schema)?;
        write_opt_str(w, self.source_name.as_deref())?;
        write_opt_str(w, self.source_key.as_deref())?;
        w.write_u64(self.source_size);
        w.write_i64(self.created_at.timestamp_millis());
        w.write_str(&self.writer)
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self, DecodeError> {
        let schema = r.read_str()?;
        let source_name = read_opt_str(r)?;
        let source_key = read_opt_str(r)?;
        let source_size = r.read_u64()?;
        let millis = r.read_i64()?;
        let created_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| DecodeError::inconsistent(format!("invalid timestamp {millis}")))?;
        let writer = r.read_str()?;
        Ok(Self {
            schema,
            source_name,
            source_key,
            source_size,
            created_at,
            writer,
        })
    }
}

fn write_opt_str(w: &mut ByteWriter, value: Option<&str>) -> CacheResult<()> {
    match value {
        Some(s) => {
            w.write_u8(1);
            w.write_str(s)
        }
        None => {
            w.write_u8(0);
            Ok(())
        }
    }
}

fn read_opt_str(r: &mut ByteReader) -> Result<Option<String>, DecodeError> {
    match r.read_u8()? {
        0 => Ok(None),
        1 => r.read_str().map(Some),
        other => Err(DecodeError::inconsistent(format!(
            "invalid optional-string marker {other}"
        ))),
    }
}
