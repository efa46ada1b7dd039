//! Cache reader.
//!
//! Order of checks: magic and major version, declared length, checksum,
//! directory bounds. Then the dictionary is decoded and shared with every
//! other section decoder. Each section is read from its own slice of the
//! input, so a section can be skipped without touching its bytes.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::buffer::ByteReader;
use crate::dictionary::StringDictionary;
use crate::entity::EntityTable;
use crate::error::{CacheError, CacheResult, DecodeError};
use crate::geometry::GeometryPayload;
use crate::metadata::CacheMetadata;
use crate::model::ModelCache;
use crate::property::PropertyTable;
use crate::quantity::QuantityTable;
use crate::relationship::RelationshipTable;
use crate::section::{verify_checksum, Directory, Header, SectionEntry, SectionKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    /// Compare the stored xxh3 checksum against the payload.
    pub verify_checksum: bool,
    /// Leave the geometry section undecoded even when present.
    pub skip_geometry: bool,
    /// Fail on a malformed optional section instead of reporting and
    /// dropping it. Strings and entities are always required.
    pub strict: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksum: true,
            skip_geometry: false,
            strict: true,
        }
    }
}

/// Non-fatal findings from a load.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Skipped unknown sections and, in lenient mode, dropped optional
    /// sections.
    pub issues: Vec<CacheError>,
    /// Sections present but not decoded on request.
    pub skipped: Vec<SectionKind>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Codes of unknown sections that were skipped.
    pub fn unknown_sections(&self) -> impl Iterator<Item = u16> + '_ {
        self.issues.iter().filter_map(|e| match e {
            CacheError::UnknownSection { code, .. } => Some(*code),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub struct LoadedCache {
    pub cache: ModelCache,
    pub header: Header,
    pub report: LoadReport,
}

#[derive(Debug, Clone, Default)]
pub struct CacheReader {
    options: ReadOptions,
}

impl CacheReader {
    pub fn new(options: ReadOptions) -> Self {
        Self { options }
    }

    /// Validate the header and directory without decoding any section.
    pub fn inspect(buf: &[u8], verify: bool) -> CacheResult<(Header, Directory)> {
        let header = Header::decode(buf)?;
        if verify {
            verify_checksum(&header, buf)?;
        }
        let directory = Directory::decode(buf)?;
        let mut seen = Vec::new();
        for kind in directory.entries.iter().filter_map(SectionEntry::kind) {
            if seen.contains(&kind) {
                return Err(CacheError::corrupt(format!("duplicate {kind} section")));
            }
            seen.push(kind);
        }
        Ok((header, directory))
    }

    pub fn read(&self, buf: impl Into<Bytes>) -> CacheResult<LoadedCache> {
        let buf: Bytes = buf.into();
        let (header, directory) = Self::inspect(&buf, self.options.verify_checksum)?;
        let mut report = LoadReport::default();

        for entry in directory.entries.iter().filter(|e| e.kind().is_none()) {
            warn!(
                code = entry.code,
                length = entry.length,
                "skipping unknown cache section"
            );
            report.issues.push(CacheError::UnknownSection {
                code: entry.code,
                length: entry.length,
            });
        }

        let strings = Arc::new(self.required(
            &buf,
            &directory,
            SectionKind::Strings,
            StringDictionary::decode,
        )?);
        let entities = self.required(&buf, &directory, SectionKind::Entities, |r| {
            EntityTable::decode(r, strings.clone())
        })?;

        let properties = self.optional(&buf, &directory, &mut report, SectionKind::Properties, |r| {
            PropertyTable::decode(r, strings.clone())
        })?;
        let quantities = self.optional(&buf, &directory, &mut report, SectionKind::Quantities, |r| {
            QuantityTable::decode(r, strings.clone())
        })?;
        let relationships = self.optional(
            &buf,
            &directory,
            &mut report,
            SectionKind::Relationships,
            RelationshipTable::decode,
        )?;
        let geometry = if self.options.skip_geometry {
            if directory.find(SectionKind::Geometry).is_some() {
                report.skipped.push(SectionKind::Geometry);
            }
            None
        } else {
            self.optional(
                &buf,
                &directory,
                &mut report,
                SectionKind::Geometry,
                GeometryPayload::decode,
            )?
        };
        let metadata = self.optional(
            &buf,
            &directory,
            &mut report,
            SectionKind::Metadata,
            CacheMetadata::decode,
        )?;

        info!(
            bytes = buf.len(),
            version = header.version,
            entities = entities.len(),
            strings = strings.len(),
            issues = report.issues.len(),
            "cache decoded"
        );

        let cache = ModelCache::from_parts(
            strings,
            entities,
            properties,
            quantities,
            relationships,
            geometry,
            metadata,
        );
        Ok(LoadedCache {
            cache,
            header,
            report,
        })
    }

    fn decode_section<T>(
        buf: &Bytes,
        entry: &SectionEntry,
        kind: SectionKind,
        decode: impl FnOnce(&mut ByteReader) -> Result<T, DecodeError>,
    ) -> CacheResult<T> {
        let mut reader = ByteReader::new(buf.slice(entry.range()));
        let value = decode(&mut reader).map_err(|e| CacheError::malformed(kind, e))?;
        debug!(
            section = %kind,
            offset = entry.offset,
            length = entry.length,
            "decoded section"
        );
        Ok(value)
    }

    fn required<T>(
        &self,
        buf: &Bytes,
        directory: &Directory,
        kind: SectionKind,
        decode: impl FnOnce(&mut ByteReader) -> Result<T, DecodeError>,
    ) -> CacheResult<T> {
        let entry = directory
            .find(kind)
            .ok_or_else(|| CacheError::corrupt(format!("missing {kind} section")))?;
        Self::decode_section(buf, entry, kind, decode)
    }

    fn optional<T>(
        &self,
        buf: &Bytes,
        directory: &Directory,
        report: &mut LoadReport,
        kind: SectionKind,
        decode: impl FnOnce(&mut ByteReader) -> Result<T, DecodeError>,
    ) -> CacheResult<Option<T>> {
        let Some(entry) = directory.find(kind) else {
            return Ok(None);
        };
        match Self::decode_section(buf, entry, kind, decode) {
            Ok(value) => Ok(Some(value)),
            Err(err) if !self.options.strict => {
                warn!(section = %kind, error = %err, "dropping malformed optional section");
                report.issues.push(err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
