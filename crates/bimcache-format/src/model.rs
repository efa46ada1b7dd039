//! The in-memory model snapshot and its builder.

use std::sync::Arc;

use bytes::Bytes;

use crate::dictionary::StringDictionary;
use crate::entity::{EntityRecord, EntityTable, EntityTableBuilder};
use crate::error::{CacheError, CacheResult};
use crate::geometry::GeometryPayload;
use crate::metadata::CacheMetadata;
use crate::property::{PropertyRecord, PropertyTable, PropertyTableBuilder};
use crate::quantity::{QuantityRecord, QuantityTable, QuantityTableBuilder};
use crate::reader::{CacheReader, ReadOptions};
use crate::relationship::{RelationshipRecord, RelationshipTable, RelationshipTableBuilder};
use crate::section::SectionKind;
use crate::writer::{CacheWriter, WriteOptions};

/// Immutable model snapshot: one dictionary and the tables that index it.
///
/// Cloning is cheap for loaded caches (columns share the input buffer) and
/// all accessors take `&self`, so a snapshot can be shared across threads.
#[derive(Debug, Clone)]
pub struct ModelCache {
    strings: Arc<StringDictionary>,
    entities: EntityTable,
    properties: Option<PropertyTable>,
    quantities: Option<QuantityTable>,
    relationships: Option<RelationshipTable>,
    geometry: Option<GeometryPayload>,
    metadata: Option<CacheMetadata>,
}

impl ModelCache {
    pub(crate) fn from_parts(
        strings: Arc<StringDictionary>,
        entities: EntityTable,
        properties: Option<PropertyTable>,
        quantities: Option<QuantityTable>,
        relationships: Option<RelationshipTable>,
        geometry: Option<GeometryPayload>,
        metadata: Option<CacheMetadata>,
    ) -> Self {
        Self {
            strings,
            entities,
            properties,
            quantities,
            relationships,
            geometry,
            metadata,
        }
    }

    pub fn builder() -> ModelCacheBuilder {
        ModelCacheBuilder::new()
    }

    pub fn strings(&self) -> &StringDictionary {
        &self.strings
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    pub fn properties(&self) -> Option<&PropertyTable> {
        self.properties.as_ref()
    }

    pub fn quantities(&self) -> Option<&QuantityTable> {
        self.quantities.as_ref()
    }

    pub fn relationships(&self) -> Option<&RelationshipTable> {
        self.relationships.as_ref()
    }

    pub fn geometry(&self) -> Option<&GeometryPayload> {
        self.geometry.as_ref()
    }

    pub fn metadata(&self) -> Option<&CacheMetadata> {
        self.metadata.as_ref()
    }

    /// Replace the metadata section, e.g. to stamp the source key before a save.
    pub fn set_metadata(&mut self, metadata: CacheMetadata) {
        self.metadata = Some(metadata);
    }

    /// Encode with default [`WriteOptions`].
    pub fn to_bytes(&self) -> CacheResult<Vec<u8>> {
        CacheWriter::new(WriteOptions::default()).write(self)
    }

    /// Decode with default [`ReadOptions`], discarding the load report.
    pub fn from_bytes(buf: impl Into<Bytes>) -> CacheResult<Self> {
        Ok(CacheReader::new(ReadOptions::default()).read(buf)?.cache)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects parser output and freezes it into a [`ModelCache`].
///
/// Tables built here go through the same validation and index construction
/// as tables decoded from bytes. Errors from the chaining `add_*` methods are
/// held back and returned by [`ModelCacheBuilder::finish`].
#[derive(Debug, Default)]
pub struct ModelCacheBuilder {
    error: Option<CacheError>,
    strings: StringDictionary,
    entities: EntityTableBuilder,
    properties: PropertyTableBuilder,
    quantities: QuantityTableBuilder,
    relationships: RelationshipTableBuilder,
    geometry: Option<GeometryPayload>,
    metadata: Option<CacheMetadata>,
}

impl ModelCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with [`CacheError::DuplicateEntity`] if the express id was
    /// already added.
    pub fn add_entity(&mut self, record: EntityRecord) -> CacheResult<&mut Self> {
        self.entities.push(&mut self.strings, &record)?;
        Ok(self)
    }

    pub fn add_property(&mut self, record: PropertyRecord) -> &mut Self {
        let result = self.properties.push(&mut self.strings, &record);
        self.keep_first_error(result)
    }

    pub fn add_quantity(&mut self, record: QuantityRecord) -> &mut Self {
        let result = self.quantities.push(&mut self.strings, &record);
        self.keep_first_error(result)
    }

    fn keep_first_error(&mut self, result: CacheResult<()>) -> &mut Self {
        if let Err(err) = result {
            self.error.get_or_insert(err);
        }
        self
    }

    pub fn add_relationship(&mut self, record: RelationshipRecord) -> &mut Self {
        self.relationships.push(&record);
        self
    }

    pub fn geometry(&mut self, payload: GeometryPayload) -> &mut Self {
        self.geometry = Some(payload);
        self
    }

    pub fn metadata(&mut self, metadata: CacheMetadata) -> &mut Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Intern a string ahead of the tables, e.g. to pin a stable index.
    pub fn intern(&mut self, s: Option<&str>) -> CacheResult<u32> {
        self.strings.intern(s)
    }

    pub fn finish(self) -> CacheResult<ModelCache> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let strings = Arc::new(self.strings);
        let entities = self
            .entities
            .finish(strings.clone())
            .map_err(|e| CacheError::malformed(SectionKind::Entities, e))?;
        let properties =
            (!self.properties.is_empty()).then(|| self.properties.finish(strings.clone()));
        let quantities =
            (!self.quantities.is_empty()).then(|| self.quantities.finish(strings.clone()));
        let relationships = if self.relationships.is_empty() {
            None
        } else {
            Some(
                self.relationships
                    .finish()
                    .map_err(|e| CacheError::malformed(SectionKind::Relationships, e))?,
            )
        };

        Ok(ModelCache::from_parts(
            strings,
            entities,
            properties,
            quantities,
            relationships,
            self.geometry,
            self.metadata,
        ))
    }
}
