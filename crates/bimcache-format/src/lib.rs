//! BimCache: versioned binary cache for parsed building models
//!
//! A parsed model (entities, property sets, quantity sets, relationships,
//! optionally a nested geometry container) is persisted once and reloaded
//! without re-parsing the source file.
//!
//! Format highlights:
//! 1. **String dictionary**: every string stored once; tables hold `u32` indices
//! 2. **Columnar tables**: parallel fixed-width columns, decoded as zero-copy views
//! 3. **Sections**: header + directory + independently addressable payloads;
//!    unknown section types are skipped by length
//! 4. **Integrity**: xxh3-64 over everything after the header
//! 5. **Rebuilt indices**: id → row and type → rows (Roaring bitmaps) at load;
//!    attribute indices are persisted
//!
//! ## Example
//!
//! ```
//! use bimcache_format::{EntityRecord, ModelCache, QuantityRecord, QuantityType};
//!
//! let mut builder = ModelCache::builder();
//! builder.add_entity(EntityRecord::new(10, "IFCWALL").with_name("Wall-1"))?;
//! builder.add_quantity(QuantityRecord::new(
//!     10,
//!     "Qto_WallBaseQuantities",
//!     "NetVolume",
//!     QuantityType::Volume,
//!     1.5,
//! ));
//! let bytes = builder.finish()?.to_bytes()?;
//!
//! let cache = ModelCache::from_bytes(bytes)?;
//! assert_eq!(cache.entities().by_type_name("IFCWALL"), vec![10]);
//! assert_eq!(cache.quantities().map(|q| q.sum_by_type("NetVolume")), Some(1.5));
//! # Ok::<(), bimcache_format::CacheError>(())
//! ```

pub mod buffer;
pub mod dictionary;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod inverted;
pub mod metadata;
pub mod model;
pub mod property;
pub mod quantity;
pub mod reader;
pub mod relationship;
pub mod section;
pub mod writer;

// Re-export key types
pub use buffer::{ByteReader, ByteWriter, Column};
pub use dictionary::{StringDictionary, ABSENT_INDEX, EMPTY_INDEX, MAX_INDEX, NULL_INDEX};
pub use entity::{EntityRecord, EntityTable, EntityView, TypeRange, TypeTag};
pub use error::{CacheError, CacheResult, DecodeError};
pub use geometry::{GeometryPayload, MeshContainerCodec};
pub use metadata::CacheMetadata;
pub use model::{ModelCache, ModelCacheBuilder};
pub use property::{
    Property, PropertyRecord, PropertySet, PropertyTable, PropertyType, PropertyValue, RecordValue,
};
pub use quantity::{Quantity, QuantityRecord, QuantitySet, QuantityTable, QuantityType};
pub use reader::{CacheReader, LoadReport, LoadedCache, ReadOptions};
pub use relationship::{RelationshipRecord, RelationshipTable, RelationshipType};
pub use section::{SectionKind, FORMAT_VERSION, HEADER_SIZE, MAGIC};
pub use writer::{CacheWriter, WriteOptions};
