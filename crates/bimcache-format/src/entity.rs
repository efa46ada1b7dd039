//! Columnar entity table.
//!
//! One row per entity, stored as parallel fixed-width columns. Three lookup
//! structures are not persisted and are rebuilt in one pass at load:
//! express id → row, type tag → rows (a bitmap, so rows come back in
//! original order even when types are interleaved), and global id → express id.
//!
//! The legacy type-range table (`type → [first row, last row + 1)`) is still
//! written and read, but lookups never go through it: a range spans foreign
//! rows whenever a type is interleaved with others.

use std::collections::HashMap;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use roaring::RoaringBitmap;

use crate::buffer::{ByteReader, ByteWriter, Column};
use crate::dictionary::{StringDictionary, NULL_INDEX};
use crate::error::{len_u32, CacheError, CacheResult, DecodeError};

/// Position of a type name in the table's type list.
pub type TypeTag = u16;

/// Back-reference value for "none".
pub const NO_REF: u32 = u32::MAX;

pub mod entity_flags {
    pub const HAS_GEOMETRY: u8 = 1 << 0;
    /// Bits that survive a write. Everything else is reserved and zeroed.
    pub const KNOWN: u8 = HAS_GEOMETRY;
}

fn opt_ref(value: u32) -> Option<u32> {
    (value != NO_REF).then_some(value)
}

fn ref_or_none(value: Option<u32>) -> u32 {
    value.unwrap_or(NO_REF)
}

// ============================================================================
// Input and output records
// ============================================================================

/// One entity as handed over by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityRecord {
    pub express_id: u32,
    pub type_name: String,
    pub global_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub object_type: Option<String>,
    pub has_geometry: bool,
    pub contained_in: Option<u32>,
    pub type_object: Option<u32>,
    pub geometry_slot: Option<u32>,
}

impl EntityRecord {
    pub fn new(express_id: u32, type_name: impl Into<String>) -> Self {
        Self {
            express_id,
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn with_global_id(mut self, global_id: impl Into<String>) -> Self {
        self.global_id = Some(global_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_object_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = Some(object_type.into());
        self
    }

    pub fn with_geometry(mut self, slot: Option<u32>) -> Self {
        self.has_geometry = true;
        self.geometry_slot = slot;
        self
    }

    pub fn contained_in(mut self, spatial_id: u32) -> Self {
        self.contained_in = Some(spatial_id);
        self
    }

    pub fn typed_by(mut self, type_object_id: u32) -> Self {
        self.type_object = Some(type_object_id);
        self
    }
}

/// Resolved, borrowed view of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityView<'a> {
    pub express_id: u32,
    pub type_name: &'a str,
    pub global_id: Option<&'a str>,
    pub name: Option<&'a str>,
    pub description: Option<&'a str>,
    pub object_type: Option<&'a str>,
    pub has_geometry: bool,
    pub contained_in: Option<u32>,
    pub type_object: Option<u32>,
    pub geometry_slot: Option<u32>,
}

/// Legacy contiguous-span entry: rows `[start, end)` of one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRange {
    pub type_tag: TypeTag,
    pub start: u32,
    pub end: u32,
}

// ============================================================================
// Table
// ============================================================================

#[derive(Debug, Clone, Default)]
struct EntityColumns {
    express_id: Column<u32>,
    global_id: Column<u32>,
    name: Column<u32>,
    description: Column<u32>,
    object_type: Column<u32>,
    contained_in: Column<u32>,
    type_object: Column<u32>,
    geometry_slot: Column<u32>,
    type_tag: Column<u16>,
    flags: Column<u8>,
}

impl EntityColumns {
    fn u32_columns(&self) -> [(&'static str, &Column<u32>); 8] {
        [
            ("express_id", &self.express_id),
            ("global_id", &self.global_id),
            ("name", &self.name),
            ("description", &self.description),
            ("object_type", &self.object_type),
            ("contained_in", &self.contained_in),
            ("type_object", &self.type_object),
            ("geometry_slot", &self.geometry_slot),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct EntityTable {
    strings: Arc<StringDictionary>,
    cols: EntityColumns,
    /// Dictionary index of each type name; a type tag indexes this list.
    type_names: Vec<u32>,
    legacy_ranges: Vec<TypeRange>,

    // Rebuilt at load
    row_by_id: AHashMap<u32, u32>,
    rows_by_type: Vec<RoaringBitmap>,
    tag_by_name: AHashMap<u32, TypeTag>,
    id_by_global: AHashMap<u32, u32>,
}

impl EntityTable {
    /// Validate raw columns and build the lookup indices in one pass.
    fn from_parts(
        strings: Arc<StringDictionary>,
        cols: EntityColumns,
        type_names: Vec<u32>,
        legacy_ranges: Vec<TypeRange>,
    ) -> Result<Self, DecodeError> {
        let count = cols.express_id.len();
        for (label, col) in cols.u32_columns() {
            if col.len() != count {
                return Err(DecodeError::inconsistent(format!(
                    "{label} column has {} rows, expected {count}",
                    col.len()
                )));
            }
        }
        if cols.type_tag.len() != count || cols.flags.len() != count {
            return Err(DecodeError::inconsistent(format!(
                "type/flag columns have {}/{} rows, expected {count}",
                cols.type_tag.len(),
                cols.flags.len()
            )));
        }

        let mut tag_by_name = AHashMap::with_capacity(type_names.len());
        for (tag, &name) in type_names.iter().enumerate() {
            if strings.get(name).is_none() {
                return Err(DecodeError::inconsistent(format!(
                    "type name {tag} references missing string {name}"
                )));
            }
            tag_by_name.entry(name).or_insert(tag as TypeTag);
        }

        for range in &legacy_ranges {
            if range.type_tag as usize >= type_names.len()
                || range.start > range.end
                || range.end as usize > count
            {
                return Err(DecodeError::inconsistent(format!(
                    "type range {range:?} invalid for {count} rows"
                )));
            }
        }

        let mut row_by_id = AHashMap::with_capacity(count);
        let mut rows_by_type = vec![RoaringBitmap::new(); type_names.len()];
        let mut id_by_global = AHashMap::with_capacity(count);

        for row in 0..count {
            let id = cols.express_id.get(row).unwrap_or(NO_REF);
            if row_by_id.insert(id, row as u32).is_some() {
                return Err(DecodeError::inconsistent(format!(
                    "express id #{id} appears more than once"
                )));
            }

            let tag = cols.type_tag.get(row).unwrap_or(TypeTag::MAX) as usize;
            let bitmap = rows_by_type.get_mut(tag).ok_or_else(|| {
                DecodeError::inconsistent(format!("row {row} has unknown type tag {tag}"))
            })?;
            bitmap.insert(row as u32);

            for col in [&cols.global_id, &cols.name, &cols.description, &cols.object_type] {
                let idx = col.get(row).unwrap_or(NULL_INDEX);
                if !strings.is_valid_ref(idx) {
                    return Err(DecodeError::inconsistent(format!(
                        "row {row} references missing string {idx}"
                    )));
                }
            }

            let global = cols.global_id.get(row).unwrap_or(NULL_INDEX);
            if global != NULL_INDEX {
                id_by_global.insert(global, id);
            }
        }

        Ok(Self {
            strings,
            cols,
            type_names,
            legacy_ranges,
            row_by_id,
            rows_by_type,
            tag_by_name,
            id_by_global,
        })
    }

    pub fn strings(&self) -> &Arc<StringDictionary> {
        &self.strings
    }

    pub fn len(&self) -> usize {
        self.cols.express_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: u32) -> bool {
        self.row_by_id.contains_key(&id)
    }

    /// Row of an express id, O(1).
    pub fn row(&self, id: u32) -> Option<usize> {
        self.row_by_id.get(&id).map(|&r| r as usize)
    }

    /// Express ids in row order.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.cols.express_id.iter()
    }

    fn string_at(&self, col: &Column<u32>, id: u32) -> Option<&str> {
        let idx = col.get(self.row(id)?)?;
        self.strings.get(idx)
    }

    fn ref_at(&self, col: &Column<u32>, id: u32) -> Option<u32> {
        col.get(self.row(id)?).and_then(opt_ref)
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.string_at(&self.cols.name, id)
    }

    pub fn global_id(&self, id: u32) -> Option<&str> {
        self.string_at(&self.cols.global_id, id)
    }

    pub fn description(&self, id: u32) -> Option<&str> {
        self.string_at(&self.cols.description, id)
    }

    pub fn object_type(&self, id: u32) -> Option<&str> {
        self.string_at(&self.cols.object_type, id)
    }

    pub fn type_tag_of(&self, id: u32) -> Option<TypeTag> {
        self.cols.type_tag.get(self.row(id)?)
    }

    pub fn type_name(&self, id: u32) -> Option<&str> {
        self.type_name_for_tag(self.type_tag_of(id)?)
    }

    pub fn type_name_for_tag(&self, tag: TypeTag) -> Option<&str> {
        let idx = *self.type_names.get(tag as usize)?;
        self.strings.get(idx)
    }

    /// Bit 0 of the flag byte. Reserved bits are ignored.
    pub fn has_geometry(&self, id: u32) -> bool {
        self.row(id)
            .and_then(|row| self.cols.flags.get(row))
            .is_some_and(|f| f & entity_flags::HAS_GEOMETRY != 0)
    }

    /// Containing spatial element.
    pub fn contained_in(&self, id: u32) -> Option<u32> {
        self.ref_at(&self.cols.contained_in, id)
    }

    /// Defining type object.
    pub fn type_object(&self, id: u32) -> Option<u32> {
        self.ref_at(&self.cols.type_object, id)
    }

    pub fn geometry_slot(&self, id: u32) -> Option<u32> {
        self.ref_at(&self.cols.geometry_slot, id)
    }

    pub fn entity(&self, id: u32) -> Option<EntityView<'_>> {
        let row = self.row(id)?;
        let string = |col: &Column<u32>| col.get(row).and_then(|idx| self.strings.get(idx));
        let reference = |col: &Column<u32>| col.get(row).and_then(opt_ref);
        Some(EntityView {
            express_id: id,
            type_name: self
                .cols
                .type_tag
                .get(row)
                .and_then(|tag| self.type_name_for_tag(tag))
                .unwrap_or(""),
            global_id: string(&self.cols.global_id),
            name: string(&self.cols.name),
            description: string(&self.cols.description),
            object_type: string(&self.cols.object_type),
            has_geometry: self
                .cols
                .flags
                .get(row)
                .is_some_and(|f| f & entity_flags::HAS_GEOMETRY != 0),
            contained_in: reference(&self.cols.contained_in),
            type_object: reference(&self.cols.type_object),
            geometry_slot: reference(&self.cols.geometry_slot),
        })
    }

    /// Type names in tag order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.type_names
            .iter()
            .map(|&idx| self.strings.get(idx).unwrap_or(""))
    }

    /// Resolve a type name to its tag. Exact match first, then ASCII
    /// case-insensitive (`IfcWall` finds `IFCWALL`).
    pub fn type_tag(&self, name: &str) -> Option<TypeTag> {
        if let Some(tag) = self
            .strings
            .lookup(name)
            .and_then(|idx| self.tag_by_name.get(&idx))
        {
            return Some(*tag);
        }
        self.type_names
            .iter()
            .position(|&idx| {
                self.strings
                    .get(idx)
                    .is_some_and(|s| s.eq_ignore_ascii_case(name))
            })
            .map(|pos| pos as TypeTag)
    }

    fn ids_for_rows<'a>(&'a self, rows: impl Iterator<Item = u32> + 'a) -> Vec<u32> {
        rows.filter_map(|row| self.cols.express_id.get(row as usize))
            .collect()
    }

    /// Express ids of one type, in original row order.
    pub fn by_type(&self, tag: TypeTag) -> Vec<u32> {
        match self.rows_by_type.get(tag as usize) {
            Some(rows) => self.ids_for_rows(rows.iter()),
            None => Vec::new(),
        }
    }

    pub fn by_type_name(&self, name: &str) -> Vec<u32> {
        self.type_tag(name)
            .map(|tag| self.by_type(tag))
            .unwrap_or_default()
    }

    /// Union of several types, in original row order.
    pub fn by_types(&self, names: &[&str]) -> Vec<u32> {
        let mut rows = RoaringBitmap::new();
        for tag in names.iter().filter_map(|n| self.type_tag(n)) {
            if let Some(bitmap) = self.rows_by_type.get(tag as usize) {
                rows |= bitmap;
            }
        }
        self.ids_for_rows(rows.iter())
    }

    pub fn count_of_type(&self, tag: TypeTag) -> usize {
        self.rows_by_type
            .get(tag as usize)
            .map_or(0, |rows| rows.len() as usize)
    }

    /// Express id for a global identifier. When a global id repeats, the
    /// last row carrying it wins.
    pub fn id_for_global_id(&self, global_id: &str) -> Option<u32> {
        let idx = self.strings.lookup(global_id)?;
        self.id_by_global.get(&idx).copied()
    }

    /// Copy of the global id → express id map.
    pub fn global_id_map(&self) -> HashMap<String, u32> {
        self.id_by_global
            .iter()
            .filter_map(|(&idx, &id)| Some((self.strings.get(idx)?.to_owned(), id)))
            .collect()
    }

    /// The persisted type-range table. Informational only.
    pub fn legacy_type_ranges(&self) -> &[TypeRange] {
        &self.legacy_ranges
    }

    // ------------------------------------------------------------------------
    // Codec
    // ------------------------------------------------------------------------

    pub fn encode(&self, w: &mut ByteWriter) -> CacheResult<()> {
        w.write_u32(len_u32(self.len(), "entity rows")?);
        for (_, col) in self.cols.u32_columns() {
            w.write_column(col);
        }
        w.write_column(&self.cols.type_tag);
        let flags: Vec<u8> = self
            .cols
            .flags
            .iter()
            .map(|f| f & entity_flags::KNOWN)
            .collect();
        w.write_array(&flags);
        w.align(4);

        w.write_u16(type_count_u16(self.type_names.len())?);
        w.write_array(&self.type_names);

        w.write_u16(type_count_u16(self.legacy_ranges.len())?);
        for range in &self.legacy_ranges {
            w.write_u16(range.type_tag);
            w.write_u32(range.start);
            w.write_u32(range.end);
        }
        Ok(())
    }

    pub fn decode(
        r: &mut ByteReader,
        strings: Arc<StringDictionary>,
    ) -> Result<Self, DecodeError> {
        let count = r.read_u32()? as usize;
        let cols = EntityColumns {
            express_id: r.read_column(count)?,
            global_id: r.read_column(count)?,
            name: r.read_column(count)?,
            description: r.read_column(count)?,
            object_type: r.read_column(count)?,
            contained_in: r.read_column(count)?,
            type_object: r.read_column(count)?,
            geometry_slot: r.read_column(count)?,
            type_tag: r.read_column(count)?,
            flags: r.read_column(count)?,
        };
        r.align(4)?;

        let type_count = r.read_u16()? as usize;
        let type_names = r.read_column::<u32>(type_count)?.to_vec();

        let range_count = r.read_u16()? as usize;
        let mut legacy_ranges = Vec::with_capacity(range_count);
        for _ in 0..range_count {
            legacy_ranges.push(TypeRange {
                type_tag: r.read_u16()?,
                start: r.read_u32()?,
                end: r.read_u32()?,
            });
        }

        Self::from_parts(strings, cols, type_names, legacy_ranges)
    }
}

fn type_count_u16(len: usize) -> CacheResult<u16> {
    u16::try_from(len).map_err(|_| CacheError::TooLarge {
        what: "entity types",
        value: len,
    })
}

// ============================================================================
// Builder
// ============================================================================

/// Accumulates parser output into columns.
#[derive(Debug, Default)]
pub(crate) struct EntityTableBuilder {
    express_id: Vec<u32>,
    global_id: Vec<u32>,
    name: Vec<u32>,
    description: Vec<u32>,
    object_type: Vec<u32>,
    contained_in: Vec<u32>,
    type_object: Vec<u32>,
    geometry_slot: Vec<u32>,
    type_tag: Vec<u16>,
    flags: Vec<u8>,
    type_names: Vec<u32>,
    tag_by_name: AHashMap<u32, TypeTag>,
    seen: AHashSet<u32>,
}

impl EntityTableBuilder {
    pub(crate) fn push(
        &mut self,
        strings: &mut StringDictionary,
        record: &EntityRecord,
    ) -> CacheResult<()> {
        if self.seen.contains(&record.express_id) {
            return Err(CacheError::DuplicateEntity(record.express_id));
        }

        let type_idx = strings.intern_str(&record.type_name)?;
        let global_id = strings.intern(record.global_id.as_deref())?;
        let name = strings.intern(record.name.as_deref())?;
        let description = strings.intern(record.description.as_deref())?;
        let object_type = strings.intern(record.object_type.as_deref())?;
        let tag = match self.tag_by_name.get(&type_idx) {
            Some(&tag) => tag,
            None => {
                let tag = type_count_u16(self.type_names.len())?;
                if tag == TypeTag::MAX {
                    return Err(CacheError::TooLarge {
                        what: "entity types",
                        value: self.type_names.len() + 1,
                    });
                }
                self.type_names.push(type_idx);
                self.tag_by_name.insert(type_idx, tag);
                tag
            }
        };

        self.seen.insert(record.express_id);
        self.express_id.push(record.express_id);
        self.global_id.push(global_id);
        self.name.push(name);
        self.description.push(description);
        self.object_type.push(object_type);
        self.contained_in.push(ref_or_none(record.contained_in));
        self.type_object.push(ref_or_none(record.type_object));
        self.geometry_slot.push(ref_or_none(record.geometry_slot));
        self.type_tag.push(tag);
        self.flags.push(if record.has_geometry {
            entity_flags::HAS_GEOMETRY
        } else {
            0
        });
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.express_id.len()
    }

    pub(crate) fn finish(self, strings: Arc<StringDictionary>) -> Result<EntityTable, DecodeError> {
        let legacy_ranges = legacy_ranges(&self.type_tag, self.type_names.len());
        let cols = EntityColumns {
            express_id: self.express_id.into(),
            global_id: self.global_id.into(),
            name: self.name.into(),
            description: self.description.into(),
            object_type: self.object_type.into(),
            contained_in: self.contained_in.into(),
            type_object: self.type_object.into(),
            geometry_slot: self.geometry_slot.into(),
            type_tag: self.type_tag.into(),
            flags: self.flags.into(),
        };
        EntityTable::from_parts(strings, cols, self.type_names, legacy_ranges)
    }
}

/// First row and one-past-last row of each type, in tag order.
fn legacy_ranges(tags: &[TypeTag], type_count: usize) -> Vec<TypeRange> {
    let mut spans: Vec<Option<(u32, u32)>> = vec![None; type_count];
    for (row, &tag) in tags.iter().enumerate() {
        let row = row as u32;
        if let Some(span) = spans.get_mut(tag as usize) {
            *span = Some(match *span {
                Some((start, _)) => (start, row + 1),
                None => (row, row + 1),
            });
        }
    }
    spans
        .into_iter()
        .enumerate()
        .filter_map(|(tag, span)| {
            span.map(|(start, end)| TypeRange {
                type_tag: tag as TypeTag,
                start,
                end,
            })
        })
        .collect()
}
