//! Persisted inverted indices for the property and quantity tables.
//!
//! Block layout: `size:4`, then `size` times `(key:4, count:4, rows:4*count)`.
//! Keys are listed in first-seen row order and rows ascend within a key.

use ahash::AHashMap;
use roaring::RoaringBitmap;

use crate::buffer::{ByteReader, ByteWriter, Column};
use crate::error::{len_u32, CacheResult, DecodeError};

/// Key → row list, iterable in first-seen key order.
#[derive(Debug, Clone, Default)]
pub struct InvertedIndex {
    keys: Vec<u32>,
    rows: AHashMap<u32, Column<u32>>,
}

impl InvertedIndex {
    /// Build from a key column; row numbers are the column positions.
    pub fn build(keys: impl IntoIterator<Item = u32>) -> Self {
        let mut order = Vec::new();
        let mut lists: AHashMap<u32, Vec<u32>> = AHashMap::new();
        for (row, key) in keys.into_iter().enumerate() {
            lists
                .entry(key)
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(row as u32);
        }
        let rows = lists
            .into_iter()
            .map(|(key, rows)| (key, Column::from_vec(rows)))
            .collect();
        Self { keys: order, rows }
    }

    /// Rows for `key`, ascending. Empty when the key is absent.
    pub fn rows(&self, key: u32) -> impl Iterator<Item = usize> + '_ {
        self.rows
            .get(&key)
            .into_iter()
            .flat_map(|col| col.iter().map(|r| r as usize))
    }

    pub fn contains_key(&self, key: u32) -> bool {
        self.rows.contains_key(&key)
    }

    pub fn row_count(&self, key: u32) -> usize {
        self.rows.get(&key).map_or(0, Column::len)
    }

    /// Keys in first-seen order.
    pub fn keys(&self) -> &[u32] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether every row listed under a key holds that key in `column`.
    pub fn matches_column(&self, column: &Column<u32>) -> bool {
        self.keys
            .iter()
            .all(|&key| self.rows(key).all(|row| column.get(row) == Some(key)))
    }

    pub fn encode(&self, w: &mut ByteWriter) -> CacheResult<()> {
        let empty = Column::default();
        w.write_u32(len_u32(self.keys.len(), "index keys")?);
        for key in &self.keys {
            let rows = self.rows.get(key).unwrap_or(&empty);
            w.write_u32(*key);
            w.write_u32(len_u32(rows.len(), "index rows")?);
            w.write_column(rows);
        }
        Ok(())
    }

    /// Read one block. Row lists stay zero-copy views.
    ///
    /// Every row below `row_count` must be listed exactly once, ascending
    /// within its key, and no key may repeat.
    pub fn decode(r: &mut ByteReader, row_count: usize) -> Result<Self, DecodeError> {
        let size = r.read_u32()? as usize;
        let mut keys = Vec::with_capacity(size.min(row_count));
        let mut rows = AHashMap::with_capacity(size.min(row_count));
        let mut seen = RoaringBitmap::new();
        let mut indexed = 0usize;
        for _ in 0..size {
            let key = r.read_u32()?;
            let count = r.read_u32()? as usize;
            let list: Column<u32> = r.read_column(count)?;
            let mut prev = None;
            for row in list.iter() {
                if row as usize >= row_count {
                    return Err(DecodeError::inconsistent(format!(
                        "index row {row} out of range for {row_count} rows"
                    )));
                }
                if prev.is_some_and(|p| p >= row) {
                    return Err(DecodeError::inconsistent(format!(
                        "index rows for key {key} are not ascending"
                    )));
                }
                if !seen.insert(row) {
                    return Err(DecodeError::inconsistent(format!(
                        "index row {row} listed twice"
                    )));
                }
                prev = Some(row);
            }
            if rows.insert(key, list).is_some() {
                return Err(DecodeError::inconsistent(format!(
                    "index key {key} listed twice"
                )));
            }
            keys.push(key);
            indexed += count;
        }
        if indexed != row_count {
            return Err(DecodeError::inconsistent(format!(
                "index covers {indexed} rows, table has {row_count}"
            )));
        }
        Ok(Self { keys, rows })
    }
}

/// The three indices carried by every attribute table.
#[derive(Debug, Clone, Default)]
pub struct AttributeIndex {
    pub by_entity: InvertedIndex,
    pub by_set: InvertedIndex,
    pub by_item: InvertedIndex,
}

impl AttributeIndex {
    pub fn build(entity: &Column<u32>, set: &Column<u32>, item: &Column<u32>) -> Self {
        Self {
            by_entity: InvertedIndex::build(entity.iter()),
            by_set: InvertedIndex::build(set.iter()),
            by_item: InvertedIndex::build(item.iter()),
        }
    }

    pub fn encode(&self, w: &mut ByteWriter) -> CacheResult<()> {
        self.by_entity.encode(w)?;
        self.by_set.encode(w)?;
        self.by_item.encode(w)
    }

    pub fn decode(r: &mut ByteReader, row_count: usize) -> Result<Self, DecodeError> {
        Ok(Self {
            by_entity: InvertedIndex::decode(r, row_count)?,
            by_set: InvertedIndex::decode(r, row_count)?,
            by_item: InvertedIndex::decode(r, row_count)?,
        })
    }
}

// ============================================================================
// Keyed attribute rows
// ============================================================================

/// The `(entity, set name, item name)` key columns shared by the property
/// and quantity tables, with their persisted indices.
#[derive(Debug, Clone, Default)]
pub struct AttributeKeys {
    pub entity_id: Column<u32>,
    pub set_name: Column<u32>,
    pub item_name: Column<u32>,
    pub index: AttributeIndex,
}

impl AttributeKeys {
    pub fn build(entity_id: Vec<u32>, set_name: Vec<u32>, item_name: Vec<u32>) -> Self {
        let entity_id = Column::from_vec(entity_id);
        let set_name = Column::from_vec(set_name);
        let item_name = Column::from_vec(item_name);
        let index = AttributeIndex::build(&entity_id, &set_name, &item_name);
        Self {
            entity_id,
            set_name,
            item_name,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.entity_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_id.is_empty()
    }

    pub fn write_columns(&self, w: &mut ByteWriter) {
        w.write_column(&self.entity_id);
        w.write_column(&self.set_name);
        w.write_column(&self.item_name);
    }

    pub fn read_columns(
        r: &mut ByteReader,
        count: usize,
    ) -> Result<(Column<u32>, Column<u32>, Column<u32>), DecodeError> {
        Ok((r.read_column(count)?, r.read_column(count)?, r.read_column(count)?))
    }

    /// Pair decoded key columns with their decoded indices. Each index must
    /// agree with the column it was built from.
    pub fn from_parts(
        (entity_id, set_name, item_name): (Column<u32>, Column<u32>, Column<u32>),
        index: AttributeIndex,
    ) -> Result<Self, DecodeError> {
        let checks = [
            ("entity", &index.by_entity, &entity_id),
            ("set name", &index.by_set, &set_name),
            ("item name", &index.by_item, &item_name),
        ];
        for (what, idx, column) in checks {
            if !idx.matches_column(column) {
                return Err(DecodeError::inconsistent(format!(
                    "{what} index disagrees with the {what} column"
                )));
            }
        }
        Ok(Self {
            entity_id,
            set_name,
            item_name,
            index,
        })
    }

    /// An entity's rows grouped by set name. Sets appear in first-seen
    /// order and rows stay ascending inside each set.
    pub fn group_by_set(&self, entity: u32) -> Vec<(u32, Vec<usize>)> {
        let mut groups: Vec<(u32, Vec<usize>)> = Vec::new();
        let mut slot: AHashMap<u32, usize> = AHashMap::new();
        for row in self.index.by_entity.rows(entity) {
            let Some(set) = self.set_name.get(row) else {
                continue;
            };
            let pos = *slot.entry(set).or_insert_with(|| {
                groups.push((set, Vec::new()));
                groups.len() - 1
            });
            groups[pos].1.push(row);
        }
        groups
    }

    /// Linear scan over one entity's rows.
    pub fn find(&self, entity: u32, set: u32, item: u32) -> Option<usize> {
        self.index.by_entity.rows(entity).find(|&row| {
            self.set_name.get(row) == Some(set) && self.item_name.get(row) == Some(item)
        })
    }

    /// Distinct entities carrying `item`, in first-seen order.
    pub fn entities_with_item(&self, item: u32) -> Vec<u32> {
        let mut seen = ahash::AHashSet::new();
        self.index
            .by_item
            .rows(item)
            .filter_map(|row| self.entity_id.get(row))
            .filter(|id| seen.insert(*id))
            .collect()
    }
}
