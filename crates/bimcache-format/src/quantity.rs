//! Quantity table (element quantity sets).
//!
//! Columns: `entity_id`, `set_name`, `item_name` (u32), `quantity_type` (u8),
//! align 8, `value` (f64), `unit`, `formula` (u32 dictionary indices), then
//! the by-entity, by-set and by-item index blocks.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::buffer::{ByteReader, ByteWriter, Column};
use crate::dictionary::StringDictionary;
use crate::error::{len_u32, CacheResult, DecodeError};
use crate::inverted::{AttributeIndex, AttributeKeys};

#[derive(Debug, Clone, Copy)]
pub enum QuantityType {
    Length,
    Area,
    Volume,
    Count,
    Weight,
    Time,
    /// A code with no named variant, e.g. written by a newer producer.
    Other(u8),
}

impl QuantityType {
    pub fn code(self) -> u8 {
        match self {
            QuantityType::Length => 0,
            QuantityType::Area => 1,
            QuantityType::Volume => 2,
            QuantityType::Count => 3,
            QuantityType::Weight => 4,
            QuantityType::Time => 5,
            QuantityType::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => QuantityType::Length,
            1 => QuantityType::Area,
            2 => QuantityType::Volume,
            3 => QuantityType::Count,
            4 => QuantityType::Weight,
            5 => QuantityType::Time,
            other => QuantityType::Other(other),
        }
    }

    /// Map `Other` holding a named code onto its named variant.
    pub fn normalized(self) -> Self {
        Self::from_code(self.code())
    }

    /// Map an `IFCQUANTITY*` entity type name, ignoring ASCII case.
    pub fn from_ifc_type(type_name: &str) -> Option<Self> {
        const TABLE: [(&str, QuantityType); 6] = [
            ("IFCQUANTITYLENGTH", QuantityType::Length),
            ("IFCQUANTITYAREA", QuantityType::Area),
            ("IFCQUANTITYVOLUME", QuantityType::Volume),
            ("IFCQUANTITYCOUNT", QuantityType::Count),
            ("IFCQUANTITYWEIGHT", QuantityType::Weight),
            ("IFCQUANTITYTIME", QuantityType::Time),
        ];
        TABLE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(type_name))
            .map(|(_, ty)| *ty)
    }
}

/// Equality follows the wire code, so `Other(c)` equals the variant named by `c`.
impl PartialEq for QuantityType {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for QuantityType {}

impl Hash for QuantityType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code().hash(state);
    }
}

impl fmt::Display for QuantityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.normalized() {
            QuantityType::Length => f.write_str("length"),
            QuantityType::Area => f.write_str("area"),
            QuantityType::Volume => f.write_str("volume"),
            QuantityType::Count => f.write_str("count"),
            QuantityType::Weight => f.write_str("weight"),
            QuantityType::Time => f.write_str("time"),
            QuantityType::Other(code) => write!(f, "type#{code}"),
        }
    }
}

/// One quantity row as handed over by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityRecord {
    pub entity_id: u32,
    pub set_name: String,
    pub name: String,
    pub quantity_type: QuantityType,
    pub value: f64,
    pub unit: Option<String>,
    pub formula: Option<String>,
}

impl QuantityRecord {
    pub fn new(
        entity_id: u32,
        set_name: impl Into<String>,
        name: impl Into<String>,
        quantity_type: QuantityType,
        value: f64,
    ) -> Self {
        Self {
            entity_id,
            set_name: set_name.into(),
            name: name.into(),
            quantity_type: quantity_type.normalized(),
            value,
            unit: None,
            formula: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity<'a> {
    pub name: &'a str,
    pub quantity_type: QuantityType,
    pub value: f64,
    pub unit: Option<&'a str>,
    pub formula: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantitySet<'a> {
    pub name: &'a str,
    pub quantities: Vec<Quantity<'a>>,
}

#[derive(Debug, Clone)]
pub struct QuantityTable {
    strings: Arc<StringDictionary>,
    keys: AttributeKeys,
    quantity_type: Column<u8>,
    value: Column<f64>,
    unit: Column<u32>,
    formula: Column<u32>,
}

impl QuantityTable {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn quantity_at(&self, row: usize) -> Option<Quantity<'_>> {
        Some(Quantity {
            name: self.strings.get(self.keys.item_name.get(row)?).unwrap_or(""),
            quantity_type: QuantityType::from_code(self.quantity_type.get(row)?),
            value: self.value.get(row)?,
            unit: self.unit.get(row).and_then(|i| self.strings.get(i)),
            formula: self.formula.get(row).and_then(|i| self.strings.get(i)),
        })
    }

    /// All quantity sets of one entity, in first-seen order.
    pub fn for_entity(&self, entity: u32) -> Vec<QuantitySet<'_>> {
        self.keys
            .group_by_set(entity)
            .into_iter()
            .map(|(set, rows)| QuantitySet {
                name: self.strings.get(set).unwrap_or(""),
                quantities: rows
                    .into_iter()
                    .filter_map(|row| self.quantity_at(row))
                    .collect(),
            })
            .collect()
    }

    pub fn has_quantities(&self, entity: u32) -> bool {
        self.keys.index.by_entity.contains_key(entity)
    }

    pub fn quantity(&self, entity: u32, set: &str, name: &str) -> Option<Quantity<'_>> {
        let set = self.strings.lookup(set)?;
        let item = self.strings.lookup(name)?;
        self.quantity_at(self.keys.find(entity, set, item)?)
    }

    pub fn value(&self, entity: u32, set: &str, name: &str) -> Option<f64> {
        self.quantity(entity, set, name).map(|q| q.value)
    }

    /// Sum of every quantity named `name` across the model. Zero when the
    /// name never occurs.
    pub fn sum_by_type(&self, name: &str) -> f64 {
        let Some(item) = self.strings.lookup(name) else {
            return 0.0;
        };
        self.keys
            .index
            .by_item
            .rows(item)
            .filter_map(|row| self.value.get(row))
            .sum()
    }

    /// `(entity, value)` for every quantity named `name`, in row order.
    pub fn values_by_name(&self, name: &str) -> Vec<(u32, f64)> {
        let Some(item) = self.strings.lookup(name) else {
            return Vec::new();
        };
        self.keys
            .index
            .by_item
            .rows(item)
            .filter_map(|row| Some((self.keys.entity_id.get(row)?, self.value.get(row)?)))
            .collect()
    }

    /// Distinct quantity set names, in first-seen order.
    pub fn set_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.keys
            .index
            .by_set
            .keys()
            .iter()
            .filter_map(|&idx| self.strings.get(idx))
    }

    pub fn encode(&self, w: &mut ByteWriter) -> CacheResult<()> {
        w.write_u32(len_u32(self.len(), "quantity rows")?);
        self.keys.write_columns(w);
        w.write_column(&self.quantity_type);
        w.align(8);
        w.write_column(&self.value);
        w.write_column(&self.unit);
        w.write_column(&self.formula);
        self.keys.index.encode(w)
    }

    pub fn decode(
        r: &mut ByteReader,
        strings: Arc<StringDictionary>,
    ) -> Result<Self, DecodeError> {
        let count = r.read_u32()? as usize;
        let key_columns = AttributeKeys::read_columns(r, count)?;
        let quantity_type = r.read_column(count)?;
        r.align(8)?;
        let value = r.read_column(count)?;
        let unit = r.read_column(count)?;
        let formula = r.read_column(count)?;
        let index = AttributeIndex::decode(r, count)?;
        Ok(Self {
            strings,
            keys: AttributeKeys::from_parts(key_columns, index)?,
            quantity_type,
            value,
            unit,
            formula,
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct QuantityTableBuilder {
    entity_id: Vec<u32>,
    set_name: Vec<u32>,
    item_name: Vec<u32>,
    quantity_type: Vec<u8>,
    value: Vec<f64>,
    unit: Vec<u32>,
    formula: Vec<u32>,
}

impl QuantityTableBuilder {
    pub(crate) fn push(
        &mut self,
        strings: &mut StringDictionary,
        record: &QuantityRecord,
    ) -> CacheResult<()> {
        let set_name = strings.intern_str(&record.set_name)?;
        let item_name = strings.intern_str(&record.name)?;
        let unit = strings.intern(record.unit.as_deref())?;
        let formula = strings.intern(record.formula.as_deref())?;

        self.entity_id.push(record.entity_id);
        self.set_name.push(set_name);
        self.item_name.push(item_name);
        self.quantity_type.push(record.quantity_type.code());
        self.value.push(record.value);
        self.unit.push(unit);
        self.formula.push(formula);
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entity_id.is_empty()
    }

    pub(crate) fn finish(self, strings: Arc<StringDictionary>) -> QuantityTable {
        QuantityTable {
            strings,
            keys: AttributeKeys::build(self.entity_id, self.set_name, self.item_name),
            quantity_type: self.quantity_type.into(),
            value: self.value.into(),
            unit: self.unit.into(),
            formula: self.formula.into(),
        }
    }
}
