//! Property table (property sets).
//!
//! Same keying and index blocks as the quantity table. Each row carries both
//! a numeric slot and a dictionary slot; the property type says which one
//! holds the value.
//!
//! | value  | `value_num` | `value_str`      |
//! |--------|-------------|------------------|
//! | number | the value   | `NULL_INDEX`     |
//! | text   | `0.0`       | dictionary index |
//! | absent | `NaN`       | `ABSENT_INDEX`   |

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::buffer::{ByteReader, ByteWriter, Column};
use crate::dictionary::{StringDictionary, ABSENT_INDEX, NULL_INDEX};
use crate::error::{len_u32, CacheResult, DecodeError};
use crate::inverted::{AttributeIndex, AttributeKeys};

#[derive(Debug, Clone, Copy)]
pub enum PropertyType {
    String,
    Real,
    Integer,
    Boolean,
    Logical,
    Label,
    Identifier,
    Text,
    Enum,
    Reference,
    List,
    /// A code with no named variant.
    Other(u8),
}

impl PropertyType {
    pub fn code(self) -> u8 {
        match self {
            PropertyType::String => 0,
            PropertyType::Real => 1,
            PropertyType::Integer => 2,
            PropertyType::Boolean => 3,
            PropertyType::Logical => 4,
            PropertyType::Label => 5,
            PropertyType::Identifier => 6,
            PropertyType::Text => 7,
            PropertyType::Enum => 8,
            PropertyType::Reference => 9,
            PropertyType::List => 10,
            PropertyType::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => PropertyType::String,
            1 => PropertyType::Real,
            2 => PropertyType::Integer,
            3 => PropertyType::Boolean,
            4 => PropertyType::Logical,
            5 => PropertyType::Label,
            6 => PropertyType::Identifier,
            7 => PropertyType::Text,
            8 => PropertyType::Enum,
            9 => PropertyType::Reference,
            10 => PropertyType::List,
            other => PropertyType::Other(other),
        }
    }

    /// Map `Other` holding a named code onto its named variant.
    pub fn normalized(self) -> Self {
        Self::from_code(self.code())
    }

    /// Whether the value lives in the dictionary slot.
    pub fn is_textual(self) -> bool {
        matches!(
            self.normalized(),
            PropertyType::String
                | PropertyType::Label
                | PropertyType::Identifier
                | PropertyType::Text
                | PropertyType::Enum
                | PropertyType::List
        )
    }
}

/// Equality follows the wire code, so `Other(c)` equals the variant named by `c`.
impl PartialEq for PropertyType {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for PropertyType {}

impl Hash for PropertyType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code().hash(state);
    }
}

/// Decoded property value. Text borrows the dictionary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue<'a> {
    Text(&'a str),
    Real(f64),
    Integer(i64),
    Boolean(bool),
    /// IFC LOGICAL; `None` is UNKNOWN.
    Logical(Option<bool>),
    /// Express id of a referenced entity.
    Reference(u32),
    Null,
}

impl<'a> PropertyValue<'a> {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            PropertyValue::Real(v) => Some(v),
            PropertyValue::Integer(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match *self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }
}

impl fmt::Display for PropertyValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Text(s) => f.write_str(s),
            PropertyValue::Real(v) => write!(f, "{v}"),
            PropertyValue::Integer(v) => write!(f, "{v}"),
            PropertyValue::Boolean(true) | PropertyValue::Logical(Some(true)) => f.write_str("TRUE"),
            PropertyValue::Boolean(false) | PropertyValue::Logical(Some(false)) => {
                f.write_str("FALSE")
            }
            PropertyValue::Logical(None) => f.write_str("UNKNOWN"),
            PropertyValue::Reference(id) => write!(f, "#{id}"),
            PropertyValue::Null => Ok(()),
        }
    }
}

/// Owned value slot of a [`PropertyRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Number(f64),
    Text(String),
    Absent,
}

/// One property row as handed over by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRecord {
    pub entity_id: u32,
    pub set_name: String,
    pub name: String,
    pub property_type: PropertyType,
    pub value: RecordValue,
    pub unit: Option<String>,
}

impl PropertyRecord {
    fn with_value(
        entity_id: u32,
        set_name: impl Into<String>,
        name: impl Into<String>,
        property_type: PropertyType,
        value: RecordValue,
    ) -> Self {
        Self {
            entity_id,
            set_name: set_name.into(),
            name: name.into(),
            property_type: property_type.normalized(),
            value,
            unit: None,
        }
    }

    pub fn text(
        entity_id: u32,
        set_name: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::with_value(
            entity_id,
            set_name,
            name,
            PropertyType::String,
            RecordValue::Text(value.into()),
        )
    }

    pub fn real(
        entity_id: u32,
        set_name: impl Into<String>,
        name: impl Into<String>,
        value: f64,
    ) -> Self {
        Self::with_value(entity_id, set_name, name, PropertyType::Real, RecordValue::Number(value))
    }

    /// Stored in the `f64` slot; exact for magnitudes up to 2^53.
    pub fn integer(
        entity_id: u32,
        set_name: impl Into<String>,
        name: impl Into<String>,
        value: i64,
    ) -> Self {
        Self::with_value(
            entity_id,
            set_name,
            name,
            PropertyType::Integer,
            RecordValue::Number(value as f64),
        )
    }

    pub fn boolean(
        entity_id: u32,
        set_name: impl Into<String>,
        name: impl Into<String>,
        value: bool,
    ) -> Self {
        Self::with_value(
            entity_id,
            set_name,
            name,
            PropertyType::Boolean,
            RecordValue::Number(if value { 1.0 } else { 0.0 }),
        )
    }

    pub fn logical(
        entity_id: u32,
        set_name: impl Into<String>,
        name: impl Into<String>,
        value: Option<bool>,
    ) -> Self {
        let encoded = match value {
            Some(false) => 0.0,
            Some(true) => 1.0,
            None => 2.0,
        };
        Self::with_value(
            entity_id,
            set_name,
            name,
            PropertyType::Logical,
            RecordValue::Number(encoded),
        )
    }

    pub fn reference(
        entity_id: u32,
        set_name: impl Into<String>,
        name: impl Into<String>,
        target: u32,
    ) -> Self {
        Self::with_value(
            entity_id,
            set_name,
            name,
            PropertyType::Reference,
            RecordValue::Number(f64::from(target)),
        )
    }

    pub fn null(
        entity_id: u32,
        set_name: impl Into<String>,
        name: impl Into<String>,
        property_type: PropertyType,
    ) -> Self {
        Self::with_value(entity_id, set_name, name, property_type, RecordValue::Absent)
    }

    /// Override the type tag, e.g. to mark a text value as `Label` or `Enum`.
    pub fn typed(mut self, property_type: PropertyType) -> Self {
        self.property_type = property_type.normalized();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Property<'a> {
    pub name: &'a str,
    pub property_type: PropertyType,
    pub value: PropertyValue<'a>,
    pub unit: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertySet<'a> {
    pub name: &'a str,
    pub properties: Vec<Property<'a>>,
}

#[derive(Debug, Clone)]
pub struct PropertyTable {
    strings: Arc<StringDictionary>,
    keys: AttributeKeys,
    property_type: Column<u8>,
    value_num: Column<f64>,
    value_str: Column<u32>,
    unit: Column<u32>,
}

impl PropertyTable {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn value_at(&self, row: usize) -> Option<PropertyValue<'_>> {
        let ty = PropertyType::from_code(self.property_type.get(row)?);
        let num = self.value_num.get(row)?;
        let text = self.value_str.get(row)?;
        if text == ABSENT_INDEX {
            return Some(PropertyValue::Null);
        }
        let as_text = || {
            self.strings
                .get(text)
                .map_or(PropertyValue::Null, PropertyValue::Text)
        };
        Some(match ty {
            t if t.is_textual() => as_text(),
            PropertyType::Real => PropertyValue::Real(num),
            PropertyType::Integer => PropertyValue::Integer(num as i64),
            PropertyType::Boolean => PropertyValue::Boolean(num != 0.0),
            PropertyType::Logical => PropertyValue::Logical(match num as i64 {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            }),
            PropertyType::Reference => PropertyValue::Reference(num as u32),
            _ if text != NULL_INDEX => as_text(),
            _ => PropertyValue::Real(num),
        })
    }

    fn property_at(&self, row: usize) -> Option<Property<'_>> {
        Some(Property {
            name: self.strings.get(self.keys.item_name.get(row)?).unwrap_or(""),
            property_type: PropertyType::from_code(self.property_type.get(row)?),
            value: self.value_at(row)?,
            unit: self.unit.get(row).and_then(|i| self.strings.get(i)),
        })
    }

    /// All property sets of one entity, in first-seen order.
    pub fn for_entity(&self, entity: u32) -> Vec<PropertySet<'_>> {
        self.keys
            .group_by_set(entity)
            .into_iter()
            .map(|(set, rows)| PropertySet {
                name: self.strings.get(set).unwrap_or(""),
                properties: rows
                    .into_iter()
                    .filter_map(|row| self.property_at(row))
                    .collect(),
            })
            .collect()
    }

    pub fn has_properties(&self, entity: u32) -> bool {
        self.keys.index.by_entity.contains_key(entity)
    }

    pub fn property(&self, entity: u32, set: &str, name: &str) -> Option<Property<'_>> {
        let set = self.strings.lookup(set)?;
        let item = self.strings.lookup(name)?;
        self.property_at(self.keys.find(entity, set, item)?)
    }

    pub fn value(&self, entity: u32, set: &str, name: &str) -> Option<PropertyValue<'_>> {
        self.property(entity, set, name).map(|p| p.value)
    }

    /// Entities carrying a property named `name` in any set, first-seen order.
    pub fn entities_with_property(&self, name: &str) -> Vec<u32> {
        self.strings
            .lookup(name)
            .map(|item| self.keys.entities_with_item(item))
            .unwrap_or_default()
    }

    /// `(entity, value)` for every property named `name`, in row order.
    pub fn values_by_name(&self, name: &str) -> Vec<(u32, PropertyValue<'_>)> {
        let Some(item) = self.strings.lookup(name) else {
            return Vec::new();
        };
        self.keys
            .index
            .by_item
            .rows(item)
            .filter_map(|row| Some((self.keys.entity_id.get(row)?, self.value_at(row)?)))
            .collect()
    }

    /// Sum of the numeric properties named `name`; text values are skipped.
    pub fn sum_by_type(&self, name: &str) -> f64 {
        self.values_by_name(name)
            .iter()
            .filter_map(|(_, v)| v.as_f64())
            .sum()
    }

    /// Distinct property set names, in first-seen order.
    pub fn set_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.keys
            .index
            .by_set
            .keys()
            .iter()
            .filter_map(|&idx| self.strings.get(idx))
    }

    pub fn encode(&self, w: &mut ByteWriter) -> CacheResult<()> {
        w.write_u32(len_u32(self.len(), "property rows")?);
        self.keys.write_columns(w);
        w.write_column(&self.property_type);
        w.align(8);
        w.write_column(&self.value_num);
        w.write_column(&self.value_str);
        w.write_column(&self.unit);
        self.keys.index.encode(w)
    }

    pub fn decode(
        r: &mut ByteReader,
        strings: Arc<StringDictionary>,
    ) -> Result<Self, DecodeError> {
        let count = r.read_u32()? as usize;
        let key_columns = AttributeKeys::read_columns(r, count)?;
        let property_type = r.read_column(count)?;
        r.align(8)?;
        let value_num = r.read_column(count)?;
        let value_str = r.read_column(count)?;
        let unit = r.read_column(count)?;
        let index = AttributeIndex::decode(r, count)?;
        Ok(Self {
            strings,
            keys: AttributeKeys::from_parts(key_columns, index)?,
            property_type,
            value_num,
            value_str,
            unit,
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct PropertyTableBuilder {
    entity_id: Vec<u32>,
    set_name: Vec<u32>,
    item_name: Vec<u32>,
    property_type: Vec<u8>,
    value_num: Vec<f64>,
    value_str: Vec<u32>,
    unit: Vec<u32>,
}

impl PropertyTableBuilder {
    pub(crate) fn push(
        &mut self,
        strings: &mut StringDictionary,
        record: &PropertyRecord,
    ) -> CacheResult<()> {
        let (num, text) = match &record.value {
            RecordValue::Number(v) => (*v, NULL_INDEX),
            RecordValue::Text(s) => (0.0, strings.intern_str(s)?),
            RecordValue::Absent => (f64::NAN, ABSENT_INDEX),
        };
        let set_name = strings.intern_str(&record.set_name)?;
        let item_name = strings.intern_str(&record.name)?;
        let unit = strings.intern(record.unit.as_deref())?;

        self.entity_id.push(record.entity_id);
        self.set_name.push(set_name);
        self.item_name.push(item_name);
        self.property_type.push(record.property_type.code());
        self.value_num.push(num);
        self.value_str.push(text);
        self.unit.push(unit);
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entity_id.is_empty()
    }

    pub(crate) fn finish(self, strings: Arc<StringDictionary>) -> PropertyTable {
        PropertyTable {
            strings,
            keys: AttributeKeys::build(self.entity_id, self.set_name, self.item_name),
            property_type: self.property_type.into(),
            value_num: self.value_num.into(),
            value_str: self.value_str.into(),
            unit: self.unit.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const COMMON: &str = "Pset_WallCommon";

    fn table(records: &[PropertyRecord]) -> PropertyTable {
        let mut strings = StringDictionary::new();
        let mut builder = PropertyTableBuilder::default();
        for r in records {
            builder.push(&mut strings, r).unwrap();
        }
        let table = builder.finish(Arc::new(strings));

        let mut w = ByteWriter::new();
        table.encode(&mut w).unwrap();
        PropertyTable::decode(
            &mut ByteReader::new(Bytes::from(w.build())),
            table.strings.clone(),
        )
        .unwrap()
    }

    #[test]
    fn test_typed_values_roundtrip() {
        let table = table(&[
            PropertyRecord::text(1, COMMON, "Reference", "AW-01"),
            PropertyRecord::boolean(1, COMMON, "IsExternal", true),
            PropertyRecord::logical(1, COMMON, "Combustible", None),
            PropertyRecord::real(1, COMMON, "ThermalTransmittance", 0.24).with_unit("W/m2K"),
            PropertyRecord::integer(1, COMMON, "Layers", -3),
            PropertyRecord::reference(1, COMMON, "Material", 77),
            PropertyRecord::text(1, COMMON, "Status", "NEW").typed(PropertyType::Enum),
            PropertyRecord::null(1, COMMON, "AcousticRating", PropertyType::Label),
        ]);

        assert_eq!(table.value(1, COMMON, "Reference"), Some(PropertyValue::Text("AW-01")));
        assert_eq!(table.value(1, COMMON, "IsExternal"), Some(PropertyValue::Boolean(true)));
        assert_eq!(table.value(1, COMMON, "Combustible"), Some(PropertyValue::Logical(None)));
        assert_eq!(table.value(1, COMMON, "Layers"), Some(PropertyValue::Integer(-3)));
        assert_eq!(table.value(1, COMMON, "Material"), Some(PropertyValue::Reference(77)));
        assert_eq!(table.value(1, COMMON, "AcousticRating"), Some(PropertyValue::Null));

        let status = table.property(1, COMMON, "Status").unwrap();
        assert_eq!(status.property_type, PropertyType::Enum);
        assert_eq!(status.value.as_str(), Some("NEW"));

        let u = table.property(1, COMMON, "ThermalTransmittance").unwrap();
        assert_eq!(u.value, PropertyValue::Real(0.24));
        assert_eq!(u.unit, Some("W/m2K"));
        assert_eq!(u.value.to_string(), "0.24");

        assert_eq!(table.value(2, COMMON, "Reference"), None);
    }

    #[test]
    fn test_for_entity_and_lookups() {
        let table = table(&[
            PropertyRecord::text(1, COMMON, "Reference", "AW-01"),
            PropertyRecord::real(1, "Pset_Custom", "Cost", 120.5),
            PropertyRecord::boolean(1, COMMON, "LoadBearing", false),
            PropertyRecord::text(2, COMMON, "Reference", "IW-02"),
            PropertyRecord::real(3, "Pset_Custom", "Cost", 79.5),
        ]);

        let sets = table.for_entity(1);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].name, COMMON);
        assert_eq!(sets[0].properties.len(), 2);
        assert_eq!(sets[0].properties[1].name, "LoadBearing");
        assert_eq!(sets[1].name, "Pset_Custom");

        assert_eq!(table.entities_with_property("Reference"), vec![1, 2]);
        assert!(table.entities_with_property("Nope").is_empty());
        assert_eq!(table.sum_by_type("Cost"), 200.0);
        assert_eq!(table.sum_by_type("Reference"), 0.0);
        assert_eq!(
            table.values_by_name("Reference"),
            vec![(1, PropertyValue::Text("AW-01")), (2, PropertyValue::Text("IW-02"))]
        );
        assert!(table.has_properties(3));
        assert_eq!(table.set_names().collect::<Vec<_>>(), vec![COMMON, "Pset_Custom"]);
    }

    #[test]
    fn test_nan_real_is_not_null() {
        let table = table(&[
            PropertyRecord::real(1, COMMON, "Measured", f64::NAN),
            PropertyRecord::null(1, COMMON, "Unmeasured", PropertyType::Real),
            PropertyRecord::null(1, COMMON, "Tag", PropertyType::Other(42)),
            PropertyRecord::text(1, COMMON, "Note", "").typed(PropertyType::Other(42)),
        ]);

        assert!(matches!(
            table.value(1, COMMON, "Measured"),
            Some(PropertyValue::Real(v)) if v.is_nan()
        ));
        assert_eq!(table.value(1, COMMON, "Unmeasured"), Some(PropertyValue::Null));
        assert_eq!(table.value(1, COMMON, "Tag"), Some(PropertyValue::Null));
        assert_eq!(table.value(1, COMMON, "Note"), Some(PropertyValue::Text("")));
    }

    #[test]
    fn test_integers_are_exact_up_to_2_pow_53() {
        let limit = 1i64 << 53;
        let table = table(&[
            PropertyRecord::integer(1, COMMON, "Max", limit),
            PropertyRecord::integer(1, COMMON, "Min", -limit),
        ]);
        assert_eq!(table.value(1, COMMON, "Max"), Some(PropertyValue::Integer(limit)));
        assert_eq!(table.value(1, COMMON, "Min"), Some(PropertyValue::Integer(-limit)));
    }

    #[test]
    fn test_other_with_a_named_code_is_that_variant() {
        let record = PropertyRecord::text(1, COMMON, "Status", "NEW").typed(PropertyType::Other(8));
        assert!(matches!(record.property_type, PropertyType::Enum));
        assert_eq!(PropertyType::Other(1), PropertyType::Real);
        assert!(PropertyType::Other(5).is_textual());

        let mut raw = PropertyRecord::real(1, COMMON, "Width", 0.3);
        raw.property_type = PropertyType::Other(1);
        let table = table(&[record, raw]);
        let width = table.property(1, COMMON, "Width").unwrap();
        assert!(matches!(width.property_type, PropertyType::Real));
        assert_eq!(width.value, PropertyValue::Real(0.3));
        assert_eq!(table.value(1, COMMON, "Status"), Some(PropertyValue::Text("NEW")));
    }

    #[test]
    fn test_display() {
        assert_eq!(PropertyValue::Logical(None).to_string(), "UNKNOWN");
        assert_eq!(PropertyValue::Boolean(true).to_string(), "TRUE");
        assert_eq!(PropertyValue::Reference(5).to_string(), "#5");
        assert_eq!(PropertyValue::Null.to_string(), "");
    }
}
