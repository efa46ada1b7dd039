//! Relationship table.
//!
//! One row per (relationship type, relating entity, related entity). Forward
//! and backward indices are rebuilt at load, like the entity table's.

use std::fmt;
use std::hash::{Hash, Hasher};

use ahash::AHashMap;

use crate::buffer::{ByteReader, ByteWriter, Column};
use crate::error::{len_u32, CacheResult, DecodeError};

#[derive(Debug, Clone, Copy)]
pub enum RelationshipType {
    ContainedInSpatialStructure,
    Aggregates,
    Nests,
    DefinesByProperties,
    DefinesByType,
    AssociatesMaterial,
    VoidsElement,
    FillsElement,
    ConnectsElements,
    SpaceBoundary,
    /// A code with no named variant.
    Other(u16),
}

const IFC_NAMES: [(&str, RelationshipType); 10] = [
    ("IFCRELCONTAINEDINSPATIALSTRUCTURE", RelationshipType::ContainedInSpatialStructure),
    ("IFCRELAGGREGATES", RelationshipType::Aggregates),
    ("IFCRELNESTS", RelationshipType::Nests),
    ("IFCRELDEFINESBYPROPERTIES", RelationshipType::DefinesByProperties),
    ("IFCRELDEFINESBYTYPE", RelationshipType::DefinesByType),
    ("IFCRELASSOCIATESMATERIAL", RelationshipType::AssociatesMaterial),
    ("IFCRELVOIDSELEMENT", RelationshipType::VoidsElement),
    ("IFCRELFILLSELEMENT", RelationshipType::FillsElement),
    ("IFCRELCONNECTSELEMENTS", RelationshipType::ConnectsElements),
    ("IFCRELSPACEBOUNDARY", RelationshipType::SpaceBoundary),
];

impl RelationshipType {
    pub fn code(self) -> u16 {
        match self {
            RelationshipType::ContainedInSpatialStructure => 0,
            RelationshipType::Aggregates => 1,
            RelationshipType::Nests => 2,
            RelationshipType::DefinesByProperties => 3,
            RelationshipType::DefinesByType => 4,
            RelationshipType::AssociatesMaterial => 5,
            RelationshipType::VoidsElement => 6,
            RelationshipType::FillsElement => 7,
            RelationshipType::ConnectsElements => 8,
            RelationshipType::SpaceBoundary => 9,
            RelationshipType::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        IFC_NAMES
            .iter()
            .map(|(_, ty)| *ty)
            .find(|ty| ty.code() == code)
            .unwrap_or(RelationshipType::Other(code))
    }

    /// Map `Other` holding a named code onto its named variant.
    pub fn normalized(self) -> Self {
        Self::from_code(self.code())
    }

    /// Map an `IFCREL*` entity type name, ignoring ASCII case.
    pub fn from_ifc_type(type_name: &str) -> Option<Self> {
        IFC_NAMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(type_name))
            .map(|(_, ty)| *ty)
    }

    pub fn ifc_name(self) -> Option<&'static str> {
        IFC_NAMES
            .iter()
            .find(|(_, ty)| *ty == self)
            .map(|(name, _)| *name)
    }
}

/// Equality follows the wire code, so `Other(c)` equals the variant named by `c`.
impl PartialEq for RelationshipType {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for RelationshipType {}

impl Hash for RelationshipType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code().hash(state);
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ifc_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "relationship#{}", self.code()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationshipRecord {
    pub rel_type: RelationshipType,
    pub relating: u32,
    pub related: u32,
}

impl RelationshipRecord {
    pub fn new(rel_type: RelationshipType, relating: u32, related: u32) -> Self {
        Self {
            rel_type: rel_type.normalized(),
            relating,
            related,
        }
    }
}

type EdgeKey = (u32, u16);

#[derive(Debug, Clone, Default)]
pub struct RelationshipTable {
    rel_type: Column<u16>,
    relating: Column<u32>,
    related: Column<u32>,

    // Rebuilt at load
    forward: AHashMap<EdgeKey, Vec<u32>>,
    backward: AHashMap<EdgeKey, Vec<u32>>,
}

impl RelationshipTable {
    fn from_parts(
        rel_type: Column<u16>,
        relating: Column<u32>,
        related: Column<u32>,
    ) -> Result<Self, DecodeError> {
        let count = rel_type.len();
        if relating.len() != count || related.len() != count {
            return Err(DecodeError::inconsistent(format!(
                "relationship columns have {}/{}/{} rows",
                count,
                relating.len(),
                related.len()
            )));
        }

        let mut forward: AHashMap<EdgeKey, Vec<u32>> = AHashMap::new();
        let mut backward: AHashMap<EdgeKey, Vec<u32>> = AHashMap::new();
        for ((ty, from), to) in rel_type.iter().zip(relating.iter()).zip(related.iter()) {
            forward.entry((from, ty)).or_default().push(to);
            backward.entry((to, ty)).or_default().push(from);
        }

        Ok(Self {
            rel_type,
            relating,
            related,
            forward,
            backward,
        })
    }

    pub fn len(&self) -> usize {
        self.rel_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rel_type.is_empty()
    }

    /// Entities related to `relating` through `rel_type`, in row order.
    pub fn related(&self, relating: u32, rel_type: RelationshipType) -> &[u32] {
        self.forward
            .get(&(relating, rel_type.code()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Entities relating to `related` through `rel_type`, in row order.
    pub fn relating(&self, related: u32, rel_type: RelationshipType) -> &[u32] {
        self.backward
            .get(&(related, rel_type.code()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Elements placed directly in a spatial structure element.
    pub fn contained_elements(&self, spatial_id: u32) -> &[u32] {
        self.related(spatial_id, RelationshipType::ContainedInSpatialStructure)
    }

    /// Spatial structure element that directly contains `element`.
    pub fn container_of(&self, element: u32) -> Option<u32> {
        self.relating(element, RelationshipType::ContainedInSpatialStructure)
            .first()
            .copied()
    }

    /// Children in the aggregation (decomposition) tree.
    pub fn decomposed_by(&self, whole: u32) -> &[u32] {
        self.related(whole, RelationshipType::Aggregates)
    }

    pub fn iter(&self) -> impl Iterator<Item = RelationshipRecord> + '_ {
        self.rel_type
            .iter()
            .zip(self.relating.iter())
            .zip(self.related.iter())
            .map(|((ty, relating), related)| RelationshipRecord {
                rel_type: RelationshipType::from_code(ty),
                relating,
                related,
            })
    }

    pub fn encode(&self, w: &mut ByteWriter) -> CacheResult<()> {
        w.write_u32(len_u32(self.len(), "relationship rows")?);
        w.write_column(&self.rel_type);
        w.align(4);
        w.write_column(&self.relating);
        w.write_column(&self.related);
        Ok(())
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self, DecodeError> {
        let count = r.read_u32()? as usize;
        let rel_type = r.read_column(count)?;
        r.align(4)?;
        let relating = r.read_column(count)?;
        let related = r.read_column(count)?;
        Self::from_parts(rel_type, relating, related)
    }
}

#[derive(Debug, Default)]
pub(crate) struct RelationshipTableBuilder {
    rel_type: Vec<u16>,
    relating: Vec<u32>,
    related: Vec<u32>,
}

impl RelationshipTableBuilder {
    pub(crate) fn push(&mut self, record: &RelationshipRecord) {
        self.rel_type.push(record.rel_type.code());
        self.relating.push(record.relating);
        self.related.push(record.related);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rel_type.is_empty()
    }

    pub(crate) fn finish(self) -> Result<RelationshipTable, DecodeError> {
        RelationshipTable::from_parts(self.rel_type.into(), self.relating.into(), self.related.into())
    }
}
