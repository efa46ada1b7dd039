//! Deduplicating string dictionary.
//!
//! Every other section stores dictionary indices, never text, so the decoder
//! re-interns strings in emission order and checks that each one lands on the
//! index it was written from.

use std::sync::Arc;

use ahash::AHashMap;

use crate::buffer::{ByteReader, ByteWriter, Column};
use crate::error::{len_u32, CacheError, CacheResult, DecodeError};

/// Index of the empty string.
pub const EMPTY_INDEX: u32 = 0;

/// Index stored for absent values. Never a valid position.
pub const NULL_INDEX: u32 = u32::MAX;

/// Marks an absent property value in the dictionary slot. Never a valid
/// position.
pub const ABSENT_INDEX: u32 = u32::MAX - 1;

/// Highest index the dictionary hands out.
pub const MAX_INDEX: u32 = u32::MAX - 2;

#[derive(Debug, Clone)]
pub struct StringDictionary {
    strings: Vec<Arc<str>>,
    index: AHashMap<Arc<str>, u32>,
}

impl StringDictionary {
    pub fn new() -> Self {
        let empty: Arc<str> = Arc::from("");
        let mut index = AHashMap::new();
        index.insert(empty.clone(), EMPTY_INDEX);
        Self {
            strings: vec![empty],
            index,
        }
    }

    /// Intern an optional string. `None` maps to [`NULL_INDEX`].
    pub fn intern(&mut self, s: Option<&str>) -> CacheResult<u32> {
        match s {
            Some(s) => self.intern_str(s),
            None => Ok(NULL_INDEX),
        }
    }

    /// Fails with [`CacheError::TooLarge`] once [`MAX_INDEX`] is taken.
    pub fn intern_str(&mut self, s: &str) -> CacheResult<u32> {
        if let Some(&idx) = self.index.get(s) {
            return Ok(idx);
        }
        let idx = next_index(self.strings.len())?;
        let owned: Arc<str> = Arc::from(s);
        self.strings.push(owned.clone());
        self.index.insert(owned, idx);
        Ok(idx)
    }

    /// Index of an already-interned string.
    pub fn lookup(&self, s: &str) -> Option<u32> {
        self.index.get(s).copied()
    }

    /// O(1) access. `NULL_INDEX` and out-of-range indices yield `None`.
    pub fn get(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx as usize).map(|s| &**s)
    }

    /// Whether `idx` is either `NULL_INDEX` or a valid position.
    pub fn is_valid_ref(&self, idx: u32) -> bool {
        idx == NULL_INDEX || (idx as usize) < self.strings.len()
    }

    /// Number of entries, including the empty string at index 0.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Always false; index 0 is occupied by the empty string.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.strings.iter().map(|s| &**s)
    }

    /// `count:4`, `offsets:4*(count+1)`, then the concatenated UTF-8 bytes.
    pub fn encode(&self, w: &mut ByteWriter) -> CacheResult<()> {
        let count = len_u32(self.strings.len(), "dictionary entries")?;
        let mut offsets = Vec::with_capacity(self.strings.len() + 1);
        let mut cursor = 0usize;
        offsets.push(0u32);
        for s in &self.strings {
            cursor += s.len();
            offsets.push(len_u32(cursor, "dictionary byte size")?);
        }

        w.write_u32(count);
        w.write_array(&offsets);
        for s in &self.strings {
            w.write_bytes(s.as_bytes());
        }
        Ok(())
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self, DecodeError> {
        let count = r.read_u32()? as usize;
        let offsets: Column<u32> = r.read_column(count.saturating_add(1))?;
        if offsets.get(0) != Some(0) {
            return Err(DecodeError::inconsistent("first string offset is not zero"));
        }
        let total = offsets.get(count).unwrap_or(0) as usize;
        let data_start = r.position();
        let data = r.read_bytes(total)?;

        let mut dict = Self::new();
        dict.strings.reserve(count.saturating_sub(1));
        let mut start = 0usize;
        for (i, end) in offsets.iter().skip(1).enumerate() {
            let end = end as usize;
            let bytes = data.get(start..end).ok_or_else(|| {
                DecodeError::inconsistent(format!(
                    "string {i} spans {start}..{end} outside {total} data bytes"
                ))
            })?;
            let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 {
                position: data_start + start,
            })?;
            let idx = dict
                .intern_str(s)
                .map_err(|e| DecodeError::inconsistent(e.to_string()))?;
            if idx as usize != i {
                return Err(DecodeError::inconsistent(format!(
                    "string {i} re-interned at index {idx}"
                )));
            }
            start = end;
        }
        Ok(dict)
    }
}

/// Index of an entry appended at position `len`.
fn next_index(len: usize) -> CacheResult<u32> {
    u32::try_from(len)
        .ok()
        .filter(|&idx| idx <= MAX_INDEX)
        .ok_or(CacheError::TooLarge {
            what: "dictionary entries",
            value: len.saturating_add(1),
        })
}

impl Default for StringDictionary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    fn roundtrip(dict: &StringDictionary) -> Result<StringDictionary, DecodeError> {
        let mut w = ByteWriter::new();
        dict.encode(&mut w).unwrap();
        StringDictionary::decode(&mut ByteReader::new(Bytes::from(w.build())))
    }

    #[test]
    fn test_intern_examples() {
        let mut dict = StringDictionary::new();
        assert_eq!(dict.intern(None).unwrap(), NULL_INDEX);
        assert_eq!(dict.intern(Some("")).unwrap(), 0);
        assert_eq!(dict.intern(Some("Wall-1")).unwrap(), 1);
        assert_eq!(dict.intern(Some("Wall-1")).unwrap(), 1);
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get(1), Some("Wall-1"));
        assert_eq!(dict.get(NULL_INDEX), None);
        assert_eq!(dict.lookup("Door"), None);
    }

    #[test]
    fn test_roundtrip_preserves_indices() {
        let mut dict = StringDictionary::new();
        let ids: Vec<u32> = ["IFCWALL", "Basiswand", "", "Tür \u{1F6AA}", "a\0b"]
            .iter()
            .map(|s| dict.intern_str(s).unwrap())
            .collect();

        let decoded = roundtrip(&dict).unwrap();
        assert_eq!(decoded.len(), dict.len());
        for (s, idx) in ["IFCWALL", "Basiswand", "", "Tür \u{1F6AA}", "a\0b"]
            .iter()
            .zip(ids)
        {
            assert_eq!(decoded.get(idx), Some(*s));
            assert_eq!(decoded.lookup(s), Some(idx));
        }
    }

    #[test]
    fn test_index_space_stops_below_the_markers() {
        assert_eq!(next_index(0).unwrap(), 0);
        assert_eq!(next_index(MAX_INDEX as usize).unwrap(), MAX_INDEX);
        for len in [ABSENT_INDEX as usize, NULL_INDEX as usize, usize::MAX] {
            assert!(matches!(
                next_index(len),
                Err(CacheError::TooLarge { what: "dictionary entries", .. })
            ));
        }
        assert!(!StringDictionary::new().is_valid_ref(ABSENT_INDEX));
    }

    #[test]
    fn test_duplicate_strings_break_index_stability() {
        let mut w = ByteWriter::new();
        w.write_u32(3);
        w.write_array(&[0u32, 0, 1, 2]);
        w.write_bytes(b"xx");
        let err = StringDictionary::decode(&mut ByteReader::new(Bytes::from(w.build())));
        assert!(matches!(err, Err(DecodeError::Inconsistent(_))));
    }

    #[test]
    fn test_offsets_past_data_are_rejected() {
        let mut w = ByteWriter::new();
        w.write_u32(2);
        w.write_array(&[0u32, 0, 10]);
        w.write_bytes(b"abc");
        let err = StringDictionary::decode(&mut ByteReader::new(Bytes::from(w.build())));
        assert!(matches!(err, Err(DecodeError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_decreasing_offsets_are_rejected() {
        let mut w = ByteWriter::new();
        w.write_u32(3);
        w.write_array(&[0u32, 0, 3, 2]);
        w.write_bytes(b"abc");
        let err = StringDictionary::decode(&mut ByteReader::new(Bytes::from(w.build())));
        assert!(matches!(err, Err(DecodeError::Inconsistent(_))));
    }

    proptest! {
        #[test]
        fn prop_intern_is_idempotent(values in prop::collection::vec(
            prop::option::of("[a-zA-Z0-9 _-]{0,12}"), 0..64)
        ) {
            let mut dict = StringDictionary::new();
            let first: Vec<u32> = values.iter().map(|v| dict.intern(v.as_deref()).unwrap()).collect();
            let second: Vec<u32> = values.iter().map(|v| dict.intern(v.as_deref()).unwrap()).collect();
            prop_assert_eq!(&first, &second);

            let distinct: std::collections::HashSet<&str> = values
                .iter()
                .flatten()
                .map(String::as_str)
                .filter(|s| !s.is_empty())
                .collect();
            prop_assert_eq!(dict.len(), 1 + distinct.len());

            let decoded = roundtrip(&dict).unwrap();
            for (v, idx) in values.iter().zip(&first) {
                prop_assert_eq!(decoded.get(*idx), v.as_deref());
            }
        }
    }
}
