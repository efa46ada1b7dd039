//! Cache writer.
//!
//! Single streaming pass: header and directory are reserved as zeroes, each
//! section is encoded at the next 8-byte boundary, and once the chunks are
//! concatenated the directory, length and checksum are patched in. The
//! caller only ever sees the finished buffer.

use bytes::Bytes;
use tracing::{debug, info};

use crate::buffer::{ByteWriter, DEFAULT_CHUNK_SIZE};
use crate::error::{len_u32, CacheError, CacheResult};
use crate::model::ModelCache;
use crate::section::{
    compute_checksum, Directory, Header, SectionEntry, SectionKind, FORMAT_VERSION, HEADER_SIZE,
    SECTION_ALIGN,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Size of the first buffer chunk; later chunks are at least this big.
    pub initial_chunk_size: usize,
    /// Emit the geometry section when the cache carries one.
    pub include_geometry: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            initial_chunk_size: DEFAULT_CHUNK_SIZE,
            include_geometry: true,
        }
    }
}

#[derive(Debug, Clone)]
struct RawSection {
    code: u16,
    flags: u16,
    data: Bytes,
}

enum Planned<'a> {
    Known(SectionKind),
    Raw(&'a RawSection),
}

#[derive(Debug, Clone, Default)]
pub struct CacheWriter {
    options: WriteOptions,
    raw_sections: Vec<RawSection>,
}

impl CacheWriter {
    pub fn new(options: WriteOptions) -> Self {
        Self {
            options,
            raw_sections: Vec::new(),
        }
    }

    /// Append a pre-encoded section of a type this crate does not know.
    ///
    /// Raw sections are written after the built-in ones. Codes of built-in
    /// section kinds are refused.
    pub fn add_raw_section(
        &mut self,
        code: u16,
        flags: u16,
        data: impl Into<Bytes>,
    ) -> CacheResult<&mut Self> {
        if SectionKind::from_code(code).is_some() {
            return Err(CacheError::ReservedSection(code));
        }
        self.raw_sections.push(RawSection {
            code,
            flags,
            data: data.into(),
        });
        Ok(self)
    }

    fn plan(&self, cache: &ModelCache) -> Vec<Planned<'_>> {
        let mut plan = vec![
            Planned::Known(SectionKind::Strings),
            Planned::Known(SectionKind::Entities),
        ];
        if cache.properties().is_some() {
            plan.push(Planned::Known(SectionKind::Properties));
        }
        if cache.quantities().is_some() {
            plan.push(Planned::Known(SectionKind::Quantities));
        }
        if cache.relationships().is_some() {
            plan.push(Planned::Known(SectionKind::Relationships));
        }
        if self.options.include_geometry && cache.geometry().is_some() {
            plan.push(Planned::Known(SectionKind::Geometry));
        }
        if cache.metadata().is_some() {
            plan.push(Planned::Known(SectionKind::Metadata));
        }
        plan.extend(self.raw_sections.iter().map(Planned::Raw));
        plan
    }

    fn encode_section(kind: SectionKind, cache: &ModelCache, w: &mut ByteWriter) -> CacheResult<()> {
        match kind {
            SectionKind::Strings => cache.strings().encode(w),
            SectionKind::Entities => cache.entities().encode(w),
            SectionKind::Properties => cache.properties().map_or(Ok(()), |t| t.encode(w)),
            SectionKind::Quantities => cache.quantities().map_or(Ok(()), |t| t.encode(w)),
            SectionKind::Relationships => cache.relationships().map_or(Ok(()), |t| t.encode(w)),
            SectionKind::Geometry => cache.geometry().map_or(Ok(()), |g| g.encode(w)),
            SectionKind::Metadata => cache.metadata().map_or(Ok(()), |m| m.encode(w)),
        }
    }

    pub fn write(&self, cache: &ModelCache) -> CacheResult<Vec<u8>> {
        let plan = self.plan(cache);
        let mut w = ByteWriter::with_chunk_size(self.options.initial_chunk_size);
        w.write_bytes(&[0u8; HEADER_SIZE]);
        w.write_bytes(&vec![0u8; Directory::encoded_len(plan.len())]);

        let mut entries = Vec::with_capacity(plan.len());
        for section in &plan {
            w.align(SECTION_ALIGN);
            let start = w.position();
            let (code, flags) = match section {
                Planned::Known(kind) => {
                    Self::encode_section(*kind, cache, &mut w)?;
                    (kind.code(), 0)
                }
                Planned::Raw(raw) => {
                    w.write_bytes(&raw.data);
                    (raw.code, raw.flags)
                }
            };
            let length = w.position() - start;
            debug!(code, offset = start, length, "encoded section");
            entries.push(SectionEntry {
                code,
                offset: len_u32(start, "section offset")?,
                length: len_u32(length, "section length")?,
                flags,
            });
        }

        let chunks = w.chunk_count();
        let mut out = w.build();
        len_u32(out.len(), "cache size")?;
        Directory { entries }.encode(&mut out[HEADER_SIZE..]);
        let header = Header {
            version: FORMAT_VERSION,
            flags: 0,
            checksum: compute_checksum(&out),
            total_length: out.len() as u64,
        };
        header.encode(&mut out[..HEADER_SIZE]);

        info!(
            bytes = out.len(),
            sections = plan.len(),
            chunks,
            entities = cache.entities().len(),
            "cache encoded"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRecord;
    use crate::geometry::GeometryPayload;
    use crate::section::verify_checksum;

    fn cache_with_geometry() -> ModelCache {
        let mut b = ModelCache::builder();
        b.add_entity(EntityRecord::new(1, "IFCWALL").with_geometry(Some(0)))
            .unwrap();
        b.geometry(GeometryPayload::new(*b"GLB\0", vec![9u8; 40]));
        b.finish().unwrap()
    }

    #[test]
    fn test_directory_is_patched_and_aligned() {
        let bytes = CacheWriter::new(WriteOptions::default())
            .write(&cache_with_geometry())
            .unwrap();
        let header = Header::decode(&bytes).unwrap();
        verify_checksum(&header, &bytes).unwrap();

        let dir = Directory::decode(&bytes).unwrap();
        let codes: Vec<u16> = dir.entries.iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![1, 2, 6]);
        for entry in &dir.entries {
            assert_eq!(entry.offset as usize % SECTION_ALIGN, 0);
            assert!(entry.length > 0);
        }
    }

    #[test]
    fn test_geometry_can_be_left_out() {
        let options = WriteOptions {
            include_geometry: false,
            ..Default::default()
        };
        let bytes = CacheWriter::new(options).write(&cache_with_geometry()).unwrap();
        let dir = Directory::decode(&bytes).unwrap();
        assert!(dir.find(SectionKind::Geometry).is_none());
    }

    #[test]
    fn test_small_chunks_produce_identical_output() {
        let cache = cache_with_geometry();
        let big = CacheWriter::new(WriteOptions::default()).write(&cache).unwrap();
        let small = CacheWriter::new(WriteOptions {
            initial_chunk_size: 16,
            ..Default::default()
        })
        .write(&cache)
        .unwrap();
        assert_eq!(big, small);
    }

    #[test]
    fn test_raw_sections() {
        let mut writer = CacheWriter::default();
        writer.add_raw_section(0x0100, 0x8000, vec![1u8, 2, 3]).unwrap();
        assert!(matches!(
            writer.add_raw_section(SectionKind::Metadata.code(), 0, Vec::new()),
            Err(CacheError::ReservedSection(7))
        ));

        let bytes = writer.write(&cache_with_geometry()).unwrap();
        let dir = Directory::decode(&bytes).unwrap();
        let raw = dir.entries.last().copied().unwrap();
        assert_eq!((raw.code, raw.flags, raw.length), (0x0100, 0x8000, 3));
        assert_eq!(&bytes[raw.range()], &[1, 2, 3]);
    }
}
