//! File header and section directory.
//!
//! ```text
//! [magic:4][version:2][flags:2][checksum:8][total_length:8][reserved:8]
//! [section_count:4][{type:2, offset:4, length:4, flags:2} * section_count]
//! <payloads, each starting on an 8-byte boundary>
//! ```
//!
//! The checksum is xxh3-64 over everything after the header, so it covers
//! the directory and every payload.

use std::fmt;
use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{CacheError, CacheResult};

pub const MAGIC: [u8; 4] = *b"BIMC";

pub const FORMAT_VERSION_MAJOR: u8 = 1;
pub const FORMAT_VERSION_MINOR: u8 = 0;
pub const FORMAT_VERSION: u16 = (FORMAT_VERSION_MAJOR as u16) << 8 | FORMAT_VERSION_MINOR as u16;

pub const HEADER_SIZE: usize = 32;
pub const DIRECTORY_ENTRY_SIZE: usize = 12;
pub const SECTION_ALIGN: usize = 8;

/// Header-level flag bits. None are interpreted; unknown bits are ignored.
pub mod header_flags {
    /// Reserved for whole-file compression. No codec exists and nothing sets it.
    pub const COMPRESSED: u16 = 1 << 15;
}

/// Section-level flag bits. None are interpreted; unknown bits are ignored.
pub mod section_flags {
    /// Reserved for per-section compression.
    pub const COMPRESSED: u16 = 1 << 0;
}

// ============================================================================
// Section kinds
// ============================================================================

/// Section types this reader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum SectionKind {
    Strings = 1,
    Entities = 2,
    Properties = 3,
    Quantities = 4,
    Relationships = 5,
    Geometry = 6,
    Metadata = 7,
}

impl SectionKind {
    pub const ALL: [SectionKind; 7] = [
        SectionKind::Strings,
        SectionKind::Entities,
        SectionKind::Properties,
        SectionKind::Quantities,
        SectionKind::Relationships,
        SectionKind::Geometry,
        SectionKind::Metadata,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }

    /// Strings and entities must be present in every cache.
    pub fn is_mandatory(self) -> bool {
        matches!(self, SectionKind::Strings | SectionKind::Entities)
    }

    pub fn name(self) -> &'static str {
        match self {
            SectionKind::Strings => "strings",
            SectionKind::Entities => "entities",
            SectionKind::Properties => "properties",
            SectionKind::Quantities => "quantities",
            SectionKind::Relationships => "relationships",
            SectionKind::Geometry => "geometry",
            SectionKind::Metadata => "metadata",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Header
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub flags: u16,
    pub checksum: u64,
    pub total_length: u64,
}

impl Header {
    pub fn major(&self) -> u8 {
        (self.version >> 8) as u8
    }

    pub fn minor(&self) -> u8 {
        (self.version & 0xff) as u8
    }

    pub fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&MAGIC);
        LittleEndian::write_u16(&mut out[4..6], self.version);
        LittleEndian::write_u16(&mut out[6..8], self.flags);
        LittleEndian::write_u64(&mut out[8..16], self.checksum);
        LittleEndian::write_u64(&mut out[16..24], self.total_length);
        out[24..HEADER_SIZE].fill(0);
    }

    /// Parse and validate magic, major version and declared length.
    ///
    /// The checksum is parsed but not verified here; see [`verify_checksum`].
    pub fn decode(buf: &[u8]) -> CacheResult<Self> {
        if buf.len() < 4 || buf[0..4] != MAGIC {
            return Err(CacheError::corrupt("bad magic"));
        }
        if buf.len() < HEADER_SIZE {
            return Err(CacheError::corrupt(format!(
                "truncated header: {} of {} bytes",
                buf.len(),
                HEADER_SIZE
            )));
        }
        let header = Header {
            version: LittleEndian::read_u16(&buf[4..6]),
            flags: LittleEndian::read_u16(&buf[6..8]),
            checksum: LittleEndian::read_u64(&buf[8..16]),
            total_length: LittleEndian::read_u64(&buf[16..24]),
        };
        if !is_version_compatible(header.version) {
            return Err(CacheError::VersionMismatch {
                found: header.version,
                supported_major: FORMAT_VERSION_MAJOR,
            });
        }
        if header.total_length != buf.len() as u64 {
            return Err(CacheError::corrupt(format!(
                "length mismatch: header declares {} bytes, buffer has {}",
                header.total_length,
                buf.len()
            )));
        }
        Ok(header)
    }
}

/// Only the major byte must match; minor versions add section types.
pub fn is_version_compatible(version: u16) -> bool {
    (version >> 8) as u8 == FORMAT_VERSION_MAJOR
}

pub fn compute_checksum(buf: &[u8]) -> u64 {
    xxh3_64(buf.get(HEADER_SIZE..).unwrap_or_default())
}

pub fn verify_checksum(header: &Header, buf: &[u8]) -> CacheResult<()> {
    let actual = compute_checksum(buf);
    if actual != header.checksum {
        return Err(CacheError::corrupt(format!(
            "checksum mismatch: expected {:016x}, computed {:016x}",
            header.checksum, actual
        )));
    }
    Ok(())
}

// ============================================================================
// Directory
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionEntry {
    pub code: u16,
    pub offset: u32,
    pub length: u32,
    pub flags: u16,
}

impl SectionEntry {
    pub fn kind(&self) -> Option<SectionKind> {
        SectionKind::from_code(self.code)
    }

    pub fn range(&self) -> Range<usize> {
        let start = self.offset as usize;
        start..start + self.length as usize
    }

    fn encode(&self, out: &mut [u8]) {
        LittleEndian::write_u16(&mut out[0..2], self.code);
        LittleEndian::write_u32(&mut out[2..6], self.offset);
        LittleEndian::write_u32(&mut out[6..10], self.length);
        LittleEndian::write_u16(&mut out[10..12], self.flags);
    }

    fn decode(buf: &[u8]) -> Self {
        SectionEntry {
            code: LittleEndian::read_u16(&buf[0..2]),
            offset: LittleEndian::read_u32(&buf[2..6]),
            length: LittleEndian::read_u32(&buf[6..10]),
            flags: LittleEndian::read_u16(&buf[10..12]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    pub entries: Vec<SectionEntry>,
}

impl Directory {
    /// Byte length of a directory with `count` entries, including the count.
    pub fn encoded_len(count: usize) -> usize {
        4 + count * DIRECTORY_ENTRY_SIZE
    }

    /// Offset of the first byte after the directory.
    pub fn end(&self) -> usize {
        HEADER_SIZE + Self::encoded_len(self.entries.len())
    }

    /// Write the directory into `out`, which starts at `HEADER_SIZE`.
    pub fn encode(&self, out: &mut [u8]) {
        LittleEndian::write_u32(&mut out[0..4], self.entries.len() as u32);
        for (entry, chunk) in self
            .entries
            .iter()
            .zip(out[4..].chunks_exact_mut(DIRECTORY_ENTRY_SIZE))
        {
            entry.encode(chunk);
        }
    }

    /// Read and validate the directory of a buffer whose header has already
    /// been checked.
    ///
    /// Every entry must lie inside `[directory_end, buf.len())` and no two
    /// entries may overlap.
    pub fn decode(buf: &[u8]) -> CacheResult<Self> {
        let count_end = HEADER_SIZE + 4;
        let count = buf
            .get(HEADER_SIZE..count_end)
            .map(LittleEndian::read_u32)
            .ok_or_else(|| CacheError::corrupt("truncated section count"))?
            as usize;
        let dir_end = count
            .checked_mul(DIRECTORY_ENTRY_SIZE)
            .and_then(|n| n.checked_add(count_end))
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| {
                CacheError::corrupt(format!("directory of {count} entries overruns buffer"))
            })?;

        let entries: Vec<SectionEntry> = buf[count_end..dir_end]
            .chunks_exact(DIRECTORY_ENTRY_SIZE)
            .map(SectionEntry::decode)
            .collect();

        for entry in &entries {
            let range = entry.range();
            if range.start < dir_end || range.end > buf.len() {
                return Err(CacheError::corrupt(format!(
                    "section type {} at {}..{} lies outside {}..{}",
                    entry.code,
                    range.start,
                    range.end,
                    dir_end,
                    buf.len()
                )));
            }
        }

        let mut spans: Vec<Range<usize>> = entries.iter().map(SectionEntry::range).collect();
        spans.sort_by_key(|r| r.start);
        if let Some(pair) = spans.windows(2).find(|w| w[0].end > w[1].start) {
            return Err(CacheError::corrupt(format!(
                "overlapping sections {:?} and {:?}",
                pair[0], pair[1]
            )));
        }

        Ok(Directory { entries })
    }

    pub fn find(&self, kind: SectionKind) -> Option<&SectionEntry> {
        self.entries.iter().find(|e| e.code == kind.code())
    }
}
