//! Byte buffer primitives.
//!
//! - [`ByteWriter`]: append-only, little-endian, chunked growth. When the
//!   current chunk cannot hold a write, it is retired into a list and a new
//!   chunk of `max(required, previous chunk size)` is allocated. Bytes are
//!   never moved until [`ByteWriter::build`] concatenates the chunks once,
//!   which bounds copying for outputs in the hundreds of MB.
//! - [`ByteReader`]: bounds-checked cursor over a shared [`Bytes`] buffer.
//!   Bulk reads return [`Column`] views that slice the input without copying.
//! - [`Column`]: a typed column that is either owned (built in memory) or a
//!   view over little-endian bytes (decoded from a cache).

use std::fmt;
use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

use crate::error::DecodeError;

/// Default size of the first writer chunk (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

// ============================================================================
// Scalars
// ============================================================================

/// Fixed-width numeric type with a little-endian wire encoding.
pub trait LeScalar: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const WIDTH: usize;

    /// Decode one value from exactly `WIDTH` bytes.
    fn decode(src: &[u8]) -> Self;

    /// Encode a slice in one pass; `dst.len() == src.len() * WIDTH`.
    fn encode_slice(src: &[Self], dst: &mut [u8]);
}

impl LeScalar for u8 {
    const WIDTH: usize = 1;

    fn decode(src: &[u8]) -> Self {
        src[0]
    }

    fn encode_slice(src: &[Self], dst: &mut [u8]) {
        dst.copy_from_slice(src);
    }
}

macro_rules! le_scalar {
    ($ty:ty, $width:expr, $read:ident, $write_into:ident) => {
        impl LeScalar for $ty {
            const WIDTH: usize = $width;

            fn decode(src: &[u8]) -> Self {
                LittleEndian::$read(src)
            }

            fn encode_slice(src: &[Self], dst: &mut [u8]) {
                LittleEndian::$write_into(src, dst);
            }
        }
    };
}

le_scalar!(u16, 2, read_u16, write_u16_into);
le_scalar!(u32, 4, read_u32, write_u32_into);
le_scalar!(u64, 8, read_u64, write_u64_into);
le_scalar!(i64, 8, read_i64, write_i64_into);
le_scalar!(f64, 8, read_f64, write_f64_into);

// ============================================================================
// Column
// ============================================================================

#[derive(Clone)]
enum Repr<T> {
    Owned(Vec<T>),
    /// Little-endian bytes, `len * WIDTH` long.
    Shared(Bytes),
}

/// A typed column of fixed-width values.
///
/// Columns decoded from a cache keep a reference to the input buffer and
/// decode each element on access; columns built in memory own a `Vec`.
#[derive(Clone)]
pub struct Column<T: LeScalar> {
    repr: Repr<T>,
    _marker: PhantomData<T>,
}

impl<T: LeScalar> Column<T> {
    pub fn from_vec(values: Vec<T>) -> Self {
        Self {
            repr: Repr::Owned(values),
            _marker: PhantomData,
        }
    }

    /// Wrap little-endian bytes. The length must be a multiple of `T::WIDTH`.
    pub fn from_le_bytes(bytes: Bytes) -> Result<Self, DecodeError> {
        if bytes.len() % T::WIDTH != 0 {
            return Err(DecodeError::inconsistent(format!(
                "column byte length {} is not a multiple of {}",
                bytes.len(),
                T::WIDTH
            )));
        }
        Ok(Self {
            repr: Repr::Shared(bytes),
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Owned(v) => v.len(),
            Repr::Shared(b) => b.len() / T::WIDTH,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the column borrows the decoded input instead of owning a copy.
    pub fn is_shared(&self) -> bool {
        matches!(self.repr, Repr::Shared(_))
    }

    pub fn get(&self, index: usize) -> Option<T> {
        match &self.repr {
            Repr::Owned(v) => v.get(index).copied(),
            Repr::Shared(b) => {
                let start = index.checked_mul(T::WIDTH)?;
                let end = start.checked_add(T::WIDTH)?;
                b.get(start..end).map(T::decode)
            }
        }
    }

    pub fn iter(&self) -> ColumnIter<'_, T> {
        ColumnIter {
            column: self,
            next: 0,
            len: self.len(),
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        match &self.repr {
            Repr::Owned(v) => v.clone(),
            Repr::Shared(_) => self.iter().collect(),
        }
    }

    fn write_to(&self, writer: &mut ByteWriter) {
        match &self.repr {
            Repr::Owned(v) => writer.write_array(v),
            Repr::Shared(b) => writer.write_bytes(b),
        }
    }
}

impl<T: LeScalar> Default for Column<T> {
    fn default() -> Self {
        Self::from_vec(Vec::new())
    }
}

impl<T: LeScalar> fmt::Debug for Column<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: LeScalar> PartialEq for Column<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<T: LeScalar> From<Vec<T>> for Column<T> {
    fn from(values: Vec<T>) -> Self {
        Self::from_vec(values)
    }
}

pub struct ColumnIter<'a, T: LeScalar> {
    column: &'a Column<T>,
    next: usize,
    len: usize,
}

impl<T: LeScalar> Iterator for ColumnIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.next >= self.len {
            return None;
        }
        let value = self.column.get(self.next);
        self.next += 1;
        value
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.len - self.next;
        (rest, Some(rest))
    }
}

impl<T: LeScalar> ExactSizeIterator for ColumnIter<'_, T> {}

// ============================================================================
// Writer
// ============================================================================

/// Append-only little-endian writer over growable chunks.
#[derive(Debug)]
pub struct ByteWriter {
    /// Retired, completely filled chunks.
    chunks: Vec<Vec<u8>>,
    current: Vec<u8>,
    /// Total bytes held by `chunks`.
    retired: usize,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunks: Vec::new(),
            current: Vec::with_capacity(chunk_size.max(1)),
            retired: 0,
        }
    }

    /// Absolute write position.
    pub fn position(&self) -> usize {
        self.retired + self.current.len()
    }

    /// Number of chunks allocated so far (including the current one).
    pub fn chunk_count(&self) -> usize {
        self.chunks.len() + 1
    }

    /// Make room for `additional` bytes in the current chunk without
    /// reallocating it.
    fn reserve(&mut self, additional: usize) {
        let free = self.current.capacity() - self.current.len();
        if free >= additional {
            return;
        }
        let next_size = additional.max(self.current.capacity());
        let full = std::mem::replace(&mut self.current, Vec::with_capacity(next_size));
        if !full.is_empty() {
            self.retired += full.len();
            self.chunks.push(full);
        }
    }

    /// Reserve and zero-extend by `n` bytes, returning the new region.
    fn extend(&mut self, n: usize) -> &mut [u8] {
        self.reserve(n);
        let start = self.current.len();
        self.current.resize(start + n, 0);
        &mut self.current[start..]
    }

    pub fn write_u8(&mut self, value: u8) {
        self.reserve(1);
        self.current.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        LittleEndian::write_u16(self.extend(2), value);
    }

    pub fn write_u32(&mut self, value: u32) {
        LittleEndian::write_u32(self.extend(4), value);
    }

    pub fn write_u64(&mut self, value: u64) {
        LittleEndian::write_u64(self.extend(8), value);
    }

    pub fn write_i64(&mut self, value: i64) {
        LittleEndian::write_i64(self.extend(8), value);
    }

    pub fn write_f64(&mut self, value: f64) {
        LittleEndian::write_f64(self.extend(8), value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.current.extend_from_slice(bytes);
    }

    /// Bulk array write: one reservation, one encode pass.
    pub fn write_array<T: LeScalar>(&mut self, values: &[T]) {
        let dst = self.extend(values.len() * T::WIDTH);
        T::encode_slice(values, dst);
    }

    pub fn write_column<T: LeScalar>(&mut self, column: &Column<T>) {
        column.write_to(self);
    }

    /// Length-prefixed UTF-8 (`u32` byte count, no terminator).
    pub fn write_str(&mut self, s: &str) -> Result<(), crate::CacheError> {
        let len = crate::error::len_u32(s.len(), "string length")?;
        self.write_u32(len);
        self.write_bytes(s.as_bytes());
        Ok(())
    }

    /// Pad with zero bytes up to the next multiple of `n`.
    pub fn align(&mut self, n: usize) {
        if n <= 1 {
            return;
        }
        let rem = self.position() % n;
        if rem != 0 {
            self.extend(n - rem);
        }
    }

    /// Concatenate all chunks into the final buffer.
    pub fn build(self) -> Vec<u8> {
        if self.chunks.is_empty() {
            return self.current;
        }
        let mut out = Vec::with_capacity(self.retired + self.current.len());
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out.extend_from_slice(&self.current);
        out
    }
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Bounds-checked little-endian reader.
///
/// Every read past the end yields [`DecodeError::UnexpectedEof`].
#[derive(Debug, Clone)]
pub struct ByteReader {
    buf: Bytes,
    pos: usize,
}

impl ByteReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) -> Result<(), DecodeError> {
        if pos > self.buf.len() {
            return Err(DecodeError::UnexpectedEof {
                position: pos,
                requested: 0,
                available: self.buf.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn check(&self, n: usize) -> Result<usize, DecodeError> {
        match self.pos.checked_add(n) {
            Some(end) if end <= self.buf.len() => Ok(end),
            _ => Err(DecodeError::UnexpectedEof {
                position: self.pos,
                requested: n,
                available: self.buf.len(),
            }),
        }
    }

    fn take(&mut self, n: usize) -> Result<&[u8], DecodeError> {
        let end = self.check(n)?;
        let start = self.pos;
        self.pos = end;
        Ok(&self.buf[start..end])
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.take(2).map(LittleEndian::read_u16)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.take(4).map(LittleEndian::read_u32)
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.take(8).map(LittleEndian::read_u64)
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.take(8).map(LittleEndian::read_i64)
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.take(8).map(LittleEndian::read_f64)
    }

    /// Zero-copy slice of the next `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, DecodeError> {
        let end = self.check(n)?;
        let out = self.buf.slice(self.pos..end);
        self.pos = end;
        Ok(out)
    }

    /// Zero-copy typed view of the next `count` values.
    pub fn read_column<T: LeScalar>(&mut self, count: usize) -> Result<Column<T>, DecodeError> {
        let n = count
            .checked_mul(T::WIDTH)
            .ok_or(DecodeError::UnexpectedEof {
                position: self.pos,
                requested: usize::MAX,
                available: self.buf.len(),
            })?;
        Column::from_le_bytes(self.read_bytes(n)?)
    }

    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let position = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { position })
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.pos = self.check(n)?;
        Ok(())
    }

    /// Skip padding up to the next multiple of `n`.
    pub fn align(&mut self, n: usize) -> Result<(), DecodeError> {
        if n <= 1 {
            return Ok(());
        }
        let rem = self.pos % n;
        if rem != 0 {
            self.skip(n - rem)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let mut w = ByteWriter::with_chunk_size(4);
        w.write_u16(0x0102);
        w.write_u32(0x0304_0506);
        let bytes = w.build();
        assert_eq!(bytes, vec![0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn test_chunk_growth_keeps_order() {
        let mut w = ByteWriter::with_chunk_size(8);
        for i in 0..100u32 {
            w.write_u32(i);
        }
        // 8-byte chunks hold two values each.
        assert_eq!(w.chunk_count(), 50);
        assert_eq!(w.position(), 400);

        let mut r = ByteReader::new(Bytes::from(w.build()));
        for i in 0..100u32 {
            assert_eq!(r.read_u32().unwrap(), i);
        }
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_oversized_write_gets_its_own_chunk() {
        let mut w = ByteWriter::with_chunk_size(4);
        w.write_u8(1);
        w.write_bytes(&[7u8; 64]);
        assert_eq!(w.chunk_count(), 2);
        w.write_u8(2);
        let out = w.build();
        assert_eq!(out.len(), 66);
        assert_eq!(out[0], 1);
        assert_eq!(out[65], 2);
    }

    #[test]
    fn test_align_pads_with_zeros() {
        let mut w = ByteWriter::new();
        w.write_u8(0xff);
        w.align(8);
        assert_eq!(w.position(), 8);
        w.align(8);
        assert_eq!(w.position(), 8);
        let out = w.build();
        assert!(out[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_strings_are_length_prefixed() {
        let mut w = ByteWriter::new();
        w.write_str("a\0b").unwrap();
        w.write_str("").unwrap();
        let mut r = ByteReader::new(Bytes::from(w.build()));
        assert_eq!(r.read_str().unwrap(), "a\0b");
        assert_eq!(r.read_str().unwrap(), "");
    }

    #[test]
    fn test_column_view_is_zero_copy() {
        let mut w = ByteWriter::new();
        w.write_array(&[10u32, 20, 30]);
        w.write_array(&[1.5f64, -2.0]);
        let mut r = ByteReader::new(Bytes::from(w.build()));

        let ints: Column<u32> = r.read_column(3).unwrap();
        let reals: Column<f64> = r.read_column(2).unwrap();
        assert!(ints.is_shared());
        assert_eq!(ints.to_vec(), vec![10, 20, 30]);
        assert_eq!(reals.get(1), Some(-2.0));
        assert_eq!(reals.get(2), None);
        assert_eq!(ints, Column::from_vec(vec![10, 20, 30]));
    }

    #[test]
    fn test_shared_column_rewrites_verbatim() {
        let mut w = ByteWriter::new();
        w.write_array(&[0xdead_beefu32, 7]);
        let first = w.build();

        let mut r = ByteReader::new(Bytes::from(first.clone()));
        let col: Column<u32> = r.read_column(2).unwrap();
        let mut w2 = ByteWriter::new();
        w2.write_column(&col);
        assert_eq!(w2.build(), first);
    }

    #[test]
    fn test_reads_past_end_are_errors() {
        let mut r = ByteReader::new(Bytes::from_static(&[1, 2, 3]));
        assert!(matches!(
            r.read_u32(),
            Err(DecodeError::UnexpectedEof {
                position: 0,
                requested: 4,
                available: 3
            })
        ));
        assert_eq!(r.position(), 0);
        assert!(r.read_column::<u64>(usize::MAX).is_err());
        assert!(r.skip(4).is_err());
        assert!(r.set_position(4).is_err());
        r.set_position(3).unwrap();
        assert!(r.read_u8().is_err());
    }

    #[test]
    fn test_invalid_utf8_is_reported() {
        let mut w = ByteWriter::new();
        w.write_u32(2);
        w.write_bytes(&[0xc3, 0x28]);
        let mut r = ByteReader::new(Bytes::from(w.build()));
        assert_eq!(
            r.read_str(),
            Err(DecodeError::InvalidUtf8 { position: 4 })
        );
    }
}
