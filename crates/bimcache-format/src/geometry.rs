//! Embedded geometry section.
//!
//! The payload is an opaque mesh container produced by the geometry
//! pipeline. This crate only frames it; decoding goes through a
//! [`MeshContainerCodec`] supplied by the caller.
//!
//! Layout: `container_tag:4`, `reserved:4`, `length:8`, then `length`
//! payload bytes starting on an 8-byte boundary.

use bytes::Bytes;

use crate::buffer::{ByteReader, ByteWriter};
use crate::error::{CacheError, CacheResult, DecodeError};

/// Peer codec for the nested mesh container.
pub trait MeshContainerCodec {
    type Container;
    type Mapping;
    type MeshData;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Parse the container structure.
    fn parse(&self, bytes: &[u8]) -> Result<Self::Container, Self::Error>;

    /// Express id → mesh mapping carried by a parsed container.
    fn extract_mapping(&self, container: &Self::Container) -> Result<Self::Mapping, Self::Error>;

    /// Parse straight to renderable mesh data.
    fn parse_to_mesh_data(&self, bytes: &[u8]) -> Result<Self::MeshData, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryPayload {
    container_tag: [u8; 4],
    data: Bytes,
}

impl GeometryPayload {
    pub fn new(container_tag: [u8; 4], data: impl Into<Bytes>) -> Self {
        Self {
            container_tag,
            data: data.into(),
        }
    }

    /// Four-byte identifier of the nested container format.
    pub fn container_tag(&self) -> [u8; 4] {
        self.container_tag
    }

    /// Raw payload. When loaded from a cache this is a view into the input.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Parse the container and extract its mapping.
    pub fn decode_with<C: MeshContainerCodec>(
        &self,
        codec: &C,
    ) -> CacheResult<(C::Container, C::Mapping)> {
        let container = codec.parse(&self.data).map_err(geometry_error)?;
        let mapping = codec.extract_mapping(&container).map_err(geometry_error)?;
        Ok((container, mapping))
    }

    pub fn mesh_data_with<C: MeshContainerCodec>(&self, codec: &C) -> CacheResult<C::MeshData> {
        codec.parse_to_mesh_data(&self.data).map_err(geometry_error)
    }

    pub fn encode(&self, w: &mut ByteWriter) -> CacheResult<()> {
        w.write_bytes(&self.container_tag);
        w.write_u32(0);
        w.write_u64(self.data.len() as u64);
        w.align(8);
        w.write_bytes(&self.data);
        Ok(())
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self, DecodeError> {
        let tag = r.read_bytes(4)?;
        let mut container_tag = [0u8; 4];
        container_tag.copy_from_slice(&tag);
        r.skip(4)?;
        let length = usize::try_from(r.read_u64()?)
            .map_err(|_| DecodeError::inconsistent("geometry payload length overflows"))?;
        r.align(8)?;
        let data = r.read_bytes(length)?;
        Ok(Self {
            container_tag,
            data,
        })
    }
}

fn geometry_error<E: std::error::Error + Send + Sync + 'static>(err: E) -> CacheError {
    CacheError::Geometry(Box::new(err))
}
