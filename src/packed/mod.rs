//! Packed entries: the four on-disk codecs (empty, standard, texture,
//! model) and the unpackers/packers that translate between them and raw
//! decoded bytes.
//!
//! A [`PackedStream`] is a typed view `(path_spec, stream, offset,
//! length)` over one entry's region of a dat file; its `entry_type` byte
//! selects which codec submodule handles unpacking and packing.

pub mod empty;
pub mod model;
pub mod standard;
pub mod texture;

use crate::error::{Error, Result};
use crate::path_spec::PathSpec;
use crate::stream::{read_vec, Stream};
use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;

pub const PACKED_ENTRY_HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedType {
    Empty,
    Standard,
    Model,
    Texture,
}

impl PackedType {
    pub fn from_u32(v: u32) -> Result<Self> {
        match v {
            1 => Ok(PackedType::Empty),
            2 => Ok(PackedType::Standard),
            3 => Ok(PackedType::Model),
            4 => Ok(PackedType::Texture),
            other => Err(Error::bad_data(format!("unknown packed entry type {other}"))),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            PackedType::Empty => 1,
            PackedType::Standard => 2,
            PackedType::Model => 3,
            PackedType::Texture => 4,
        }
    }
}

/// The 24-byte header common to every packed entry.
#[derive(Debug, Clone, Copy)]
pub struct PackedEntryHeader {
    pub entry_type: PackedType,
    pub decompressed_size: u32,
    /// In 128-byte units. A strict reader verifies this equals `space_used`
    /// rather than trusting it blindly.
    pub block_buffer_size: u32,
    /// This entry's total on-disk footprint (header, type-specific tables,
    /// and block body, all rounded up together), in 128-byte units.
    pub space_used: u32,
    pub block_count_or_version: u32,
}

impl PackedEntryHeader {
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PACKED_ENTRY_HEADER_SIZE {
            return Err(Error::UnexpectedEof {
                wanted: PACKED_ENTRY_HEADER_SIZE,
                got: bytes.len(),
            });
        }
        let header_size = LittleEndian::read_u32(&bytes[0..]);
        if header_size as usize != PACKED_ENTRY_HEADER_SIZE {
            return Err(Error::bad_data(format!(
                "packed entry header size {header_size}, expected {PACKED_ENTRY_HEADER_SIZE}"
            )));
        }
        let entry_type = PackedType::from_u32(LittleEndian::read_u32(&bytes[4..]))?;
        let decompressed_size = LittleEndian::read_u32(&bytes[8..]);
        let block_buffer_size = LittleEndian::read_u32(&bytes[12..]);
        let space_used = LittleEndian::read_u32(&bytes[16..]);
        let block_count_or_version = LittleEndian::read_u32(&bytes[20..]);
        Ok(Self { entry_type, decompressed_size, block_buffer_size, space_used, block_count_or_version })
    }

    pub fn write(&self, buf: &mut [u8; PACKED_ENTRY_HEADER_SIZE]) {
        LittleEndian::write_u32(&mut buf[0..], PACKED_ENTRY_HEADER_SIZE as u32);
        LittleEndian::write_u32(&mut buf[4..], self.entry_type.as_u32());
        LittleEndian::write_u32(&mut buf[8..], self.decompressed_size);
        LittleEndian::write_u32(&mut buf[12..], self.block_buffer_size);
        LittleEndian::write_u32(&mut buf[16..], self.space_used);
        LittleEndian::write_u32(&mut buf[20..], self.block_count_or_version);
    }

    /// Verify `block_buffer_size == space_used`. Writers fill this field in
    /// but never read it back for validation; a strict reader checks it
    /// anyway.
    pub fn verify_strict(&self) -> Result<()> {
        if self.block_buffer_size != self.space_used {
            return Err(Error::bad_data(format!(
                "block_buffer_size {} disagrees with space_used {}",
                self.block_buffer_size, self.space_used
            )));
        }
        Ok(())
    }
}

/// A typed view over one entry's region of a data file.
#[derive(Clone)]
pub struct PackedStream {
    path_spec: PathSpec,
    stream: Arc<dyn Stream>,
    offset: u64,
    length: u64,
}

impl PackedStream {
    pub fn new(path_spec: PathSpec, stream: Arc<dyn Stream>, offset: u64, length: u64) -> Self {
        Self { path_spec, stream, offset, length }
    }

    pub fn path_spec(&self) -> &PathSpec {
        &self.path_spec
    }

    pub fn stream(&self) -> &Arc<dyn Stream> {
        &self.stream
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn header(&self) -> Result<PackedEntryHeader> {
        let bytes = read_vec(self.stream.as_ref(), self.offset, PACKED_ENTRY_HEADER_SIZE)?;
        PackedEntryHeader::read(&bytes)
    }

    pub fn packed_type(&self) -> Result<PackedType> {
        Ok(self.header()?.entry_type)
    }

    /// Read `len` bytes at `at` relative to the start of this packed
    /// stream's region (i.e. `self.offset + at` in the underlying stream).
    pub fn read_region(&self, at: u64, len: usize) -> Result<Vec<u8>> {
        read_vec(self.stream.as_ref(), self.offset + at, len)
    }
}

/// Random-access decoder for one packed entry's decoded bytes.
pub trait Unpacker: Send {
    fn decompressed_size(&self) -> u64;

    /// Read up to `buf.len()` decoded bytes at `offset`; returns the
    /// number of bytes written, short only at end-of-entry.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.read_at(offset, buf)?;
        if n != buf.len() {
            return Err(Error::UnexpectedEof { wanted: buf.len(), got: n });
        }
        Ok(())
    }
}

/// Build the appropriate unpacker for `packed` by reading its header and
/// dispatching on entry type.
pub fn unpack(packed: &PackedStream) -> Result<Box<dyn Unpacker>> {
    let header = packed.header()?;
    match header.entry_type {
        PackedType::Empty => Ok(Box::new(empty::EmptyUnpacker::new(packed, header)?)),
        PackedType::Standard => Ok(Box::new(standard::StandardUnpacker::new(packed, header)?)),
        PackedType::Texture => Ok(Box::new(texture::TextureUnpacker::new(packed, header)?)),
        PackedType::Model => Ok(Box::new(model::ModelUnpacker::new(packed, header)?)),
    }
}

/// Shared block-sizing policy for passthrough packers and as the base case
/// for compressing packers: split into 16000-byte decompressed chunks,
/// footprint `align_128(16 + chunk_size)`.
pub(crate) fn chunk_boundaries(total_len: u64) -> Vec<(u64, u64)> {
    use crate::block::MAX_DECOMPRESSED_BLOCK_SIZE as CHUNK;
    if total_len == 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut pos = 0u64;
    while pos < total_len {
        let len = (total_len - pos).min(CHUNK as u64);
        out.push((pos, len));
        pos += len;
    }
    out
}
