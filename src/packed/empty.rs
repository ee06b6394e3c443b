//! Empty/placeholder entries: reserved slots and obfuscated resources
//! whose payload is either a single DEFLATE-packed header block or raw
//! bytes immediately following the entry header.

use super::{PackedEntryHeader, PackedStream, PackedType, Unpacker, PACKED_ENTRY_HEADER_SIZE};
use crate::block::{self, BlockHeader, BLOCK_HEADER_SIZE};
use crate::error::Result;
use std::sync::Arc;

pub struct EmptyUnpacker {
    decompressed_size: u64,
    body: EmptyBody,
}

enum EmptyBody {
    /// Payload was a single compressed block; decoded once at construction.
    Cached(Vec<u8>),
    /// Payload is raw bytes immediately after the header.
    Raw { stream: Arc<dyn crate::stream::Stream>, base_offset: u64 },
}

impl EmptyUnpacker {
    pub fn new(packed: &PackedStream, header: PackedEntryHeader) -> Result<Self> {
        let decompressed_size = header.decompressed_size as u64;
        // "smaller than the block-count field": the source stores a tiny
        // compressed header block whose on-disk size fits within the units
        // named by block_count_or_version.
        let body = if decompressed_size < header.block_count_or_version as u64 {
            let block_start = PACKED_ENTRY_HEADER_SIZE as u64;
            let hbytes = packed.read_region(block_start, BLOCK_HEADER_SIZE)?;
            let bh = BlockHeader::read(&hbytes)?;
            let body_bytes =
                packed.read_region(block_start + BLOCK_HEADER_SIZE as u64, bh.body_size())?;
            let decoded = if bh.is_raw() {
                body_bytes
            } else {
                block::inflate(&body_bytes, bh.decompressed_size as usize)?
            };
            EmptyBody::Cached(decoded)
        } else {
            EmptyBody::Raw {
                stream: packed.stream().clone(),
                base_offset: packed.offset() + PACKED_ENTRY_HEADER_SIZE as u64,
            }
        };

        Ok(Self { decompressed_size, body })
    }
}

impl Unpacker for EmptyUnpacker {
    fn decompressed_size(&self) -> u64 {
        self.decompressed_size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.decompressed_size {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.decompressed_size - offset) as usize;
        match &self.body {
            EmptyBody::Cached(data) => {
                let start = offset as usize;
                let n = want.min(data.len().saturating_sub(start));
                buf[..n].copy_from_slice(&data[start..start + n]);
                Ok(n)
            }
            EmptyBody::Raw { stream, base_offset } => {
                let n = stream.read_at(base_offset + offset, &mut buf[..want])?;
                Ok(n)
            }
        }
    }
}

/// Build a passthrough empty entry: header only, optionally followed by
/// raw bytes taken verbatim from `payload` (used for reserved slots of a
/// known size with no real content, or pre-obfuscated resources).
pub fn pack_passthrough(payload: &[u8]) -> Vec<u8> {
    let footprint = block::align_128(PACKED_ENTRY_HEADER_SIZE + payload.len());
    let space_used = footprint / 128;
    let header = PackedEntryHeader {
        entry_type: PackedType::Empty,
        decompressed_size: payload.len() as u32,
        block_buffer_size: space_used as u32,
        space_used: space_used as u32,
        // Larger than decompressed_size whenever payload is non-empty raw
        // bytes, so the unpacker takes the "already raw" branch.
        block_count_or_version: 0,
    };
    let mut out = vec![0u8; PACKED_ENTRY_HEADER_SIZE];
    header.write(out.as_mut_slice().try_into().unwrap());
    out.extend_from_slice(payload);
    out.resize(footprint, 0);
    out
}

/// Build a compressed empty entry out of a single DEFLATE-packed block
/// holding the payload, used for small reserved headers.
pub fn pack_compressed(payload: &[u8], level: u32) -> Result<Vec<u8>> {
    let compressed = block::deflate(payload, level)?;
    let use_raw = compressed.len() >= payload.len();
    let body = if use_raw { payload } else { &compressed };
    let block_header = BlockHeader {
        compressed_size_or_raw_marker: if use_raw { block::RAW_MARKER } else { body.len() as u32 },
        decompressed_size: payload.len() as u32,
    };

    let mut block_buf = [0u8; BLOCK_HEADER_SIZE];
    block_header.write(&mut block_buf);
    let block_footprint = block::align_128(BLOCK_HEADER_SIZE + body.len());
    let footprint = block::align_128(PACKED_ENTRY_HEADER_SIZE + block_footprint);
    let space_used = footprint / 128;

    // block_count_or_version set larger than decompressed_size so the
    // unpacker takes the cached/compressed-header branch.
    let header = PackedEntryHeader {
        entry_type: PackedType::Empty,
        decompressed_size: payload.len() as u32,
        block_buffer_size: space_used as u32,
        space_used: space_used as u32,
        block_count_or_version: payload.len() as u32 + 1,
    };
    let mut out = vec![0u8; PACKED_ENTRY_HEADER_SIZE];
    header.write(out.as_mut_slice().try_into().unwrap());
    out.extend_from_slice(&block_buf);
    out.extend_from_slice(body);
    out.resize(footprint, 0);
    Ok(out)
}
