//! Standard binary entries: a flat array of block locators followed by
//! that many compressed blocks, decoded sequentially.

use super::{PackedEntryHeader, PackedStream, PackedType, Unpacker, PACKED_ENTRY_HEADER_SIZE};
use crate::block::{self, align_128, BlockDescriptor, CommonBlockDecoder, BLOCK_HEADER_SIZE};
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;

const BLOCK_LOCATOR_SIZE: usize = 8; // offset u32, block_size u16, decompressed_size u16

#[derive(Debug, Clone, Copy)]
struct BlockLocator {
    /// Byte offset of this block, relative to the start of the block-data
    /// region (immediately after the locator table).
    offset: u32,
    /// On-disk footprint of the block (header + body + padding).
    block_size: u16,
    decompressed_size: u16,
}

fn read_locators(bytes: &[u8], count: usize) -> Result<Vec<BlockLocator>> {
    let need = count * BLOCK_LOCATOR_SIZE;
    if bytes.len() < need {
        return Err(Error::UnexpectedEof { wanted: need, got: bytes.len() });
    }
    let mut out = Vec::with_capacity(count);
    for chunk in bytes[..need].chunks_exact(BLOCK_LOCATOR_SIZE) {
        out.push(BlockLocator {
            offset: LittleEndian::read_u32(&chunk[0..]),
            block_size: LittleEndian::read_u16(&chunk[4..]),
            decompressed_size: LittleEndian::read_u16(&chunk[6..]),
        });
    }
    Ok(out)
}

fn write_locators(locators: &[BlockLocator]) -> Vec<u8> {
    let mut out = vec![0u8; locators.len() * BLOCK_LOCATOR_SIZE];
    for (chunk, loc) in out.chunks_exact_mut(BLOCK_LOCATOR_SIZE).zip(locators) {
        LittleEndian::write_u32(&mut chunk[0..], loc.offset);
        LittleEndian::write_u16(&mut chunk[4..], loc.block_size);
        LittleEndian::write_u16(&mut chunk[6..], loc.decompressed_size);
    }
    out
}

pub struct StandardUnpacker {
    decompressed_size: u64,
    /// `(descriptor, decoded_start, decoded_len)` in ascending order.
    blocks: Vec<(BlockDescriptor, u64, u64)>,
    stream: Arc<dyn crate::stream::Stream>,
    base_offset: u64,
    decoder: CommonBlockDecoder,
}

impl StandardUnpacker {
    pub fn new(packed: &PackedStream, header: PackedEntryHeader) -> Result<Self> {
        let block_count = header.block_count_or_version as usize;
        let table_bytes =
            packed.read_region(PACKED_ENTRY_HEADER_SIZE as u64, block_count * BLOCK_LOCATOR_SIZE)?;
        let locators = read_locators(&table_bytes, block_count)?;

        let data_region_start =
            PACKED_ENTRY_HEADER_SIZE as u64 + (block_count * BLOCK_LOCATOR_SIZE) as u64;

        let mut blocks = Vec::with_capacity(block_count);
        let mut decoded_cursor = 0u64;
        for loc in &locators {
            let descriptor = BlockDescriptor {
                offset_in_stream: data_region_start + loc.offset as u64,
                known_size: loc.block_size as u32,
            };
            blocks.push((descriptor, decoded_cursor, loc.decompressed_size as u64));
            decoded_cursor += loc.decompressed_size as u64;
        }

        if decoded_cursor != header.decompressed_size as u64 {
            return Err(Error::bad_data(format!(
                "standard entry locator table sums to {decoded_cursor} decoded bytes, header declares {}",
                header.decompressed_size
            )));
        }

        Ok(Self {
            decompressed_size: header.decompressed_size as u64,
            blocks,
            stream: packed.stream().clone(),
            base_offset: packed.offset(),
            decoder: CommonBlockDecoder::new(),
        })
    }
}

impl Unpacker for StandardUnpacker {
    fn decompressed_size(&self) -> u64 {
        self.decompressed_size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.decompressed_size {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.decompressed_size - offset) as usize;
        let out = &mut buf[..want];

        let base_offset = self.base_offset;
        let stream = self.stream.clone();
        let mut read_stream = |stream_offset: u64, dst: &mut [u8]| -> Result<()> {
            crate::stream::read_fully(stream.as_ref(), base_offset + stream_offset, dst)
        };

        self.decoder.read(out, offset, &self.blocks, &mut read_stream)?;
        Ok(want)
    }
}

/// Split `total_len` into block chunks, compress each (or keep raw when
/// smaller), and assemble a complete standard packed entry buffer.
///
/// Each chunk compresses independently of every other, so with the
/// `parallel` feature enabled this fans the work out across Rayon's
/// global pool; without it, chunks compress sequentially in order.
pub fn pack_compressing(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let chunks = super::chunk_boundaries(data.len() as u64);
    let bodies = compress_chunks(data, &chunks, level)?;
    assemble(data.len() as u32, &chunks, &bodies)
}

fn compress_one(data: &[u8], start: u64, len: u64, level: u32) -> Result<(Vec<u8>, bool)> {
    let raw = &data[start as usize..(start + len) as usize];
    let compressed = block::deflate(raw, level)?;
    Ok(if compressed.len() < raw.len() { (compressed, false) } else { (raw.to_vec(), true) })
}

#[cfg(feature = "parallel")]
fn compress_chunks(data: &[u8], chunks: &[(u64, u64)], level: u32) -> Result<Vec<(Vec<u8>, bool)>> {
    use rayon::prelude::*;
    chunks.par_iter().map(|&(start, len)| compress_one(data, start, len, level)).collect()
}

#[cfg(not(feature = "parallel"))]
fn compress_chunks(data: &[u8], chunks: &[(u64, u64)], level: u32) -> Result<Vec<(Vec<u8>, bool)>> {
    chunks.iter().map(|&(start, len)| compress_one(data, start, len, level)).collect()
}

/// Present `data` as a standard entry without compressing: every block is
/// stored with the raw-marker sentinel.
pub fn pack_passthrough(data: &[u8]) -> Result<Vec<u8>> {
    let chunks = super::chunk_boundaries(data.len() as u64);
    let bodies: Vec<(Vec<u8>, bool)> = chunks
        .iter()
        .map(|&(start, len)| (data[start as usize..(start + len) as usize].to_vec(), true))
        .collect();
    assemble(data.len() as u32, &chunks, &bodies)
}

fn assemble(
    decompressed_size: u32,
    chunks: &[(u64, u64)],
    bodies: &[(Vec<u8>, bool)],
) -> Result<Vec<u8>> {
    let mut locators = Vec::with_capacity(chunks.len());
    let mut block_bytes = Vec::new();
    let mut running_offset = 0u32;

    for ((_, decoded_len), (body, is_raw)) in chunks.iter().zip(bodies) {
        let mut header_buf = [0u8; BLOCK_HEADER_SIZE];
        let bh = crate::block::BlockHeader {
            compressed_size_or_raw_marker: if *is_raw { block::RAW_MARKER } else { body.len() as u32 },
            decompressed_size: *decoded_len as u32,
        };
        bh.write(&mut header_buf);

        let footprint = align_128(BLOCK_HEADER_SIZE + body.len());
        locators.push(BlockLocator {
            offset: running_offset,
            block_size: footprint as u16,
            decompressed_size: *decoded_len as u16,
        });

        block_bytes.extend_from_slice(&header_buf);
        block_bytes.extend_from_slice(body);
        block_bytes.resize(block_bytes.len() + (footprint - BLOCK_HEADER_SIZE - body.len()), 0);
        running_offset += footprint as u32;
    }

    let table_bytes = write_locators(&locators);
    let total_len = PACKED_ENTRY_HEADER_SIZE + table_bytes.len() + block_bytes.len();
    let footprint = align_128(total_len);
    let space_used = footprint / 128;

    let header = PackedEntryHeader {
        entry_type: PackedType::Standard,
        decompressed_size,
        block_buffer_size: space_used as u32,
        space_used: space_used as u32,
        block_count_or_version: locators.len() as u32,
    };

    let mut out = vec![0u8; PACKED_ENTRY_HEADER_SIZE];
    header.write(out.as_mut_slice().try_into().unwrap());
    out.extend_from_slice(&table_bytes);
    out.extend_from_slice(&block_bytes);
    out.resize(footprint, 0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_spec::{ArchiveId, PathSpec};
    use crate::stream::MemoryStream;
    use std::sync::Arc;

    fn as_packed(bytes: Vec<u8>) -> PackedStream {
        let len = bytes.len() as u64;
        let stream: Arc<dyn crate::stream::Stream> = Arc::new(MemoryStream::new(bytes));
        PackedStream::new(PathSpec::empty(ArchiveId::new(0, 0, 0)), stream, 0, len)
    }

    #[test]
    fn compressing_pack_round_trips() {
        let data: Vec<u8> = (0..40000u32).map(|i| (i % 251) as u8).collect();
        let packed_bytes = pack_compressing(&data, 6).unwrap();
        let packed = as_packed(packed_bytes);
        let header = packed.header().unwrap();
        let mut unpacker = StandardUnpacker::new(&packed, header).unwrap();
        assert_eq!(unpacker.decompressed_size(), data.len() as u64);

        let mut out = vec![0u8; data.len()];
        unpacker.read_exact_at(0, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn passthrough_round_trips() {
        let data = b"some raw asset bytes, not worth compressing".to_vec();
        let packed_bytes = pack_passthrough(&data).unwrap();
        let packed = as_packed(packed_bytes);
        let header = packed.header().unwrap();
        let mut unpacker = StandardUnpacker::new(&packed, header).unwrap();
        let mut out = vec![0u8; data.len()];
        unpacker.read_exact_at(0, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn arbitrary_chunk_sizes_yield_same_total_bytes() {
        let data: Vec<u8> = (0..20000u32).map(|i| (i * 7 % 256) as u8).collect();
        let packed_bytes = pack_compressing(&data, 6).unwrap();
        let packed = as_packed(packed_bytes);

        for chunk_size in [1usize, 17, 4096, data.len()] {
            let header = packed.header().unwrap();
            let mut unpacker = StandardUnpacker::new(&packed, header).unwrap();
            let mut collected = Vec::with_capacity(data.len());
            let mut offset = 0u64;
            let mut buf = vec![0u8; chunk_size.max(1)];
            loop {
                let n = unpacker.read_at(offset, &mut buf).unwrap();
                if n == 0 {
                    break;
                }
                collected.extend_from_slice(&buf[..n]);
                offset += n as u64;
            }
            assert_eq!(collected, data);
        }
    }

    #[test]
    fn read_past_end_returns_zero_bytes() {
        let data = b"short".to_vec();
        let packed_bytes = pack_passthrough(&data).unwrap();
        let packed = as_packed(packed_bytes);
        let header = packed.header().unwrap();
        let mut unpacker = StandardUnpacker::new(&packed, header).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(unpacker.read_at(data.len() as u64, &mut buf).unwrap(), 0);
    }
}
