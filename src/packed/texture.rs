//! Texture entries: a head region (verbatim texture header + mipmap
//! offset table) followed by per-mipmap compressed block runs.
//!
//! Some archives store a texture's mipmap chain more than once back to
//! back (array textures, cubemap faces); the unpacker infers this repeat
//! count from the spacing between the first two mipmap offsets rather
//! than trusting a stored field, per the on-disk format's own ambiguity.

use super::{PackedEntryHeader, PackedStream, PackedType, Unpacker, PACKED_ENTRY_HEADER_SIZE};
use crate::block::{self, align_128, BlockDescriptor, CommonBlockDecoder, BLOCK_HEADER_SIZE};
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;

const MIPMAP_LOCATOR_SIZE: usize = 20; // compressed_offset, compressed_size, decompressed_size, first_block_index, block_count (5 x u32)
const TEXTURE_HEADER_FIXED_SIZE: usize = 28;

#[derive(Debug, Clone, Copy)]
struct MipmapLocator {
    compressed_offset: u32,
    #[allow(dead_code)]
    compressed_size: u32,
    decompressed_size: u32,
    first_block_index: u32,
    block_count: u32,
}

/// Verbatim fixed texture header fields, shared by every mipmap repeat.
#[derive(Debug, Clone, Copy)]
pub struct TextureHeader {
    pub attribute: u32,
    pub format: u32,
    pub width: u16,
    pub height: u16,
    pub depth: u16,
    pub mipmap_count: u8,
    pub array_size: u8,
    pub lod_offsets: [u32; 3],
}

impl TextureHeader {
    fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TEXTURE_HEADER_FIXED_SIZE {
            return Err(Error::UnexpectedEof { wanted: TEXTURE_HEADER_FIXED_SIZE, got: bytes.len() });
        }
        Ok(Self {
            attribute: LittleEndian::read_u32(&bytes[0..]),
            format: LittleEndian::read_u32(&bytes[4..]),
            width: LittleEndian::read_u16(&bytes[8..]),
            height: LittleEndian::read_u16(&bytes[10..]),
            depth: LittleEndian::read_u16(&bytes[12..]),
            mipmap_count: bytes[14],
            array_size: bytes[15],
            lod_offsets: [
                LittleEndian::read_u32(&bytes[16..]),
                LittleEndian::read_u32(&bytes[20..]),
                LittleEndian::read_u32(&bytes[24..]),
            ],
        })
    }

    fn write(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..], self.attribute);
        LittleEndian::write_u32(&mut buf[4..], self.format);
        LittleEndian::write_u16(&mut buf[8..], self.width);
        LittleEndian::write_u16(&mut buf[10..], self.height);
        LittleEndian::write_u16(&mut buf[12..], self.depth);
        buf[14] = self.mipmap_count;
        buf[15] = self.array_size;
        LittleEndian::write_u32(&mut buf[16..], self.lod_offsets[0]);
        LittleEndian::write_u32(&mut buf[20..], self.lod_offsets[1]);
        LittleEndian::write_u32(&mut buf[24..], self.lod_offsets[2]);
    }

    /// Natural (uncompressed-payload) byte size of mip level `level`,
    /// used only to infer the mipmap-chain repeat count — not to decode
    /// pixels, which stays out of scope.
    fn mip_level_size(&self, level: u32) -> u32 {
        let w = (self.width as u32 >> level).max(1);
        let h = (self.height as u32 >> level).max(1);
        match self.format {
            FORMAT_BC1 => ((w + 3) / 4).max(1) * ((h + 3) / 4).max(1) * 8,
            FORMAT_BC2 | FORMAT_BC3 | FORMAT_BC5 | FORMAT_BC7 => {
                ((w + 3) / 4).max(1) * ((h + 3) / 4).max(1) * 16
            }
            FORMAT_L8 => w * h,
            _ => w * h * 4, // default: 32bpp
        }
    }
}

const FORMAT_L8: u32 = 0x1130;
const FORMAT_BC1: u32 = 0x3420;
const FORMAT_BC2: u32 = 0x3430;
const FORMAT_BC3: u32 = 0x3431;
const FORMAT_BC5: u32 = 0x6230;
const FORMAT_BC7: u32 = 0x6432;

pub struct TextureUnpacker {
    decompressed_size: u64,
    head: Vec<u8>, // texture header + mipmap offset table, served verbatim
    blocks: Vec<(BlockDescriptor, u64, u64)>,
    stream: Arc<dyn crate::stream::Stream>,
    base_offset: u64,
    decoder: CommonBlockDecoder,
}

impl TextureUnpacker {
    pub fn new(packed: &PackedStream, header: PackedEntryHeader) -> Result<Self> {
        let mip_count_on_disk = header.block_count_or_version as usize;
        let locator_table_bytes = packed.read_region(
            PACKED_ENTRY_HEADER_SIZE as u64,
            mip_count_on_disk * MIPMAP_LOCATOR_SIZE,
        )?;
        let mut mip_locators = Vec::with_capacity(mip_count_on_disk);
        for chunk in locator_table_bytes.chunks_exact(MIPMAP_LOCATOR_SIZE) {
            mip_locators.push(MipmapLocator {
                compressed_offset: LittleEndian::read_u32(&chunk[0..]),
                compressed_size: LittleEndian::read_u32(&chunk[4..]),
                decompressed_size: LittleEndian::read_u32(&chunk[8..]),
                first_block_index: LittleEndian::read_u32(&chunk[12..]),
                block_count: LittleEndian::read_u32(&chunk[16..]),
            });
        }

        let total_block_count: u32 = mip_locators.iter().map(|m| m.block_count).sum();
        let sub_block_sizes_offset =
            PACKED_ENTRY_HEADER_SIZE as u64 + (mip_count_on_disk * MIPMAP_LOCATOR_SIZE) as u64;
        let sub_block_sizes_bytes =
            packed.read_region(sub_block_sizes_offset, total_block_count as usize * 2)?;
        let mut sub_block_sizes = Vec::with_capacity(total_block_count as usize);
        for chunk in sub_block_sizes_bytes.chunks_exact(2) {
            sub_block_sizes.push(LittleEndian::read_u16(chunk));
        }

        let head_region_offset = sub_block_sizes_offset + (total_block_count as u64 * 2);
        let texture_header_bytes =
            packed.read_region(head_region_offset, TEXTURE_HEADER_FIXED_SIZE)?;
        let tex_header = TextureHeader::read(&texture_header_bytes)?;
        let mip_offsets_bytes = packed.read_region(
            head_region_offset + TEXTURE_HEADER_FIXED_SIZE as u64,
            tex_header.mipmap_count as usize * 4,
        )?;
        let mut mip_offsets = Vec::with_capacity(tex_header.mipmap_count as usize);
        for chunk in mip_offsets_bytes.chunks_exact(4) {
            mip_offsets.push(LittleEndian::read_u32(chunk));
        }

        let mut head = Vec::with_capacity(TEXTURE_HEADER_FIXED_SIZE + mip_offsets_bytes.len());
        head.extend_from_slice(&texture_header_bytes);
        head.extend_from_slice(&mip_offsets_bytes);

        // Infer repeat count from offset spacing between the first two
        // mipmaps; detect (rather than silently mis-decode) a non-uniform
        // repeat.
        let repeat = if mip_offsets.len() >= 2 && mip_locators.len() >= 2 {
            let spacing = mip_offsets[1].saturating_sub(mip_offsets[0]) as u64;
            let natural = tex_header.mip_level_size(0) as u64;
            if natural == 0 {
                1
            } else if spacing % natural == 0 && spacing / natural >= 1 {
                spacing / natural
            } else if spacing == 0 {
                1
            } else {
                return Err(Error::bad_data("non-uniform mipmap repeat"));
            }
        } else {
            1
        };
        let _ = repeat; // recorded for diagnostic purposes; the block list below already reflects actual on-disk layout

        let body_region_start = head_region_offset + head.len() as u64;
        let mut blocks = Vec::with_capacity(total_block_count as usize);
        for mip in &mip_locators {
            let mut decoded_cursor = 0u64;
            let mut block_stream_offset = body_region_start + mip.compressed_offset as u64;
            let mut remaining = mip.decompressed_size as u64;
            for i in 0..mip.block_count {
                let sub_size = sub_block_sizes[(mip.first_block_index + i) as usize] as u32;
                let descriptor =
                    BlockDescriptor { offset_in_stream: block_stream_offset, known_size: sub_size };
                // Per-block decoded size is read lazily from the block
                // header itself during decode; record remaining as an
                // upper bound here and let CommonBlockDecoder verify it.
                let decoded_len = remaining.min(block::MAX_DECOMPRESSED_BLOCK_SIZE as u64);
                blocks.push((
                    descriptor,
                    (head.len() as u64) + decoded_cursor,
                    decoded_len,
                ));
                decoded_cursor += decoded_len;
                remaining = remaining.saturating_sub(decoded_len);
                block_stream_offset += align_128(BLOCK_HEADER_SIZE + sub_size as usize) as u64;
            }
        }

        let decompressed_size = head.len() as u64 + mip_locators.iter().map(|m| m.decompressed_size as u64).sum::<u64>();
        if decompressed_size != header.decompressed_size as u64 {
            return Err(Error::bad_data(format!(
                "texture entry computed decoded size {decompressed_size} disagrees with header {}",
                header.decompressed_size
            )));
        }

        Ok(Self {
            decompressed_size,
            head,
            blocks,
            stream: packed.stream().clone(),
            base_offset: packed.offset(),
            decoder: CommonBlockDecoder::new(),
        })
    }
}

impl Unpacker for TextureUnpacker {
    fn decompressed_size(&self) -> u64 {
        self.decompressed_size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.decompressed_size {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.decompressed_size - offset) as usize;
        let out = &mut buf[..want];
        let head_len = self.head.len() as u64;

        if offset < head_len {
            let n = (head_len - offset).min(want as u64) as usize;
            out[..n].copy_from_slice(&self.head[offset as usize..offset as usize + n]);
            if n < want {
                let base_offset = self.base_offset;
                let stream = self.stream.clone();
                let mut read_stream = |stream_offset: u64, dst: &mut [u8]| -> Result<()> {
                    crate::stream::read_fully(stream.as_ref(), base_offset + stream_offset, dst)
                };
                self.decoder.read(&mut out[n..], offset + n as u64, &self.blocks, &mut read_stream)?;
            }
            return Ok(want);
        }

        let base_offset = self.base_offset;
        let stream = self.stream.clone();
        let mut read_stream = |stream_offset: u64, dst: &mut [u8]| -> Result<()> {
            crate::stream::read_fully(stream.as_ref(), base_offset + stream_offset, dst)
        };
        self.decoder.read(out, offset, &self.blocks, &mut read_stream)?;
        Ok(want)
    }
}

/// Build a single-repeat texture entry (no array faces) from a verbatim
/// `TextureHeader`, its mipmap offset table, and the raw pixel payload for
/// each mip level in order.
pub fn pack_compressing(
    header: TextureHeader,
    mip_offsets: &[u32],
    mip_payloads: &[Vec<u8>],
    level: u32,
) -> Result<Vec<u8>> {
    assert_eq!(mip_offsets.len(), mip_payloads.len());

    let mut head = vec![0u8; TEXTURE_HEADER_FIXED_SIZE];
    header.write(&mut head);
    for off in mip_offsets {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, *off);
        head.extend_from_slice(&b);
    }

    let mut mip_locators = Vec::with_capacity(mip_payloads.len());
    let mut sub_block_sizes: Vec<u16> = Vec::new();
    let mut body = Vec::new();
    let mut next_block_index = 0u32;

    for payload in mip_payloads {
        let chunks = super::chunk_boundaries(payload.len() as u64);
        let compressed_offset = body.len() as u32;
        let first_block_index = next_block_index;

        for &(start, len) in &chunks {
            let raw = &payload[start as usize..(start + len) as usize];
            let compressed = block::deflate(raw, level)?;
            let (body_bytes, is_raw) = if compressed.len() < raw.len() {
                (compressed, false)
            } else {
                (raw.to_vec(), true)
            };
            let bh = crate::block::BlockHeader {
                compressed_size_or_raw_marker: if is_raw {
                    block::RAW_MARKER
                } else {
                    body_bytes.len() as u32
                },
                decompressed_size: len as u32,
            };
            let mut hbuf = [0u8; BLOCK_HEADER_SIZE];
            bh.write(&mut hbuf);
            let footprint = align_128(BLOCK_HEADER_SIZE + body_bytes.len());
            sub_block_sizes.push(footprint as u16);
            body.extend_from_slice(&hbuf);
            body.extend_from_slice(&body_bytes);
            body.resize(body.len() + (footprint - BLOCK_HEADER_SIZE - body_bytes.len()), 0);
            next_block_index += 1;
        }

        mip_locators.push(MipmapLocator {
            compressed_offset,
            compressed_size: (body.len() as u32) - compressed_offset,
            decompressed_size: payload.len() as u32,
            first_block_index,
            block_count: chunks.len() as u32,
        });
    }

    let mut locator_bytes = Vec::with_capacity(mip_locators.len() * MIPMAP_LOCATOR_SIZE);
    for m in &mip_locators {
        let mut rec = [0u8; MIPMAP_LOCATOR_SIZE];
        LittleEndian::write_u32(&mut rec[0..], m.compressed_offset);
        LittleEndian::write_u32(&mut rec[4..], m.compressed_size);
        LittleEndian::write_u32(&mut rec[8..], m.decompressed_size);
        LittleEndian::write_u32(&mut rec[12..], m.first_block_index);
        LittleEndian::write_u32(&mut rec[16..], m.block_count);
        locator_bytes.extend_from_slice(&rec);
    }

    let mut sub_size_bytes = Vec::with_capacity(sub_block_sizes.len() * 2);
    for s in &sub_block_sizes {
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, *s);
        sub_size_bytes.extend_from_slice(&b);
    }

    let decompressed_size = head.len() as u32 + mip_payloads.iter().map(|p| p.len() as u32).sum::<u32>();
    let total_len = PACKED_ENTRY_HEADER_SIZE
        + locator_bytes.len()
        + sub_size_bytes.len()
        + head.len()
        + body.len();
    let footprint = align_128(total_len);
    let space_used = footprint / 128;

    let entry_header = PackedEntryHeader {
        entry_type: PackedType::Texture,
        decompressed_size,
        block_buffer_size: space_used as u32,
        space_used: space_used as u32,
        block_count_or_version: mip_locators.len() as u32,
    };

    let mut out = vec![0u8; PACKED_ENTRY_HEADER_SIZE];
    entry_header.write(out.as_mut_slice().try_into().unwrap());
    out.extend_from_slice(&locator_bytes);
    out.extend_from_slice(&sub_size_bytes);
    out.extend_from_slice(&head);
    out.extend_from_slice(&body);
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
    fn header_fields_and_mipmap_offset_count_round_trip() {
        let header = TextureHeader {
            attribute: 0,
            format: FORMAT_BC3,
            width: 64,
            height: 64,
            depth: 1,
            mipmap_count: 2,
            array_size: 1,
            lod_offsets: [0, 0, 0],
        };
        let mip0 = vec![0xABu8; 64 * 64 / 2]; // BC3: 16 bytes per 4x4 block
        let mip1 = vec![0xCDu8; 32 * 32 / 2];
        let offsets = [0u32, mip0.len() as u32];

        let packed_bytes =
            pack_compressing(header, &offsets, &[mip0.clone(), mip1.clone()], 6).unwrap();
        let packed = as_packed(packed_bytes);
        let entry_header = packed.header().unwrap();
        let mut unpacker = TextureUnpacker::new(&packed, entry_header).unwrap();

        let mut head_out = vec![0u8; TEXTURE_HEADER_FIXED_SIZE];
        unpacker.read_exact_at(0, &mut head_out).unwrap();
        let parsed = TextureHeader::read(&head_out).unwrap();
        assert_eq!(parsed.format, FORMAT_BC3);
        assert_eq!(parsed.width, 64);
        assert_eq!(parsed.height, 64);
        assert_eq!(parsed.mipmap_count, 2);

        let mut offsets_out = vec![0u8; 8];
        unpacker
            .read_exact_at(TEXTURE_HEADER_FIXED_SIZE as u64, &mut offsets_out)
            .unwrap();
        assert_eq!(offsets_out.len() / 4, parsed.mipmap_count as usize);
    }

    #[test]
    fn mipmap_payload_round_trips() {
        let header = TextureHeader {
            attribute: 0,
            format: FORMAT_L8,
            width: 16,
            height: 16,
            depth: 1,
            mipmap_count: 1,
            array_size: 1,
            lod_offsets: [0, 0, 0],
        };
        let mip0: Vec<u8> = (0..256u32).map(|i| i as u8).collect();
        let packed_bytes = pack_compressing(header, &[0], &[mip0.clone()], 6).unwrap();
        let packed = as_packed(packed_bytes);
        let entry_header = packed.header().unwrap();
        let mut unpacker = TextureUnpacker::new(&packed, entry_header).unwrap();

        let head_len = TEXTURE_HEADER_FIXED_SIZE + 4;
        let mut pixel_out = vec![0u8; mip0.len()];
        unpacker.read_exact_at(head_len as u64, &mut pixel_out).unwrap();
        assert_eq!(pixel_out, mip0);
    }
}
