//! Packed blocks: the unit of compression inside a packed entry.
//!
//! Every block is prefixed by a 16-byte header and padded so its total
//! on-disk footprint (header + body + padding) is a multiple of 128 bytes.
//! `compressed_size == RAW_MARKER` means the body is stored uncompressed;
//! otherwise it's raw DEFLATE (window bits -15, no zlib header).

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Read;
use std::io::Write;

pub const BLOCK_HEADER_SIZE: usize = 16;
pub const RAW_MARKER: u32 = 0x7D00;
pub const SPACE_UNIT: usize = 128;
pub const MAX_DECOMPRESSED_BLOCK_SIZE: usize = 16000;

#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub compressed_size_or_raw_marker: u32,
    pub decompressed_size: u32,
}

impl BlockHeader {
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(Error::UnexpectedEof { wanted: BLOCK_HEADER_SIZE, got: bytes.len() });
        }
        let header_size = LittleEndian::read_u32(&bytes[0..]);
        if header_size as usize != BLOCK_HEADER_SIZE {
            return Err(Error::bad_data(format!(
                "block header size {header_size}, expected {BLOCK_HEADER_SIZE}"
            )));
        }
        Ok(Self {
            compressed_size_or_raw_marker: LittleEndian::read_u32(&bytes[8..]),
            decompressed_size: LittleEndian::read_u32(&bytes[12..]),
        })
    }

    pub fn write(&self, buf: &mut [u8; BLOCK_HEADER_SIZE]) {
        LittleEndian::write_u32(&mut buf[0..], BLOCK_HEADER_SIZE as u32);
        LittleEndian::write_u32(&mut buf[4..], 0); // version
        LittleEndian::write_u32(&mut buf[8..], self.compressed_size_or_raw_marker);
        LittleEndian::write_u32(&mut buf[12..], self.decompressed_size);
    }

    pub fn is_raw(&self) -> bool {
        self.compressed_size_or_raw_marker == RAW_MARKER
    }

    /// Size of the block body on disk (compressed size, or the raw
    /// decompressed size when stored uncompressed).
    pub fn body_size(&self) -> usize {
        if self.is_raw() {
            self.decompressed_size as usize
        } else {
            self.compressed_size_or_raw_marker as usize
        }
    }

    /// Total on-disk footprint of this block, rounded up to 128 bytes.
    pub fn footprint(&self) -> usize {
        align_128(BLOCK_HEADER_SIZE + self.body_size())
    }
}

pub fn align_128(n: usize) -> usize {
    (n + SPACE_UNIT - 1) / SPACE_UNIT * SPACE_UNIT
}

/// Inflate raw DEFLATE `compressed` into a fresh `Vec<u8>` of exactly
/// `decompressed_size` bytes, failing if the stream produces a different
/// amount.
pub fn inflate(compressed: &[u8], decompressed_size: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; decompressed_size];
    inflate_into(compressed, &mut out)?;
    Ok(out)
}

/// Inflate raw DEFLATE `compressed` into a caller-provided fixed-size
/// slice, failing if the stream doesn't fill it exactly.
pub fn inflate_into(compressed: &[u8], out: &mut [u8]) -> Result<()> {
    let mut decoder = DeflateDecoder::new(compressed);
    decoder
        .read_exact(out)
        .map_err(|e| Error::corrupt(0, format!("inflate failed: {e}")))?;
    Ok(())
}

/// Deflate `data` with raw DEFLATE (no zlib header) at `level` (0-9).
pub fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// One block's known location and size within a packed stream's payload
/// region, as recorded by a standard/texture/model locator table.
#[derive(Debug, Clone, Copy)]
pub struct BlockDescriptor {
    /// Offset of this block's header within the packed stream, relative to
    /// the start of the payload region (after the entry header/locators).
    pub offset_in_stream: u64,
    /// On-disk footprint of this block (header + body + padding).
    pub known_size: u32,
}

/// Reusable scratch decoder: a fixed scratch buffer plus whatever state
/// `flate2` needs, shared across reads against the same unpacker instance
/// to avoid reallocating per block.
///
/// Given a target buffer, the overall offset the caller wants (relative to
/// the decoded stream start), and a sequence of block descriptors in
/// ascending order, iterates blocks: skips those entirely before the
/// requested range, inflates those that intersect it, and stops once the
/// target buffer is filled. Any gap between the end of one block's decoded
/// range and the logical start of the next (used for padding in texture
/// mipmaps) is zero-filled.
pub struct CommonBlockDecoder {
    scratch: Vec<u8>,
}

impl Default for CommonBlockDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl CommonBlockDecoder {
    pub fn new() -> Self {
        Self { scratch: vec![0u8; MAX_DECOMPRESSED_BLOCK_SIZE] }
    }

    /// `blocks` is `(descriptor, decoded_range_start, decoded_range_len)`
    /// triples in ascending order of `decoded_range_start`. `read_stream`
    /// fetches raw bytes for a block's on-disk footprint.
    pub fn read(
        &mut self,
        out: &mut [u8],
        out_start: u64,
        blocks: &[(BlockDescriptor, u64, u64)],
        read_stream: &mut dyn FnMut(u64, &mut [u8]) -> Result<()>,
    ) -> Result<()> {
        let out_end = out_start + out.len() as u64;
        let mut cursor = out_start;

        for (desc, decoded_start, decoded_len) in blocks {
            let decoded_end = decoded_start + decoded_len;
            if decoded_end <= out_start {
                continue;
            }
            if *decoded_start >= out_end {
                break;
            }

            if cursor < *decoded_start {
                let gap = (*decoded_start - cursor) as usize;
                let dst_off = (cursor - out_start) as usize;
                for b in &mut out[dst_off..dst_off + gap] {
                    *b = 0;
                }
                cursor = *decoded_start;
            }

            let mut header_buf = [0u8; BLOCK_HEADER_SIZE];
            read_stream(desc.offset_in_stream, &mut header_buf)?;
            let header = BlockHeader::read(&header_buf)?;
            if header.decompressed_size as u64 != *decoded_len {
                return Err(Error::corrupt(
                    desc.offset_in_stream,
                    format!(
                        "block declares {} decompressed bytes, locator expects {decoded_len}",
                        header.decompressed_size
                    ),
                ));
            }

            let body_len = header.body_size();
            if body_len > self.scratch.len() {
                self.scratch.resize(body_len, 0);
            }
            let body = &mut self.scratch[..body_len];
            read_stream(desc.offset_in_stream + BLOCK_HEADER_SIZE as u64, body)?;

            let decoded: std::borrow::Cow<[u8]> = if header.is_raw() {
                std::borrow::Cow::Borrowed(&body[..])
            } else {
                std::borrow::Cow::Owned(inflate(body, header.decompressed_size as usize)?)
            };

            let copy_start = cursor.max(*decoded_start);
            let copy_end = out_end.min(decoded_end);
            if copy_start < copy_end {
                let src_off = (copy_start - decoded_start) as usize;
                let dst_off = (copy_start - out_start) as usize;
                let len = (copy_end - copy_start) as usize;
                out[dst_off..dst_off + len].copy_from_slice(&decoded[src_off..src_off + len]);
            }
            cursor = copy_end.max(cursor);
        }

        if cursor < out_end {
            let dst_off = (cursor - out_start) as usize;
            for b in &mut out[dst_off..] {
                *b = 0;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprint_rounds_up_to_128() {
        let h = BlockHeader { compressed_size_or_raw_marker: 10, decompressed_size: 100 };
        assert_eq!(h.footprint(), 128); // 16 + 10 = 26 -> 128
    }

    #[test]
    fn raw_marker_uses_decompressed_size_as_body_size() {
        let h = BlockHeader { compressed_size_or_raw_marker: RAW_MARKER, decompressed_size: 300 };
        assert_eq!(h.body_size(), 300);
    }

    #[test]
    fn deflate_then_inflate_round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = deflate(&data, 6).unwrap();
        let back = inflate(&compressed, data.len()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let h = BlockHeader { compressed_size_or_raw_marker: 4096, decompressed_size: 16000 };
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        h.write(&mut buf);
        let parsed = BlockHeader::read(&buf).unwrap();
        assert_eq!(parsed.compressed_size_or_raw_marker, 4096);
        assert_eq!(parsed.decompressed_size, 16000);
    }

    #[test]
    fn align_128_rounds_exact_multiples_unchanged() {
        assert_eq!(align_128(256), 256);
        assert_eq!(align_128(257), 384);
        assert_eq!(align_128(0), 0);
    }
}
