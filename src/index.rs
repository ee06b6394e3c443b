//! Index1 and index2 readers: the pair-hash and full-hash lookup tables
//! that map a [`PathSpec`](crate::path_spec::PathSpec) to a [`DataLocator`].
//!
//! Both flavors share the same container shape — an [`ArchiveHeader`],
//! then an index header naming four segments (hash-locator, text-locator,
//! an opaque segment-3, and a dat-file-count/per-dat-SHA1 table) — and
//! differ only in the hash-locator record shape: index1 keys on
//! `(path_hash, name_hash)`, index2 on the single `full_path_hash`.

use crate::container::{ArchiveHeader, FileType, SegmentDescriptor, HEADER_SIZE};
use crate::digest;
use crate::error::{Error, Result};
use crate::stream::{read_vec, Stream};
use byteorder::{ByteOrder, LittleEndian};

/// A 32-bit packed locator: which dat file, whether the real entry must be
/// resolved through the text-locator table, and the 128-byte-aligned
/// offset within that dat file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataLocator(u32);

const SYNONYM_BIT: u32 = 0x01;
const DAT_INDEX_SHIFT: u32 = 1;
const DAT_INDEX_MASK: u32 = 0x07;
const OFFSET_SHIFT: u32 = 4;

impl DataLocator {
    /// `dat_file_index` occupies the low nibble above the synonym bit;
    /// `offset` must already be 128-byte aligned.
    pub fn new(dat_file_index: u32, is_synonym: bool, offset: u64) -> Self {
        debug_assert_eq!(offset % 128, 0, "data locator offset must be 128-byte aligned");
        let mut packed = (dat_file_index & DAT_INDEX_MASK) << DAT_INDEX_SHIFT;
        if is_synonym {
            packed |= SYNONYM_BIT;
        }
        packed |= ((offset >> 7) as u32) << OFFSET_SHIFT;
        Self(packed)
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn dat_file_index(&self) -> u32 {
        (self.0 >> DAT_INDEX_SHIFT) & DAT_INDEX_MASK
    }

    pub fn is_synonym(&self) -> bool {
        self.0 & SYNONYM_BIT != 0
    }

    pub fn offset(&self) -> u64 {
        ((self.0 >> OFFSET_SHIFT) as u64) << 7
    }
}

/// One `(dat_index, offset)` locator paired with the information needed to
/// carry it through joining/sorting/differencing in the archive reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashLocatorEntry {
    pub path_hash: u32,
    pub name_hash: u32,
    pub full_hash: u32,
    pub locator: DataLocator,
}

#[derive(Debug, Clone)]
pub struct TextLocatorEntry {
    pub path_hash: u32,
    pub name_hash: u32,
    pub locator: DataLocator,
    pub full_path: String,
}

struct IndexHeader {
    hash_locator: SegmentDescriptor,
    text_locator: SegmentDescriptor,
    segment3: SegmentDescriptor,
    dat_count_segment: SegmentDescriptor,
}

const INDEX_HEADER_SIZE: usize = 1024;

impl IndexHeader {
    fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INDEX_HEADER_SIZE {
            return Err(Error::UnexpectedEof { wanted: INDEX_HEADER_SIZE, got: bytes.len() });
        }
        // header_size field at offset 0, then four 28-byte segment
        // descriptors (offset u32, size u32, sha1[20]) starting at 4.
        let mut at = 4usize;
        let hash_locator = SegmentDescriptor::read(bytes, at)?;
        at += 28;
        let text_locator = SegmentDescriptor::read(bytes, at)?;
        at += 28;
        let segment3 = SegmentDescriptor::read(bytes, at)?;
        at += 28;
        let dat_count_segment = SegmentDescriptor::read(bytes, at)?;
        Ok(Self { hash_locator, text_locator, segment3, dat_count_segment })
    }

    fn to_bytes(&self) -> [u8; INDEX_HEADER_SIZE] {
        let mut buf = [0u8; INDEX_HEADER_SIZE];
        LittleEndian::write_u32(&mut buf[0..], INDEX_HEADER_SIZE as u32);
        let mut at = 4usize;
        self.hash_locator.write(&mut buf, at);
        at += 28;
        self.text_locator.write(&mut buf, at);
        at += 28;
        self.segment3.write(&mut buf, at);
        at += 28;
        self.dat_count_segment.write(&mut buf, at);
        buf
    }
}

/// Per-dat-file SHA-1 digests, stored in the index header's fourth
/// segment alongside a leading dat-file count.
pub fn parse_dat_digests(bytes: &[u8]) -> Result<Vec<[u8; digest::SHA1_SIZE]>> {
    if bytes.len() < 4 {
        return Err(Error::UnexpectedEof { wanted: 4, got: bytes.len() });
    }
    let count = LittleEndian::read_u32(&bytes[0..]) as usize;
    let mut out = Vec::with_capacity(count);
    let mut at = 4;
    for _ in 0..count {
        if bytes.len() < at + digest::SHA1_SIZE {
            return Err(Error::UnexpectedEof { wanted: at + digest::SHA1_SIZE, got: bytes.len() });
        }
        let mut sha = [0u8; digest::SHA1_SIZE];
        sha.copy_from_slice(&bytes[at..at + digest::SHA1_SIZE]);
        out.push(sha);
        at += digest::SHA1_SIZE;
    }
    Ok(out)
}

const PAIR_HASH_RECORD_SIZE: usize = 16; // path_hash u32, name_hash u32, data_locator u32, pad u32
const FULL_HASH_RECORD_SIZE: usize = 8; // full_path_hash u32, data_locator u32
const TEXT_RECORD_STRIDE: usize = 0; // variable-length, no fixed stride to verify

/// Index1: keyed on `(path_hash, name_hash)`.
pub struct Index1 {
    pub entries: Vec<HashLocatorEntry>,
    pub text: Vec<TextLocatorEntry>,
    pub dat_digests: Vec<[u8; digest::SHA1_SIZE]>,
}

impl Index1 {
    pub fn load(stream: &dyn Stream, strict: bool) -> Result<Self> {
        let header_bytes = read_vec(stream, 0, HEADER_SIZE)?;
        let header = ArchiveHeader::parse(&header_bytes, strict)?;
        if header.file_type != FileType::SqIndex {
            return Err(Error::bad_data("index1 file_type tag is not SqIndex"));
        }

        let index_header_bytes = read_vec(stream, HEADER_SIZE as u64, INDEX_HEADER_SIZE)?;
        let index_header = IndexHeader::parse(&index_header_bytes)?;

        let hash_body = read_vec(
            stream,
            index_header.hash_locator.offset,
            index_header.hash_locator.size as usize,
        )?;
        index_header
            .hash_locator
            .verify(&hash_body, PAIR_HASH_RECORD_SIZE, strict)?;

        let mut entries = Vec::with_capacity(hash_body.len() / PAIR_HASH_RECORD_SIZE);
        for chunk in hash_body.chunks_exact(PAIR_HASH_RECORD_SIZE) {
            let path_hash = LittleEndian::read_u32(&chunk[0..]);
            let name_hash = LittleEndian::read_u32(&chunk[4..]);
            let locator = DataLocator::from_raw(LittleEndian::read_u32(&chunk[8..]));
            entries.push(HashLocatorEntry { path_hash, name_hash, full_hash: 0, locator });
        }

        let text_body = read_vec(
            stream,
            index_header.text_locator.offset,
            index_header.text_locator.size as usize,
        )?;
        index_header
            .text_locator
            .verify(&text_body, TEXT_RECORD_STRIDE, strict)?;
        let text = parse_text_locators(&text_body)?;

        let segment3_body = read_vec(
            stream,
            index_header.segment3.offset,
            index_header.segment3.size as usize,
        )?;
        index_header.segment3.verify(&segment3_body, 0, strict)?;

        let dat_body = read_vec(
            stream,
            index_header.dat_count_segment.offset,
            index_header.dat_count_segment.size as usize,
        )?;
        index_header.dat_count_segment.verify(&dat_body, 0, strict)?;
        let dat_digests = parse_dat_digests(&dat_body)?;

        Ok(Self { entries, text, dat_digests })
    }

    /// Binary search by `(path_hash, name_hash)`. Entries are assumed
    /// sorted on load (a generator-produced index always is).
    pub fn lookup(&self, path_hash: u32, name_hash: u32) -> Option<&HashLocatorEntry> {
        self.entries
            .binary_search_by_key(&(path_hash, name_hash), |e| (e.path_hash, e.name_hash))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn resolve_text(&self, path: &str) -> Option<&TextLocatorEntry> {
        self.text.iter().find(|t| t.full_path.eq_ignore_ascii_case(path))
    }
}

/// Index2: keyed on the single `full_path_hash`.
pub struct Index2 {
    pub entries: Vec<HashLocatorEntry>,
    pub text: Vec<TextLocatorEntry>,
    pub dat_digests: Vec<[u8; digest::SHA1_SIZE]>,
}

impl Index2 {
    pub fn load(stream: &dyn Stream, strict: bool) -> Result<Self> {
        let header_bytes = read_vec(stream, 0, HEADER_SIZE)?;
        let header = ArchiveHeader::parse(&header_bytes, strict)?;
        if header.file_type != FileType::SqIndex {
            return Err(Error::bad_data("index2 file_type tag is not SqIndex"));
        }

        let index_header_bytes = read_vec(stream, HEADER_SIZE as u64, INDEX_HEADER_SIZE)?;
        let index_header = IndexHeader::parse(&index_header_bytes)?;

        let hash_body = read_vec(
            stream,
            index_header.hash_locator.offset,
            index_header.hash_locator.size as usize,
        )?;
        index_header
            .hash_locator
            .verify(&hash_body, FULL_HASH_RECORD_SIZE, strict)?;

        let mut entries = Vec::with_capacity(hash_body.len() / FULL_HASH_RECORD_SIZE);
        for chunk in hash_body.chunks_exact(FULL_HASH_RECORD_SIZE) {
            let full_hash = LittleEndian::read_u32(&chunk[0..]);
            let locator = DataLocator::from_raw(LittleEndian::read_u32(&chunk[4..]));
            entries.push(HashLocatorEntry { path_hash: 0, name_hash: 0, full_hash, locator });
        }

        let text_body = read_vec(
            stream,
            index_header.text_locator.offset,
            index_header.text_locator.size as usize,
        )?;
        index_header
            .text_locator
            .verify(&text_body, TEXT_RECORD_STRIDE, strict)?;
        let text = parse_text_locators(&text_body)?;

        let segment3_body = read_vec(
            stream,
            index_header.segment3.offset,
            index_header.segment3.size as usize,
        )?;
        index_header.segment3.verify(&segment3_body, 0, strict)?;

        let dat_body = read_vec(
            stream,
            index_header.dat_count_segment.offset,
            index_header.dat_count_segment.size as usize,
        )?;
        index_header.dat_count_segment.verify(&dat_body, 0, strict)?;
        let dat_digests = parse_dat_digests(&dat_body)?;

        Ok(Self { entries, text, dat_digests })
    }

    pub fn lookup(&self, full_hash: u32) -> Option<&HashLocatorEntry> {
        self.entries
            .binary_search_by_key(&full_hash, |e| e.full_hash)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn resolve_text(&self, path: &str) -> Option<&TextLocatorEntry> {
        self.text.iter().find(|t| t.full_path.eq_ignore_ascii_case(path))
    }
}

/// Text-locator records are variable length: fixed `(path_hash, name_hash,
/// data_locator, text_len)` prefix, then `text_len` UTF-8 bytes.
fn parse_text_locators(body: &[u8]) -> Result<Vec<TextLocatorEntry>> {
    let mut out = Vec::new();
    let mut at = 0usize;
    while at + 16 <= body.len() {
        let path_hash = LittleEndian::read_u32(&body[at..]);
        let name_hash = LittleEndian::read_u32(&body[at + 4..]);
        let locator = DataLocator::from_raw(LittleEndian::read_u32(&body[at + 8..]));
        let text_len = LittleEndian::read_u32(&body[at + 12..]) as usize;
        at += 16;
        if at + text_len > body.len() {
            return Err(Error::bad_data("text locator entry overruns segment"));
        }
        let full_path = String::from_utf8(body[at..at + text_len].to_vec())
            .map_err(|_| Error::bad_data("text locator entry is not valid UTF-8"))?;
        at += text_len;
        out.push(TextLocatorEntry { path_hash, name_hash, locator, full_path });
    }
    Ok(out)
}

pub fn write_text_locators(entries: &[TextLocatorEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for e in entries {
        let mut rec = [0u8; 16];
        LittleEndian::write_u32(&mut rec[0..], e.path_hash);
        LittleEndian::write_u32(&mut rec[4..], e.name_hash);
        LittleEndian::write_u32(&mut rec[8..], e.locator.raw());
        LittleEndian::write_u32(&mut rec[12..], e.full_path.len() as u32);
        out.extend_from_slice(&rec);
        out.extend_from_slice(e.full_path.as_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_locator_round_trips_fields() {
        let loc = DataLocator::new(2, true, 256 * 128);
        assert_eq!(loc.dat_file_index(), 2);
        assert!(loc.is_synonym());
        assert_eq!(loc.offset(), 256 * 128);
    }

    #[test]
    fn data_locator_offset_is_128_aligned_only() {
        let loc = DataLocator::new(0, false, 128);
        assert_eq!(loc.offset(), 128);
    }

    #[test]
    fn text_locators_round_trip_through_bytes() {
        let entries = vec![
            TextLocatorEntry {
                path_hash: 1,
                name_hash: 2,
                locator: DataLocator::new(0, true, 0),
                full_path: "common/font/font1.tex".to_string(),
            },
            TextLocatorEntry {
                path_hash: 3,
                name_hash: 4,
                locator: DataLocator::new(1, true, 128),
                full_path: "exd/root.exl".to_string(),
            },
        ];
        let bytes = write_text_locators(&entries);
        let parsed = parse_text_locators(&bytes).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].full_path, "common/font/font1.tex");
        assert_eq!(parsed[1].path_hash, 3);
    }
}
