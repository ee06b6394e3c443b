//! Shared archive container header and the file-type-specific sub-headers
//! that follow it.
//!
//! Every index1, index2, and dat file opens with the same 1024-byte
//! header; a sub-header specific to the file type follows in the
//! remaining header space before the real payload begins.

use crate::digest;
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

pub const MAGIC: &[u8; 8] = b"SqPack\0\0";
pub const HEADER_SIZE: usize = 1024;
const SHA1_OFFSET: usize = 0x3c0; // 960
const PLATFORM_OFFSET: usize = 8;
const HEADER_SIZE_OFFSET: usize = 12;
const FILE_TYPE_OFFSET: usize = 20;
const DAT_INDEX_OFFSET: usize = 24;
const MAX_FILE_SIZE_OFFSET: usize = 32;

/// File-type tag carried in an archive header's `file_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    SqIndex,
    SqData,
}

impl FileType {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            1 => Ok(FileType::SqIndex),
            2 => Ok(FileType::SqData),
            other => Err(Error::bad_data(format!("unknown file_type tag {other}"))),
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            FileType::SqIndex => 1,
            FileType::SqData => 2,
        }
    }
}

/// The 1024-byte header shared by index1, index2, and every dat file.
#[derive(Debug, Clone)]
pub struct ArchiveHeader {
    pub platform: u32,
    pub file_type: FileType,
    /// Data files only; zero for index files.
    pub dat_file_index: u32,
    /// Data files only: the configured cap on this dat file's total size.
    pub max_file_size: u32,
}

impl ArchiveHeader {
    pub fn new_index() -> Self {
        Self { platform: 0, file_type: FileType::SqIndex, dat_file_index: 0, max_file_size: 0 }
    }

    pub fn new_data(dat_file_index: u32, max_file_size: u32) -> Self {
        Self { platform: 0, file_type: FileType::SqData, dat_file_index, max_file_size }
    }

    /// Parse and verify the 1024-byte header at the start of `bytes`.
    /// When `strict` is false, SHA-1 verification is skipped (useful when
    /// reading an archive still being written in place).
    pub fn parse(bytes: &[u8], strict: bool) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::UnexpectedEof { wanted: HEADER_SIZE, got: bytes.len() });
        }
        if &bytes[0..8] != MAGIC {
            return Err(Error::BadMagic { expected: MAGIC, actual: bytes[0..8].to_vec() });
        }

        let header_size = LittleEndian::read_u32(&bytes[HEADER_SIZE_OFFSET..]) as usize;
        if header_size != HEADER_SIZE {
            return Err(Error::bad_data(format!(
                "unexpected header size {header_size}, expected {HEADER_SIZE}"
            )));
        }

        if strict {
            let mut expected = [0u8; digest::SHA1_SIZE];
            expected.copy_from_slice(&bytes[SHA1_OFFSET..SHA1_OFFSET + digest::SHA1_SIZE]);
            if !digest::verify(&bytes[..SHA1_OFFSET], &expected) {
                return Err(Error::Sha1Mismatch("archive header"));
            }
        }

        let platform = LittleEndian::read_u32(&bytes[PLATFORM_OFFSET..]);
        let file_type = FileType::from_u32(LittleEndian::read_u32(&bytes[FILE_TYPE_OFFSET..]))?;
        let dat_file_index = LittleEndian::read_u32(&bytes[DAT_INDEX_OFFSET..]);
        let max_file_size = LittleEndian::read_u32(&bytes[MAX_FILE_SIZE_OFFSET..]);

        Ok(Self { platform, file_type, dat_file_index, max_file_size })
    }

    /// Serialize to a fresh 1024-byte buffer, computing the trailing SHA-1.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(MAGIC);
        LittleEndian::write_u32(&mut buf[PLATFORM_OFFSET..], self.platform);
        LittleEndian::write_u32(&mut buf[HEADER_SIZE_OFFSET..], HEADER_SIZE as u32);
        LittleEndian::write_u32(&mut buf[FILE_TYPE_OFFSET..], self.file_type.as_u32());
        LittleEndian::write_u32(&mut buf[DAT_INDEX_OFFSET..], self.dat_file_index);
        LittleEndian::write_u32(&mut buf[MAX_FILE_SIZE_OFFSET..], self.max_file_size);

        let hash = digest::sha1(&buf[..SHA1_OFFSET]);
        buf[SHA1_OFFSET..SHA1_OFFSET + digest::SHA1_SIZE].copy_from_slice(&hash);
        buf
    }
}

/// An index file's segment descriptor: one of the four fixed segments
/// named in the index header (hash-locator table, text-locator table, the
/// opaque segment-3 table, and the dat-file-count/per-dat-SHA1 segment).
#[derive(Debug, Clone, Copy)]
pub struct SegmentDescriptor {
    pub offset: u64,
    pub size: u64,
    pub sha1: [u8; digest::SHA1_SIZE],
}

impl SegmentDescriptor {
    pub fn read(bytes: &[u8], at: usize) -> Result<Self> {
        if bytes.len() < at + 8 + digest::SHA1_SIZE {
            return Err(Error::UnexpectedEof {
                wanted: at + 8 + digest::SHA1_SIZE,
                got: bytes.len(),
            });
        }
        let offset = LittleEndian::read_u32(&bytes[at..]) as u64;
        let size = LittleEndian::read_u32(&bytes[at + 4..]) as u64;
        let mut sha1 = [0u8; digest::SHA1_SIZE];
        sha1.copy_from_slice(&bytes[at + 8..at + 8 + digest::SHA1_SIZE]);
        Ok(Self { offset, size, sha1 })
    }

    pub fn write(&self, buf: &mut [u8], at: usize) {
        LittleEndian::write_u32(&mut buf[at..], self.offset as u32);
        LittleEndian::write_u32(&mut buf[at + 4..], self.size as u32);
        buf[at + 8..at + 8 + digest::SHA1_SIZE].copy_from_slice(&self.sha1);
    }

    /// Verify `body`'s declared stride alignment and SHA-1 against this
    /// descriptor. `stride` is the fixed record size for this segment
    /// (zero for the opaque segment-3 table, which carries no stride
    /// invariant beyond its own SHA-1).
    pub fn verify(&self, body: &[u8], stride: usize, strict: bool) -> Result<()> {
        if stride != 0 && self.size % stride as u64 != 0 {
            return Err(Error::bad_data(format!(
                "segment size {} is not a multiple of stride {stride}",
                self.size
            )));
        }
        if strict && !digest::verify(body, &self.sha1) {
            return Err(Error::Sha1Mismatch("index segment"));
        }
        Ok(())
    }
}

/// Data file sub-header, following the shared 1024-byte `ArchiveHeader`.
/// Occupies its own 1024-byte region, so a dat file's first packed entry
/// always starts at byte offset `DATA_SUBHEADER_SIZE + HEADER_SIZE` (2048).
pub const DATA_SUBHEADER_SIZE: usize = 1024;
const DSH_DAT_INDEX_OFFSET: usize = 0;
const DSH_TOTAL_SIZE_OFFSET: usize = 8;
const DSH_MAX_FILE_SIZE_OFFSET: usize = 16;
const DSH_DATA_SHA1_OFFSET: usize = 20;
const DSH_FIRST_ENTRY_SHA1_OFFSET: usize = 40;

#[derive(Debug, Clone)]
pub struct DataSubHeader {
    pub dat_file_index: u32,
    pub total_data_size: u64,
    pub max_file_size: u32,
    pub data_sha1: [u8; digest::SHA1_SIZE],
    pub first_entry_header_sha1: [u8; digest::SHA1_SIZE],
}

impl DataSubHeader {
    pub fn to_bytes(&self) -> [u8; DATA_SUBHEADER_SIZE] {
        let mut buf = [0u8; DATA_SUBHEADER_SIZE];
        LittleEndian::write_u32(&mut buf[DSH_DAT_INDEX_OFFSET..], self.dat_file_index);
        LittleEndian::write_u64(&mut buf[DSH_TOTAL_SIZE_OFFSET..], self.total_data_size);
        LittleEndian::write_u32(&mut buf[DSH_MAX_FILE_SIZE_OFFSET..], self.max_file_size);
        buf[DSH_DATA_SHA1_OFFSET..DSH_DATA_SHA1_OFFSET + digest::SHA1_SIZE]
            .copy_from_slice(&self.data_sha1);
        buf[DSH_FIRST_ENTRY_SHA1_OFFSET..DSH_FIRST_ENTRY_SHA1_OFFSET + digest::SHA1_SIZE]
            .copy_from_slice(&self.first_entry_header_sha1);
        buf
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DATA_SUBHEADER_SIZE {
            return Err(Error::UnexpectedEof { wanted: DATA_SUBHEADER_SIZE, got: bytes.len() });
        }
        let mut data_sha1 = [0u8; digest::SHA1_SIZE];
        data_sha1.copy_from_slice(&bytes[DSH_DATA_SHA1_OFFSET..DSH_DATA_SHA1_OFFSET + digest::SHA1_SIZE]);
        let mut first_entry_header_sha1 = [0u8; digest::SHA1_SIZE];
        first_entry_header_sha1.copy_from_slice(
            &bytes[DSH_FIRST_ENTRY_SHA1_OFFSET..DSH_FIRST_ENTRY_SHA1_OFFSET + digest::SHA1_SIZE],
        );
        Ok(Self {
            dat_file_index: LittleEndian::read_u32(&bytes[DSH_DAT_INDEX_OFFSET..]),
            total_data_size: LittleEndian::read_u64(&bytes[DSH_TOTAL_SIZE_OFFSET..]),
            max_file_size: LittleEndian::read_u32(&bytes[DSH_MAX_FILE_SIZE_OFFSET..]),
            data_sha1,
            first_entry_header_sha1,
        })
    }
}

/// Byte offset of a dat file's first packed entry.
pub const DATA_ENTRIES_START: u64 = (HEADER_SIZE + DATA_SUBHEADER_SIZE) as u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let header = ArchiveHeader::new_data(2, 0x7FFF_FFFF);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let parsed = ArchiveHeader::parse(&bytes, true).unwrap();
        assert_eq!(parsed.file_type, FileType::SqData);
        assert_eq!(parsed.dat_file_index, 2);
        assert_eq!(parsed.max_file_size, 0x7FFF_FFFF);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = ArchiveHeader::new_index().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            ArchiveHeader::parse(&bytes, true),
            Err(Error::BadMagic { .. })
        ));
    }

    #[test]
    fn strict_mode_catches_corrupted_sha1_nonstrict_does_not() {
        let mut bytes = ArchiveHeader::new_index().to_bytes();
        bytes[10] ^= 0xFF; // corrupt a byte covered by the header SHA-1
        assert!(matches!(
            ArchiveHeader::parse(&bytes, true),
            Err(Error::Sha1Mismatch(_))
        ));
        assert!(ArchiveHeader::parse(&bytes, false).is_ok());
    }

    #[test]
    fn segment_descriptor_rejects_misaligned_stride() {
        let desc = SegmentDescriptor { offset: 0, size: 17, sha1: [0; digest::SHA1_SIZE] };
        let body = vec![0u8; 17];
        assert!(desc.verify(&body, 12, false).is_err());
    }
}
