//! Non-strict index-bypass recovery: rebuild an approximate catalogue of a
//! dat file's packed entries by walking the file directly, for when the
//! index files are themselves missing or corrupt.
//!
//! This never consults index1/index2; it only trusts 128-byte alignment and
//! each packed entry's own header. A corrupt or unrecognized header is
//! skipped by stepping forward one alignment unit at a time rather than
//! aborting the whole scan, since the point of this path is to salvage
//! whatever is still readable.

use crate::block::SPACE_UNIT;
use crate::container::{ArchiveHeader, DataSubHeader, DATA_ENTRIES_START, HEADER_SIZE};
use crate::error::Result;
use crate::packed::{PackedEntryHeader, PACKED_ENTRY_HEADER_SIZE};
use crate::stream::Stream;
use tracing::{instrument, warn};

/// One packed entry recovered by sequential scan, without any path
/// information (that only exists in the index, which this path bypasses).
#[derive(Debug, Clone)]
pub struct RecoveredEntry {
    pub offset: u64,
    pub header: PackedEntryHeader,
    /// Rounded-up on-disk footprint, `offset`'s distance to the next
    /// candidate entry.
    pub footprint: u64,
}

/// Walk `stream` (a dat file) from its first entry to the end, yielding
/// every packed entry whose header parses cleanly. Gaps caused by corrupt
/// headers are skipped a `SPACE_UNIT` at a time and logged, not treated as
/// fatal.
#[instrument(skip_all)]
pub fn scan_entries(stream: &dyn Stream) -> Result<Vec<RecoveredEntry>> {
    let size = stream.size();
    let header_bytes = crate::stream::read_vec(stream, 0, HEADER_SIZE)?;
    // Non-strict: tolerate a corrupted or missing header SHA-1 entirely, we
    // only need the file to actually be a dat file.
    let header = ArchiveHeader::parse(&header_bytes, false)?;
    if header.file_type != crate::container::FileType::SqData {
        return Err(crate::error::Error::bad_data("recovery scan target is not a data file"));
    }

    let sub_bytes = crate::stream::read_vec(stream, HEADER_SIZE as u64, crate::container::DATA_SUBHEADER_SIZE)?;
    let _sub = DataSubHeader::parse(&sub_bytes).ok();

    let mut entries = Vec::new();
    let mut offset = DATA_ENTRIES_START;

    while offset + PACKED_ENTRY_HEADER_SIZE as u64 <= size {
        let mut buf = [0u8; PACKED_ENTRY_HEADER_SIZE];
        let n = stream.read_at(offset, &mut buf)?;
        if n < PACKED_ENTRY_HEADER_SIZE {
            break;
        }

        match PackedEntryHeader::read(&buf) {
            Ok(header) => {
                // space_used already encodes this entry's complete,
                // 128-byte-aligned on-disk footprint (header included).
                let footprint = (header.space_used as u64) * SPACE_UNIT as u64;
                if footprint == 0 || offset + footprint > size {
                    warn!(offset, "recovered entry footprint runs past end of file, stopping scan");
                    break;
                }
                entries.push(RecoveredEntry { offset, header, footprint });
                offset += footprint;
            }
            Err(e) => {
                warn!(offset, error = %e, "unreadable packed entry header, skipping one alignment unit");
                offset += SPACE_UNIT as u64;
            }
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ArchiveHeader, DataSubHeader};
    use crate::digest;
    use crate::packed::empty::pack_passthrough;
    use crate::stream::MemoryStream;

    fn build_dat(entries: &[Vec<u8>]) -> MemoryStream {
        let mut buf = vec![0u8; DATA_ENTRIES_START as usize];
        for e in entries {
            buf.extend_from_slice(e);
        }
        let data_sha1 = digest::sha1(&buf[DATA_ENTRIES_START as usize..]);
        let sub = DataSubHeader {
            dat_file_index: 0,
            total_data_size: buf.len() as u64 - DATA_ENTRIES_START,
            max_file_size: u32::MAX,
            data_sha1,
            first_entry_header_sha1: [0; digest::SHA1_SIZE],
        };
        let header = ArchiveHeader::new_data(0, u32::MAX);
        buf[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        buf[HEADER_SIZE..HEADER_SIZE + crate::container::DATA_SUBHEADER_SIZE]
            .copy_from_slice(&sub.to_bytes());
        MemoryStream::new(buf)
    }

    #[test]
    fn recovers_every_entry_in_a_clean_dat_file() {
        let e0 = pack_passthrough(b"alpha");
        let e1 = pack_passthrough(b"beta beta beta");
        let dat = build_dat(&[e0.clone(), e1.clone()]);

        let recovered = scan_entries(&dat).unwrap();
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered[0].offset, DATA_ENTRIES_START);
        assert_eq!(recovered[1].offset, DATA_ENTRIES_START + e0.len() as u64);
    }

    #[test]
    fn recovers_standard_entries_whose_footprint_spans_header_and_table() {
        // A standard entry's header + block-locator table rarely lands on
        // its own 128-byte boundary, exercising the padding that used to be
        // missing from the compressing packers' assembled output.
        use crate::packed::standard::pack_compressing;

        let data: Vec<u8> = (0..5000u32).map(|i| (i % 200) as u8).collect();
        let e0 = pack_compressing(&data, 6).unwrap();
        let e1 = pack_passthrough(b"trailing entry");
        assert_eq!(e0.len() % SPACE_UNIT, 0);

        let dat = build_dat(&[e0.clone(), e1.clone()]);
        let recovered = scan_entries(&dat).unwrap();
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered[0].offset, DATA_ENTRIES_START);
        assert_eq!(recovered[0].footprint, e0.len() as u64);
        assert_eq!(recovered[1].offset, DATA_ENTRIES_START + e0.len() as u64);
    }

    #[test]
    fn skips_past_a_corrupted_header_and_keeps_scanning() {
        let e0 = pack_passthrough(b"alpha");
        let mut garbage = vec![0xffu8; 128];
        let e2 = pack_passthrough(b"gamma gamma");

        let mut buf = vec![0u8; DATA_ENTRIES_START as usize];
        buf.extend_from_slice(&e0);
        buf.append(&mut garbage);
        buf.extend_from_slice(&e2);

        let data_sha1 = digest::sha1(&buf[DATA_ENTRIES_START as usize..]);
        let sub = DataSubHeader {
            dat_file_index: 0,
            total_data_size: buf.len() as u64 - DATA_ENTRIES_START,
            max_file_size: u32::MAX,
            data_sha1,
            first_entry_header_sha1: [0; digest::SHA1_SIZE],
        };
        let header = ArchiveHeader::new_data(0, u32::MAX);
        buf[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        buf[HEADER_SIZE..HEADER_SIZE + crate::container::DATA_SUBHEADER_SIZE]
            .copy_from_slice(&sub.to_bytes());
        let dat = MemoryStream::new(buf);

        let recovered = scan_entries(&dat).unwrap();
        assert_eq!(recovered.len(), 2);
    }
}
