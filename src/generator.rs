//! Archive generator: assembles queued packed entries into a fresh
//! index1/index2/dat-file set, enforcing alignment, hash-collision, and
//! dat-file-size invariants.

use crate::container::{ArchiveHeader, DataSubHeader, DATA_ENTRIES_START};
use crate::digest;
use crate::error::{Error, Result};
use crate::index::{write_text_locators, DataLocator, TextLocatorEntry};
use crate::path_spec::{ArchiveId, PathSpec};
use crate::stream::Stream;
use crate::threadpool::ThreadPool;
use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;
use tracing::{debug, info, instrument};

const DEFAULT_MAX_DAT_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024 - 128; // 2 GiB minus one entry

/// Tunables for a generation run.
#[derive(Clone)]
pub struct GeneratorOptions {
    pub max_dat_file_size: u64,
    /// Skips structural re-validation of entries added via `add_archive`.
    pub strict: bool,
    /// DEFLATE level passed to `add_compressed`'s codec.
    pub compression_level: u32,
    /// Worker count for `finalize`'s parallel entry fetch; 0 defaults to
    /// `std::thread::available_parallelism`.
    pub worker_count: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            max_dat_file_size: DEFAULT_MAX_DAT_FILE_SIZE,
            strict: true,
            compression_level: 6,
            worker_count: 0,
        }
    }
}

struct QueuedEntry {
    path_spec: PathSpec,
    stream: Arc<dyn Stream>,
}

pub struct ArchiveGenerator {
    id: ArchiveId,
    options: GeneratorOptions,
    queued: Vec<QueuedEntry>,
    text_promoted: std::collections::HashSet<usize>,
}

/// The finalized byte buffers for an archive, ready to export.
pub struct GeneratedArchive {
    pub index1: Vec<u8>,
    pub index2: Vec<u8>,
    pub dat_files: Vec<Vec<u8>>,
}

impl ArchiveGenerator {
    pub fn new(id: ArchiveId, options: GeneratorOptions) -> Self {
        Self { id, options, queued: Vec::new(), text_promoted: std::collections::HashSet::new() }
    }

    /// Queue a packed entry. Path-hash collisions (same pair hash,
    /// different full hash) promote both entries to text locators; a true
    /// full-path-hash collision fails immediately.
    pub fn add(&mut self, path_spec: PathSpec, stream: Arc<dyn Stream>) -> Result<()> {
        self.add_inner(path_spec, stream, false)
    }

    /// Queue `raw` as a standard-codec entry, compressed at
    /// `options.compression_level`. A convenience over `add` for callers
    /// that have decoded bytes rather than an already-packed stream.
    pub fn add_compressed(&mut self, path_spec: PathSpec, raw: &[u8]) -> Result<()> {
        let packed = crate::packed::standard::pack_compressing(raw, self.options.compression_level)?;
        self.add(path_spec, Arc::new(crate::stream::MemoryStream::new(packed)))
    }

    fn add_inner(&mut self, path_spec: PathSpec, stream: Arc<dyn Stream>, force_text: bool) -> Result<()> {
        for (i, existing) in self.queued.iter().enumerate() {
            if existing.path_spec.full_hash() == path_spec.full_hash() {
                return Err(Error::HashCollision(path_spec.display_name()));
            }
            if existing.path_spec.pair_hash_eq(&path_spec) {
                self.text_promoted.insert(i);
                self.text_promoted.insert(self.queued.len());
            }
        }
        if force_text {
            self.text_promoted.insert(self.queued.len());
        }
        self.queued.push(QueuedEntry { path_spec, stream });
        Ok(())
    }

    /// Bulk-add every entry of an already-open archive, referencing its
    /// underlying data streams directly so no recompression happens.
    ///
    /// `include_hashes` set to false forces every re-added entry to resolve
    /// only through the text-locator table, rather than recomputing its
    /// place in the pair-hash/full-hash tables; `include_text` set to false
    /// drops synonym entries whose real path can't be recovered.
    #[instrument(skip_all)]
    pub fn add_archive(
        &mut self,
        reader: &crate::archive_reader::ArchiveReader,
        include_hashes: bool,
        include_text: bool,
    ) -> Result<()> {
        for entry in reader.entries() {
            if entry.locator.is_synonym() && entry.path_spec.text().is_none() {
                if !include_text {
                    continue;
                }
                return Err(Error::entry_not_found(&entry.path_spec));
            }
            let packed = reader.packed_at_entry(entry)?;
            let force_text = !include_hashes && entry.path_spec.text().is_some();
            self.add_inner(entry.path_spec.clone(), packed.stream().clone(), force_text)?;
        }
        Ok(())
    }

    /// Partition entries into dat files, assign locators, build index
    /// tables, and compute every digest. Fails on the first error.
    #[instrument(skip_all, fields(queued = self.queued.len()))]
    pub fn finalize(&self, mut progress: Option<&mut dyn FnMut(usize, usize)>) -> Result<GeneratedArchive> {
        let total = self.queued.len();
        let mut dat_files: Vec<Vec<u8>> = vec![Vec::new()];
        dat_files[0].resize(DATA_ENTRIES_START as usize, 0);

        let mut assigned: Vec<(PathSpec, DataLocator, bool)> = Vec::with_capacity(total);

        // Each queued entry's bytes are independent of every other's, so
        // fetch them all concurrently; placement below stays sequential
        // since each entry's offset depends on the running dat-file size.
        let pool = ThreadPool::new(self.options.worker_count);
        let fetches: Vec<_> = self
            .queued
            .iter()
            .map(|entry| {
                let stream = entry.stream.clone();
                let entry_len = stream.size();
                pool.spawn(move || {
                    let mut buf = vec![0u8; entry_len as usize];
                    let n = stream.read_at(0, &mut buf)?;
                    if n as u64 != entry_len {
                        return Err(Error::UnexpectedEof { wanted: entry_len as usize, got: n });
                    }
                    Ok(buf)
                })
            })
            .collect();

        for ((i, entry), fetch) in self.queued.iter().enumerate().zip(fetches) {
            let entry_len = entry.stream.size();
            if entry_len % 128 != 0 {
                return Err(Error::bad_data(format!(
                    "entry for {} has unaligned footprint {entry_len}",
                    entry.path_spec.display_name()
                )));
            }

            let current = dat_files.last_mut().unwrap();
            if current.len() as u64 + entry_len > self.options.max_dat_file_size
                && current.len() as u64 > DATA_ENTRIES_START
            {
                let mut next = Vec::new();
                next.resize(DATA_ENTRIES_START as usize, 0);
                dat_files.push(next);
            }

            let current = dat_files.last_mut().unwrap();
            let offset = current.len() as u64;
            let dat_index = (dat_files.len() - 1) as u32;

            let buf = fetch.join()?;
            current.extend_from_slice(&buf);

            let is_synonym = self.text_promoted.contains(&i);
            let locator = DataLocator::new(dat_index, is_synonym, offset);
            assigned.push((entry.path_spec.clone(), locator, is_synonym));

            debug!(path = %entry.path_spec.display_name(), dat_index, offset, "placed entry");
            if let Some(cb) = progress.as_deref_mut() {
                cb(i + 1, total);
            }
        }

        let mut pair_hash_entries: Vec<(u32, u32, DataLocator)> =
            assigned.iter().map(|(s, l, _)| (s.path_hash(), s.name_hash(), *l)).collect();
        pair_hash_entries.sort_by_key(|(p, n, _)| (*p, *n));

        let mut full_hash_entries: Vec<(u32, DataLocator)> =
            assigned.iter().map(|(s, l, _)| (s.full_hash(), *l)).collect();
        full_hash_entries.sort_by_key(|(f, _)| *f);

        let text_entries: Vec<TextLocatorEntry> = assigned
            .iter()
            .filter(|(_, _, is_syn)| *is_syn)
            .filter_map(|(s, l, _)| {
                s.text().map(|t| TextLocatorEntry {
                    path_hash: s.path_hash(),
                    name_hash: s.name_hash(),
                    locator: *l,
                    full_path: t.to_string(),
                })
            })
            .collect();

        let index1 = build_index1(&pair_hash_entries, &text_entries, dat_files.len());
        let index2 = build_index2(&full_hash_entries, &text_entries, dat_files.len());

        for (i, dat) in dat_files.iter_mut().enumerate() {
            let total_data_size = dat.len() as u64 - DATA_ENTRIES_START;
            let first_entry_region = &dat[DATA_ENTRIES_START as usize
                ..(DATA_ENTRIES_START as usize + 24).min(dat.len())];
            let data_sha1 = digest::sha1(&dat[DATA_ENTRIES_START as usize..]);
            let first_entry_header_sha1 = digest::sha1(first_entry_region);

            let header = ArchiveHeader::new_data(i as u32, self.options.max_dat_file_size as u32);
            let sub = DataSubHeader {
                dat_file_index: i as u32,
                total_data_size,
                max_file_size: self.options.max_dat_file_size as u32,
                data_sha1,
                first_entry_header_sha1,
            };
            dat[0..crate::container::HEADER_SIZE].copy_from_slice(&header.to_bytes());
            dat[crate::container::HEADER_SIZE
                ..crate::container::HEADER_SIZE + crate::container::DATA_SUBHEADER_SIZE]
                .copy_from_slice(&sub.to_bytes());
        }

        info!(entries = total, dat_files = dat_files.len(), "archive finalized");
        Ok(GeneratedArchive { index1, index2, dat_files })
    }

    /// Finalize and write `<6hex>.win32.index`, `.index2`, and `.dat0..N`
    /// into `dir`.
    pub fn export_to_files(&self, dir: impl AsRef<std::path::Path>) -> Result<()> {
        let generated = self.finalize(None)?;
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let prefix = format!("{:06x}", self.id.packed_id());

        std::fs::write(dir.join(format!("{prefix}.win32.index")), &generated.index1)?;
        std::fs::write(dir.join(format!("{prefix}.win32.index2")), &generated.index2)?;
        for (i, dat) in generated.dat_files.iter().enumerate() {
            std::fs::write(dir.join(format!("{prefix}.win32.dat{i}")), dat)?;
        }
        Ok(())
    }

    pub fn export_to_views(&self) -> Result<GeneratedArchive> {
        self.finalize(None)
    }
}

const INDEX_HEADER_SIZE: usize = 1024;

fn build_index1(
    pair_hash: &[(u32, u32, DataLocator)],
    text: &[TextLocatorEntry],
    dat_count: usize,
) -> Vec<u8> {
    let mut hash_body = Vec::with_capacity(pair_hash.len() * 16);
    for (p, n, loc) in pair_hash {
        let mut rec = [0u8; 16];
        LittleEndian::write_u32(&mut rec[0..], *p);
        LittleEndian::write_u32(&mut rec[4..], *n);
        LittleEndian::write_u32(&mut rec[8..], loc.raw());
        hash_body.extend_from_slice(&rec);
    }
    assemble_index(&hash_body, text, dat_count)
}

fn build_index2(
    full_hash: &[(u32, DataLocator)],
    text: &[TextLocatorEntry],
    dat_count: usize,
) -> Vec<u8> {
    let mut hash_body = Vec::with_capacity(full_hash.len() * 8);
    for (f, loc) in full_hash {
        let mut rec = [0u8; 8];
        LittleEndian::write_u32(&mut rec[0..], *f);
        LittleEndian::write_u32(&mut rec[4..], loc.raw());
        hash_body.extend_from_slice(&rec);
    }
    assemble_index(&hash_body, text, dat_count)
}

fn assemble_index(hash_body: &[u8], text: &[TextLocatorEntry], dat_count: usize) -> Vec<u8> {
    let text_body = write_text_locators(text);
    let segment3_body: Vec<u8> = Vec::new();

    let mut dat_body = Vec::with_capacity(4 + dat_count * digest::SHA1_SIZE);
    let mut count_buf = [0u8; 4];
    LittleEndian::write_u32(&mut count_buf, dat_count as u32);
    dat_body.extend_from_slice(&count_buf);
    for _ in 0..dat_count {
        dat_body.extend_from_slice(&[0u8; digest::SHA1_SIZE]);
    }

    let header = ArchiveHeader::new_index();
    let header_bytes = header.to_bytes();

    let mut offset = (crate::container::HEADER_SIZE + INDEX_HEADER_SIZE) as u64;
    let hash_desc = segment_descriptor(offset, &hash_body);
    offset += hash_body.len() as u64;
    let text_desc = segment_descriptor(offset, &text_body);
    offset += text_body.len() as u64;
    let seg3_desc = segment_descriptor(offset, &segment3_body);
    offset += segment3_body.len() as u64;
    let dat_desc = segment_descriptor(offset, &dat_body);

    let mut index_header_buf = vec![0u8; INDEX_HEADER_SIZE];
    LittleEndian::write_u32(&mut index_header_buf[0..], INDEX_HEADER_SIZE as u32);
    let mut at = 4;
    hash_desc.write(&mut index_header_buf, at);
    at += 28;
    text_desc.write(&mut index_header_buf, at);
    at += 28;
    seg3_desc.write(&mut index_header_buf, at);
    at += 28;
    dat_desc.write(&mut index_header_buf, at);

    let mut out = Vec::new();
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&index_header_buf);
    out.extend_from_slice(&hash_body);
    out.extend_from_slice(&text_body);
    out.extend_from_slice(&segment3_body);
    out.extend_from_slice(&dat_body);
    out
}

fn segment_descriptor(offset: u64, body: &[u8]) -> crate::container::SegmentDescriptor {
    crate::container::SegmentDescriptor {
        offset,
        size: body.len() as u64,
        sha1: digest::sha1(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    fn make_entry(bytes: &[u8]) -> Arc<dyn Stream> {
        let mut padded = bytes.to_vec();
        let pad = crate::block::align_128(padded.len()) - padded.len();
        padded.resize(padded.len() + pad, 0);
        Arc::new(MemoryStream::new(padded))
    }

    #[test]
    fn generates_index1_and_index2_agreeing_on_locators() {
        let id = ArchiveId::new(0x0a, 0, 0);
        let mut gen = ArchiveGenerator::new(id, GeneratorOptions::default());

        for (name, size) in [("a.exl", 0usize), ("b.exl", 1), ("c.exl", 100000)] {
            let payload = vec![0x42u8; size];
            let packed = crate::packed::empty::pack_passthrough(&payload);
            gen.add(PathSpec::parse(&format!("exd/{name}")), make_entry(&packed)).unwrap();
        }

        let generated = gen.finalize(None).unwrap();
        assert_eq!(generated.dat_files.len(), 1);
        assert!(generated.index1.len() > crate::container::HEADER_SIZE);
        assert!(generated.index2.len() > crate::container::HEADER_SIZE);
    }

    #[test]
    fn full_hash_collision_is_rejected() {
        let id = ArchiveId::new(0x00, 0, 0);
        let mut gen = ArchiveGenerator::new(id, GeneratorOptions::default());
        let spec = PathSpec::parse("common/font/font1.tex");
        gen.add(spec.clone(), make_entry(&crate::packed::empty::pack_passthrough(b"a"))).unwrap();
        let err = gen.add(spec, make_entry(&crate::packed::empty::pack_passthrough(b"b")));
        assert!(matches!(err, Err(Error::HashCollision(_))));
    }

    #[test]
    fn add_compressed_round_trips_through_the_standard_codec() {
        let id = ArchiveId::new(0x0a, 0, 0);
        let mut gen = ArchiveGenerator::new(id, GeneratorOptions::default());
        let data: Vec<u8> = (0..40000u32).map(|i| (i % 200) as u8).collect();
        gen.add_compressed(PathSpec::parse("exd/big.exl"), &data).unwrap();

        let generated = gen.finalize(None).unwrap();
        let index1 = MemoryStream::new(generated.index1.clone());
        let index2 = MemoryStream::new(generated.index2.clone());
        let dat0: Arc<dyn Stream> = Arc::new(MemoryStream::new(generated.dat_files[0].clone()));
        let reader =
            crate::archive_reader::ArchiveReader::open(id, &index1, &index2, vec![dat0], true).unwrap();
        let mut unpacker = reader.at(&PathSpec::parse("exd/big.exl")).unwrap();
        let mut out = vec![0u8; data.len()];
        unpacker.read_exact_at(0, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn parallel_worker_count_does_not_change_placement_order() {
        let id = ArchiveId::new(0x00, 0, 0);
        let mut opts = GeneratorOptions::default();
        opts.worker_count = 4;
        let mut gen = ArchiveGenerator::new(id, opts);
        for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
            gen.add(
                PathSpec::parse(&format!("common/{name}")),
                make_entry(format!("contents of {name}").as_bytes()),
            )
            .unwrap();
        }
        let generated = gen.finalize(None).unwrap();
        assert_eq!(generated.dat_files.len(), 1);
    }
}
