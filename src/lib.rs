//! # sqpack-archive — SqPack game-client archive format
//!
//! Format guarantees:
//! - All numeric fields are little-endian
//! - Every archive consists of one index1 file, one index2 file, and one or
//!   more dat files; all three are required to open an archive
//! - Every packed entry starts at a 128-byte boundary; every block's on-disk
//!   footprint (header + body + padding) is a multiple of 128 bytes
//! - Index1 and index2 must describe the same set of entries with the same
//!   data locators — readers treat a mismatch as `BadData`
//! - Compression is always raw DEFLATE (window bits -15, no zlib header);
//!   `0x7D00` in a block's compressed-size field means "stored, not deflated"
//! - Re-packing then unpacking reproduces the original *decoded* bytes; it
//!   does not reproduce the exact bytes the original archive shipped with
//!
//! See `archive_reader` for the read path and `generator` for the write path.

pub mod error;
pub mod stream;
pub mod crc;
pub mod path_spec;
pub mod digest;
pub mod container;
pub mod index;
pub mod block;
pub mod packed;
pub mod archive_reader;
pub mod generator;
pub mod hotswap;
pub mod threadpool;
pub mod recovery;

pub use error::{Error, Result};
pub use stream::{Stream, FileStream, MemoryStream, PartialViewStream};
pub use path_spec::PathSpec;
pub use container::{ArchiveHeader, FileType};
pub use index::{Index1, Index2, DataLocator};
pub use block::{BlockHeader, BLOCK_HEADER_SIZE, RAW_MARKER};
pub use packed::{PackedType, PackedStream, PACKED_ENTRY_HEADER_SIZE};
pub use archive_reader::{ArchiveReader, EntryInfo};
pub use generator::{ArchiveGenerator, GeneratorOptions};
pub use hotswap::HotSwapPackedStream;
