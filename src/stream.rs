//! Random-access, size-known byte source — the capability every higher
//! layer consumes instead of assuming a seekable OS handle.
//!
//! Split between `FileStream` (positioned reads under a mutex) and
//! `MemoryStream` (owning or borrowing a byte slice), plus a
//! `PartialViewStream` that shares bytes without copying.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::Read;
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::sync::Arc;
use std::sync::Mutex;

/// A random-access, size-known byte source.
///
/// Implementors report a total size and serve reads at an absolute offset;
/// a read past the end of the stream returns fewer bytes than requested
/// (never an error) so callers can distinguish "short read, EOF reached"
/// from "stream is broken".
pub trait Stream: Send + Sync {
    /// Total size of this stream in bytes.
    fn size(&self) -> u64;

    /// Read up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes actually written into `buf`, which is `< buf.len()`
    /// only when `offset + buf.len()` extends past `size()`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

/// Produce a view over `[offset, offset+length)` of `stream` that shares the
/// underlying bytes without copying. `length` is clamped to the remaining
/// stream size.
pub fn substream(stream: &Arc<dyn Stream>, offset: u64, length: u64) -> PartialViewStream {
    PartialViewStream::new(stream.clone(), offset, length)
}

/// Read exactly `buf.len()` bytes, failing with `UnexpectedEof` if the
/// stream runs out first.
pub fn read_fully(stream: &dyn Stream, offset: u64, buf: &mut [u8]) -> Result<()> {
    let n = stream.read_at(offset, buf)?;
    if n != buf.len() {
        return Err(Error::UnexpectedEof { wanted: buf.len(), got: n });
    }
    Ok(())
}

pub fn read_vec(stream: &dyn Stream, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_fully(stream, offset, &mut buf)?;
    Ok(buf)
}

// ── file_stream ──────────────────────────────────────────────────────────

/// A file-backed stream. Positioned reads go through `read_at`
/// (pread on unix; a mutex-guarded seek+read fallback elsewhere), so a
/// single handle safely serves concurrent readers.
#[cfg(unix)]
pub struct FileStream {
    file: File,
    size: u64,
}

#[cfg(not(unix))]
pub struct FileStream {
    file: Mutex<File>,
    size: u64,
}

impl FileStream {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(file)
    }

    #[cfg(unix)]
    pub fn from_file(file: File) -> Result<Self> {
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }

    #[cfg(not(unix))]
    pub fn from_file(file: File) -> Result<Self> {
        let size = file.metadata()?.len();
        Ok(Self { file: Mutex::new(file), size })
    }
}

impl Stream for FileStream {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.size - offset) as usize;
        let buf = &mut buf[..want];

        #[cfg(unix)]
        {
            let mut total = 0;
            while total < buf.len() {
                let n = self.file.read_at(&mut buf[total..], offset + total as u64)?;
                if n == 0 {
                    break;
                }
                total += n;
            }
            Ok(total)
        }
        #[cfg(not(unix))]
        {
            use std::io::Seek;
            use std::io::SeekFrom;
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf)?;
            Ok(buf.len())
        }
    }
}

// ── memory_stream ────────────────────────────────────────────────────────

/// An in-memory stream, immutable after construction and therefore free to
/// share across threads without locking.
#[derive(Clone)]
pub struct MemoryStream {
    data: Arc<Vec<u8>>,
}

impl MemoryStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: Arc::new(data) }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Stream for MemoryStream {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let want = buf.len().min(self.data.len() - start);
        buf[..want].copy_from_slice(&self.data[start..start + want]);
        Ok(want)
    }
}

// ── partial_view_stream ──────────────────────────────────────────────────

/// A substream view `(offset, length)` over another stream, sharing bytes
/// without copying.
pub struct PartialViewStream {
    inner: Arc<dyn Stream>,
    offset: u64,
    length: u64,
}

impl PartialViewStream {
    pub fn new(inner: Arc<dyn Stream>, offset: u64, length: u64) -> Self {
        let remaining = inner.size().saturating_sub(offset);
        let length = length.min(remaining);
        Self { inner, offset, length }
    }
}

impl Stream for PartialViewStream {
    fn size(&self) -> u64 {
        self.length
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.length {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.length - offset) as usize;
        self.inner.read_at(self.offset + offset, &mut buf[..want])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stream_short_read_at_eof() {
        let s = MemoryStream::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 10];
        let n = s.read_at(3, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], &[4, 5]);
    }

    #[test]
    fn memory_stream_read_past_end_is_empty() {
        let s = MemoryStream::new(vec![1, 2, 3]);
        let mut buf = [0u8; 4];
        assert_eq!(s.read_at(10, &mut buf).unwrap(), 0);
    }

    #[test]
    fn partial_view_clamps_length() {
        let s: Arc<dyn Stream> = Arc::new(MemoryStream::new((0u8..20).collect()));
        let view = substream(&s, 5, 100);
        assert_eq!(view.size(), 15);
        let mut buf = [0u8; 3];
        view.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [5, 6, 7]);
    }

    #[test]
    fn read_fully_rejects_short_reads() {
        let s = MemoryStream::new(vec![1, 2, 3]);
        let mut buf = [0u8; 5];
        assert!(read_fully(&s, 0, &mut buf).is_err());
    }
}
