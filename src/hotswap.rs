//! Hot-swappable packed stream: a fixed-footprint region whose payload can
//! be replaced in place without touching any offset recorded in an index.
//!
//! Intended for live modification of a running consumer reading straight off
//! a data file: the region is reserved at a known size up front, and a
//! replacement entry can later be written into that same space and swapped
//! in atomically, so the index never needs to change.

use crate::error::{Error, Result};
use crate::stream::Stream;
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// A packed-entry-shaped stream whose backing bytes can be swapped out from
/// under concurrent readers.
///
/// Serves `current` if set, else `base`, else zero bytes, with any tail
/// beyond the served payload zero-filled up to `reserved`. The active stream
/// is guarded by a mutex so `swap` can't race a read.
pub struct HotSwapPackedStream {
    reserved: u64,
    state: Mutex<State>,
}

struct State {
    base: Option<Arc<dyn Stream>>,
    current: Option<Arc<dyn Stream>>,
}

impl HotSwapPackedStream {
    /// `reserved_size` is rounded up to the next 128-byte boundary, as every
    /// packed entry's on-disk footprint must be.
    pub fn new(reserved_size: u64, base: Option<Arc<dyn Stream>>) -> Self {
        let reserved = crate::block::align_128(reserved_size as usize) as u64;
        Self { reserved, state: Mutex::new(State { base, current: None }) }
    }

    pub fn reserved_size(&self) -> u64 {
        self.reserved
    }

    /// Atomically install `new_stream` as the active payload. Rejects a
    /// replacement too large for the reserved region, leaving the previous
    /// stream (if any) active.
    #[instrument(skip_all, fields(reserved = self.reserved))]
    pub fn swap(&self, new_stream: Arc<dyn Stream>) -> Result<()> {
        if new_stream.size() > self.reserved {
            return Err(Error::OutOfRange(format!(
                "replacement size {} exceeds reserved {}",
                new_stream.size(),
                self.reserved
            )));
        }
        let mut state = self.state.lock().unwrap();
        state.current = Some(new_stream);
        Ok(())
    }

    /// Revert to serving the base stream (or zero bytes, if there was none).
    pub fn revert(&self) {
        let mut state = self.state.lock().unwrap();
        state.current = None;
    }

    fn active(&self) -> Option<Arc<dyn Stream>> {
        let state = self.state.lock().unwrap();
        state.current.clone().or_else(|| state.base.clone())
    }
}

impl Stream for HotSwapPackedStream {
    fn size(&self) -> u64 {
        self.reserved
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.reserved {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.reserved - offset) as usize;
        let buf = &mut buf[..want];

        match self.active() {
            Some(stream) => {
                let payload_len = stream.size();
                if offset >= payload_len {
                    buf.fill(0);
                    return Ok(buf.len());
                }
                let from_payload = ((payload_len - offset).min(buf.len() as u64)) as usize;
                let n = stream.read_at(offset, &mut buf[..from_payload])?;
                buf[n..].fill(0);
                Ok(buf.len())
            }
            None => {
                buf.fill(0);
                Ok(buf.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    #[test]
    fn reserved_size_rounds_up_to_128() {
        let swap = HotSwapPackedStream::new(100, None);
        assert_eq!(swap.reserved_size(), 128);
    }

    #[test]
    fn serves_base_until_swapped() {
        let base: Arc<dyn Stream> = Arc::new(MemoryStream::new(vec![1u8; 50]));
        let swap = HotSwapPackedStream::new(128, Some(base));
        let mut buf = [0u8; 50];
        swap.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [1u8; 50]);
    }

    #[test]
    fn swap_replaces_served_payload() {
        let base: Arc<dyn Stream> = Arc::new(MemoryStream::new(vec![1u8; 50]));
        let swap = HotSwapPackedStream::new(128, Some(base));
        let replacement: Arc<dyn Stream> = Arc::new(MemoryStream::new(vec![2u8; 30]));
        swap.swap(replacement).unwrap();
        let mut buf = [0u8; 30];
        swap.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [2u8; 30]);
    }

    #[test]
    fn tail_beyond_payload_is_zero_filled_up_to_reserved() {
        let replacement: Arc<dyn Stream> = Arc::new(MemoryStream::new(vec![9u8; 10]));
        let swap = HotSwapPackedStream::new(128, None);
        swap.swap(replacement).unwrap();
        let mut buf = [0xffu8; 128];
        let n = swap.read_at(0, &mut buf).unwrap();
        assert_eq!(n, 128);
        assert_eq!(&buf[..10], &[9u8; 10]);
        assert!(buf[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_replacement_is_rejected_and_current_stream_unchanged() {
        let base: Arc<dyn Stream> = Arc::new(MemoryStream::new(vec![1u8; 10]));
        let swap = HotSwapPackedStream::new(128, Some(base));
        let oversized: Arc<dyn Stream> = Arc::new(MemoryStream::new(vec![2u8; 200]));
        assert!(matches!(swap.swap(oversized), Err(Error::OutOfRange(_))));

        let mut buf = [0u8; 10];
        swap.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [1u8; 10]);
    }

    #[test]
    fn revert_falls_back_to_base() {
        let base: Arc<dyn Stream> = Arc::new(MemoryStream::new(vec![1u8; 10]));
        let swap = HotSwapPackedStream::new(128, Some(base));
        swap.swap(Arc::new(MemoryStream::new(vec![2u8; 10]))).unwrap();
        swap.revert();
        let mut buf = [0u8; 10];
        swap.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [1u8; 10]);
    }

    #[test]
    fn reads_beyond_base_size_with_no_replacement_are_zero() {
        let base: Arc<dyn Stream> = Arc::new(MemoryStream::new(vec![1u8; 10]));
        let swap = HotSwapPackedStream::new(128, Some(base));
        let mut buf = [0xffu8; 20];
        swap.read_at(5, &mut buf).unwrap();
        assert_eq!(&buf[..5], &[1u8; 5]);
        assert!(buf[5..].iter().all(|&b| b == 0));
    }
}
