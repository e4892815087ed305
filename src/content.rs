//! In-memory content of a regular file.
//!
//! Storage is split into `CHUNK_SIZE` chunks keyed by chunk index. Chunks that
//! were never written are holes and read back as zeros, so extending a file
//! with a write far past its end costs nothing for the gap.

use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};
use core::cmp::min;

use crate::{
    common::{DisksimError, DisksimResult, MAX_FILE_SIZE},
    CHUNK_SIZE,
};

#[derive(Debug, Default)]
pub struct ContentStore {
    chunks: BTreeMap<u64, Box<[u8]>>,
    size: u64,
}

impl ContentStore {
    /// An empty store. Nothing is allocated until the first write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Logical size in bytes.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether any chunk memory is held.
    pub fn is_allocated(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// Bytes of chunk memory held.
    pub fn resident_bytes(&self) -> u64 {
        self.chunks.len() as u64 * CHUNK_SIZE as u64
    }

    /// Copy up to `buf.len()` bytes starting at `offset` into `buf`. Returns
    /// the number of bytes copied, short at end of file.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        if offset >= self.size {
            return 0;
        }
        let len = min(buf.len() as u64, self.size - offset) as usize;
        let mut done = 0;
        while done < len {
            let pos = offset + done as u64;
            let index = pos / CHUNK_SIZE as u64;
            let in_chunk = (pos % CHUNK_SIZE as u64) as usize;
            let n = min(CHUNK_SIZE - in_chunk, len - done);
            let dest = &mut buf[done..done + n];
            match self.chunks.get(&index) {
                Some(chunk) => dest.copy_from_slice(&chunk[in_chunk..in_chunk + n]),
                None => dest.fill(0),
            }
            done += n;
        }
        len
    }

    /// Read into a fresh buffer sized by the logical extent, not by what is
    /// resident. A buffer that cannot be reserved is `OutOfMemory`.
    pub fn read(&self, offset: u64, len: usize) -> DisksimResult<Vec<u8>> {
        let want = min(len as u64, self.size.saturating_sub(offset));
        let want = usize::try_from(want).map_err(|_| DisksimError::OutOfMemory)?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(want)
            .map_err(|_| DisksimError::OutOfMemory)?;
        buf.resize(want, 0);
        let n = self.read_at(offset, &mut buf);
        buf.truncate(n);
        Ok(buf)
    }

    /// Write `data` at `offset`, growing the file as needed. Calls `touched`
    /// with the index of every chunk written to.
    pub fn write_at(
        &mut self,
        offset: u64,
        data: &[u8],
        mut touched: impl FnMut(u64),
    ) -> DisksimResult<usize> {
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= MAX_FILE_SIZE)
            .ok_or(DisksimError::FileTooLarge)?;
        if data.is_empty() {
            return Ok(0);
        }

        let first = offset / CHUNK_SIZE as u64;
        let last = (end - 1) / CHUNK_SIZE as u64;
        // Allocate everything first so a failure leaves the store unchanged.
        let mut fresh = Vec::new();
        for index in first..=last {
            if !self.chunks.contains_key(&index) {
                fresh.push((index, alloc_chunk()?));
            }
        }
        self.chunks.extend(fresh);

        let mut done = 0;
        while done < data.len() {
            let pos = offset + done as u64;
            let index = pos / CHUNK_SIZE as u64;
            let in_chunk = (pos % CHUNK_SIZE as u64) as usize;
            let n = min(CHUNK_SIZE - in_chunk, data.len() - done);
            if let Some(chunk) = self.chunks.get_mut(&index) {
                chunk[in_chunk..in_chunk + n].copy_from_slice(&data[done..done + n]);
            }
            touched(index);
            done += n;
        }

        if end > self.size {
            self.size = end;
        }
        Ok(data.len())
    }

    /// Store into already existing bytes only, never growing the file.
    pub fn store_at(&mut self, offset: u64, data: &[u8], touched: impl FnMut(u64)) -> DisksimResult<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let n = min(data.len() as u64, self.size - offset) as usize;
        self.write_at(offset, &data[..n], touched)
    }

    /// Resize to `new_size`. Shrinking drops whole chunks past the end and
    /// zeroes the tail of the last partial chunk, so a later extension reads
    /// zeros.
    pub fn truncate(&mut self, new_size: u64) -> DisksimResult<()> {
        if new_size > MAX_FILE_SIZE {
            return Err(DisksimError::FileTooLarge);
        }
        if new_size < self.size {
            let keep = (new_size + CHUNK_SIZE as u64 - 1) / CHUNK_SIZE as u64;
            drop(self.chunks.split_off(&keep));
            let tail = (new_size % CHUNK_SIZE as u64) as usize;
            if tail != 0 {
                if let Some(chunk) = self.chunks.get_mut(&(new_size / CHUNK_SIZE as u64)) {
                    chunk[tail..].fill(0);
                }
            }
        }
        self.size = new_size;
        Ok(())
    }
}

fn alloc_chunk() -> DisksimResult<Box<[u8]>> {
    let mut chunk = Vec::new();
    chunk
        .try_reserve_exact(CHUNK_SIZE)
        .map_err(|_| DisksimError::OutOfMemory)?;
    chunk.resize(CHUNK_SIZE, 0);
    Ok(chunk.into_boxed_slice())
}
