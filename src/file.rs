//! Data operations on regular files.
//!
//! `read` and `write` go through the latency gate. Truncation, fsync and
//! mapped access do not: in the kernel they never pass through the
//! read_iter/write_iter path the delay is attached to.

use alloc::{sync::Arc, vec::Vec};

use spin::RwLock;

use crate::{
    common::{DisksimError, DisksimResult, NodeId},
    content::ContentStore,
    hooks::DirtyTracker,
    node::{Node, NodeData},
    superblock::Session,
};

fn regular(node: &Node) -> DisksimResult<&RwLock<ContentStore>> {
    match node.data() {
        NodeData::RegularFile(content) => Ok(content),
        NodeData::Directory(_) => Err(DisksimError::IsADirectory),
        NodeData::Symlink(_) | NodeData::Special(_) => Err(DisksimError::InvalidArgument),
    }
}

impl Session {
    /// Read up to `len` bytes at `offset` after waiting the read delay.
    /// Returns fewer bytes when the range runs past end of file, and
    /// `OutOfMemory` when the result buffer cannot be allocated.
    pub fn read(&self, node: &Arc<Node>, offset: u64, len: usize) -> DisksimResult<Vec<u8>> {
        let _guard = self.enter()?;
        let content = regular(node)?;
        let data = self.gate().wrap_read(node.id(), || content.read().read(offset, len))?;
        node.touch_atime(self.now());
        Ok(data)
    }

    /// Buffer variant of [`Session::read`].
    pub fn read_at(&self, node: &Arc<Node>, offset: u64, buf: &mut [u8]) -> DisksimResult<usize> {
        let _guard = self.enter()?;
        let content = regular(node)?;
        let n = self.gate().wrap_read(node.id(), || content.read().read_at(offset, buf));
        node.touch_atime(self.now());
        Ok(n)
    }

    /// Write `data` at `offset` after waiting the write delay. Gaps past the
    /// old end of file read back as zeros.
    pub fn write(&self, node: &Arc<Node>, offset: u64, data: &[u8]) -> DisksimResult<usize> {
        let _guard = self.enter()?;
        let content = regular(node)?;
        let ino = node.id();
        let dirty = &self.hooks().dirty;
        let written = self.gate().wrap_write(ino, || {
            content
                .write()
                .write_at(offset, data, |chunk| dirty.mark_dirty(ino, chunk))
        })?;
        node.touch_mtime(self.now());
        Ok(written)
    }

    /// Set the logical size, zero-extending or discarding the tail.
    pub fn truncate(&self, node: &Arc<Node>, size: u64) -> DisksimResult<()> {
        let _guard = self.enter()?;
        self.do_truncate(node, size)
    }

    /// Content is memory resident; there is nothing to flush.
    pub fn fsync(&self, node: &Arc<Node>) -> DisksimResult<()> {
        let _guard = self.enter()?;
        regular(node).map(|_| ())
    }

    /// Map the file's current extent.
    pub fn map(&self, node: &Arc<Node>) -> DisksimResult<MappedRegion> {
        let _guard = self.enter()?;
        let len = regular(node)?.read().len();
        Ok(MappedRegion {
            node: node.clone(),
            len,
            dirty: self.hooks().dirty.clone(),
        })
    }

    pub(crate) fn do_truncate(&self, node: &Arc<Node>, size: u64) -> DisksimResult<()> {
        regular(node)?.write().truncate(size)?;
        node.touch_mtime(self.now());
        Ok(())
    }
}

/// A mapped view of a regular file. Loads and stores hit the content store
/// directly, without the latency gate, and never change the file size. The
/// region pins its node, so it stays valid after the last name is removed.
pub struct MappedRegion {
    node: Arc<Node>,
    len: u64,
    dirty: Arc<dyn DirtyTracker>,
}

impl MappedRegion {
    pub fn ino(&self) -> NodeId {
        self.node.id()
    }

    /// Length of the mapping, fixed when it was created.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn load(&self, offset: u64, buf: &mut [u8]) -> DisksimResult<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let n = core::cmp::min(buf.len() as u64, self.len - offset) as usize;
        Ok(regular(&self.node)?.read().read_at(offset, &mut buf[..n]))
    }

    pub fn store(&self, offset: u64, data: &[u8]) -> DisksimResult<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let n = core::cmp::min(data.len() as u64, self.len - offset) as usize;
        let ino = self.node.id();
        regular(&self.node)?
            .write()
            .store_at(offset, &data[..n], |chunk| self.dirty.mark_dirty(ino, chunk))
    }
}

impl core::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ino", &self.node.id())
            .field("len", &self.len)
            .finish()
    }
}
