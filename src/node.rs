//! Filesystem nodes.
//!
//! A node is one of four kinds; the kind is fixed at creation and carries the
//! kind specific state. Directories refer to their children by id only, the
//! session arena owns the nodes themselves.

use alloc::{collections::BTreeMap, string::String};

use serde::{Deserialize, Serialize};
use spin::{Mutex, RwLock};

use crate::{
    common::{DisksimAttr, DisksimFileType, DisksimPermission, DisksimTimeSpec, NodeId, Owner},
    content::ContentStore,
    BLOCK_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecialKind {
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl SpecialKind {
    pub fn file_type(&self) -> DisksimFileType {
        match self {
            SpecialKind::CharDevice => DisksimFileType::CharDevice,
            SpecialKind::BlockDevice => DisksimFileType::BlockDevice,
            SpecialKind::Fifo => DisksimFileType::NamedPipe,
            SpecialKind::Socket => DisksimFileType::Socket,
        }
    }
}

/// Descriptor of a special file. Devices carry their device number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub kind: SpecialKind,
    pub rdev: u64,
}

/// What kind of node to create, with the data needed to build it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    RegularFile,
    Symlink(String),
    Special(DeviceSpec),
}

impl NodeKind {
    pub fn file_type(&self) -> DisksimFileType {
        match self {
            NodeKind::Directory => DisksimFileType::Directory,
            NodeKind::RegularFile => DisksimFileType::RegularFile,
            NodeKind::Symlink(_) => DisksimFileType::Symlink,
            NodeKind::Special(dev) => dev.kind.file_type(),
        }
    }
}

#[derive(Debug)]
pub enum NodeData {
    Directory(Mutex<BTreeMap<String, NodeId>>),
    RegularFile(RwLock<ContentStore>),
    Symlink(String),
    Special(DeviceSpec),
}

#[derive(Debug, Clone)]
pub struct NodeMeta {
    /// Full mode word, type bits included.
    pub mode: DisksimPermission,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub atime: DisksimTimeSpec,
    pub mtime: DisksimTimeSpec,
    pub ctime: DisksimTimeSpec,
}

#[derive(Debug)]
pub struct Node {
    id: NodeId,
    data: NodeData,
    meta: Mutex<NodeMeta>,
}

impl Node {
    /// Build a node with its initial link count: 2 for directories (the entry
    /// in the parent plus its own "."), 1 for everything else.
    pub(crate) fn new(id: NodeId, kind: NodeKind, perm: u32, owner: Owner, now: DisksimTimeSpec) -> Self {
        let mode = kind.file_type().type_bits() | DisksimPermission::from_mode_masked(perm);
        let (data, nlink) = match kind {
            NodeKind::Directory => (NodeData::Directory(Mutex::new(BTreeMap::new())), 2),
            NodeKind::RegularFile => (NodeData::RegularFile(RwLock::new(ContentStore::new())), 1),
            NodeKind::Symlink(target) => (NodeData::Symlink(target), 1),
            NodeKind::Special(dev) => (NodeData::Special(dev), 1),
        };
        Self {
            id,
            data,
            meta: Mutex::new(NodeMeta {
                mode,
                uid: owner.uid,
                gid: owner.gid,
                nlink,
                atime: now,
                mtime: now,
                ctime: now,
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn data(&self) -> &NodeData {
        &self.data
    }

    pub fn file_type(&self) -> DisksimFileType {
        match &self.data {
            NodeData::Directory(_) => DisksimFileType::Directory,
            NodeData::RegularFile(_) => DisksimFileType::RegularFile,
            NodeData::Symlink(_) => DisksimFileType::Symlink,
            NodeData::Special(dev) => dev.kind.file_type(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.data, NodeData::Directory(_))
    }

    pub fn meta(&self) -> spin::MutexGuard<'_, NodeMeta> {
        self.meta.lock()
    }

    pub fn nlink(&self) -> u32 {
        self.meta.lock().nlink
    }

    /// Size as reported by getattr. Directories report zero, symlinks the
    /// length of their target.
    pub fn size(&self) -> u64 {
        match &self.data {
            NodeData::Directory(_) => 0,
            NodeData::RegularFile(content) => content.read().len(),
            NodeData::Symlink(target) => target.len() as u64,
            NodeData::Special(_) => 0,
        }
    }

    pub fn attr(&self) -> DisksimAttr {
        let size = self.size();
        let (rdev, resident) = match &self.data {
            NodeData::Special(dev) => (dev.rdev, 0),
            NodeData::RegularFile(content) => (0, content.read().resident_bytes()),
            _ => (0, 0),
        };
        let meta = self.meta.lock();
        DisksimAttr {
            ino: self.id,
            kind: self.file_type(),
            mode: meta.mode,
            nlink: meta.nlink,
            uid: meta.uid,
            gid: meta.gid,
            size,
            blocks: resident / 512,
            blksize: BLOCK_SIZE,
            rdev,
            atime: meta.atime,
            mtime: meta.mtime,
            ctime: meta.ctime,
        }
    }

    /// Directory entries, if this is a directory.
    pub(crate) fn entries(&self) -> Option<&Mutex<BTreeMap<String, NodeId>>> {
        match &self.data {
            NodeData::Directory(entries) => Some(entries),
            _ => None,
        }
    }

    pub(crate) fn content(&self) -> Option<&RwLock<ContentStore>> {
        match &self.data {
            NodeData::RegularFile(content) => Some(content),
            _ => None,
        }
    }

    pub(crate) fn inc_nlink(&self) {
        let mut meta = self.meta.lock();
        meta.nlink = meta.nlink.saturating_add(1);
    }

    /// Drop one link and return the remaining count.
    pub(crate) fn drop_nlink(&self) -> u32 {
        let mut meta = self.meta.lock();
        meta.nlink = meta.nlink.saturating_sub(1);
        meta.nlink
    }

    pub(crate) fn clear_nlink(&self) {
        self.meta.lock().nlink = 0;
    }

    pub(crate) fn touch_ctime(&self, now: DisksimTimeSpec) {
        self.meta.lock().ctime = now;
    }

    pub(crate) fn touch_mtime(&self, now: DisksimTimeSpec) {
        let mut meta = self.meta.lock();
        meta.mtime = now;
        meta.ctime = now;
    }

    pub(crate) fn touch_atime(&self, now: DisksimTimeSpec) {
        self.meta.lock().atime = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_link_counts() {
        let now = DisksimTimeSpec::new(5, 0);
        let dir = Node::new(2, NodeKind::Directory, 0o755, Owner::ROOT, now);
        let file = Node::new(3, NodeKind::RegularFile, 0o644, Owner::ROOT, now);
        assert_eq!(dir.nlink(), 2);
        assert_eq!(file.nlink(), 1);
        assert_eq!(dir.attr().mode.bits(), 0o040755);
        assert_eq!(file.attr().mode.bits(), 0o100644);
    }

    #[test]
    fn mode_type_bits_come_from_kind() {
        let now = DisksimTimeSpec::default();
        // type bits in the requested permission are discarded
        let file = Node::new(2, NodeKind::RegularFile, 0o040600, Owner::ROOT, now);
        assert_eq!(file.attr().mode.bits(), 0o100600);
        let link = Node::new(3, NodeKind::Symlink("x/y".into()), 0o777, Owner::new(1, 2), now);
        let attr = link.attr();
        assert_eq!(attr.kind, DisksimFileType::Symlink);
        assert_eq!(attr.size, 3);
        assert_eq!((attr.uid, attr.gid), (1, 2));
    }

    #[test]
    fn special_reports_rdev() {
        let dev = DeviceSpec { kind: SpecialKind::CharDevice, rdev: 0x0103 };
        let node = Node::new(2, NodeKind::Special(dev), 0o666, Owner::ROOT, DisksimTimeSpec::default());
        let attr = node.attr();
        assert_eq!(attr.kind, DisksimFileType::CharDevice);
        assert_eq!(attr.rdev, 0x0103);
        assert_eq!(attr.mode.file_type_bits(), 0o020000);
    }
}
