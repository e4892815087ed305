//! Directory operations: node creation, lookup, listing, rmdir and rename.

use alloc::{string::String, string::ToString, sync::Arc, vec::Vec};

use log::debug;

use crate::{
    common::{
        check_name, DisksimError, DisksimFileType, DisksimPermission, DisksimResult, NodeId,
        Owner,
    },
    node::{DeviceSpec, Node, NodeKind, SpecialKind},
    superblock::Session,
};

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: NodeId,
    pub kind: DisksimFileType,
}

impl Session {
    /// Create a node of any kind under `parent`.
    pub fn create_node(
        &self,
        parent: &Arc<Node>,
        name: &str,
        kind: NodeKind,
        mode: u32,
        owner: Owner,
    ) -> DisksimResult<Arc<Node>> {
        let _guard = self.enter()?;
        self.do_create(parent, name, kind, mode, owner)
    }

    /// Create a regular file.
    pub fn create(&self, parent: &Arc<Node>, name: &str, mode: u32, owner: Owner) -> DisksimResult<Arc<Node>> {
        self.create_node(parent, name, NodeKind::RegularFile, mode, owner)
    }

    pub fn mkdir(&self, parent: &Arc<Node>, name: &str, mode: u32, owner: Owner) -> DisksimResult<Arc<Node>> {
        self.create_node(parent, name, NodeKind::Directory, mode, owner)
    }

    /// Create a node whose kind is taken from the type bits of `mode`.
    pub fn mknod(
        &self,
        parent: &Arc<Node>,
        name: &str,
        mode: u32,
        rdev: u64,
        owner: Owner,
    ) -> DisksimResult<Arc<Node>> {
        let special = |kind| NodeKind::Special(DeviceSpec { kind, rdev });
        let kind = match DisksimFileType::from_mode(mode).ok_or(DisksimError::InvalidArgument)? {
            DisksimFileType::RegularFile => NodeKind::RegularFile,
            DisksimFileType::Directory => NodeKind::Directory,
            DisksimFileType::Symlink => return Err(DisksimError::InvalidArgument),
            DisksimFileType::CharDevice => special(SpecialKind::CharDevice),
            DisksimFileType::BlockDevice => special(SpecialKind::BlockDevice),
            DisksimFileType::NamedPipe => NodeKind::Special(DeviceSpec { kind: SpecialKind::Fifo, rdev: 0 }),
            DisksimFileType::Socket => NodeKind::Special(DeviceSpec { kind: SpecialKind::Socket, rdev: 0 }),
        };
        self.create_node(parent, name, kind, mode, owner)
    }

    /// Single component lookup. Exact, case-sensitive match. A name that can
    /// never be stored (".", "..", empty, or holding '/' or NUL) is simply
    /// not found; an over-long name is still `NameTooLong`.
    pub fn lookup(&self, dir: &Arc<Node>, name: &str) -> DisksimResult<Arc<Node>> {
        let _guard = self.enter()?;
        match check_name(name) {
            Err(DisksimError::InvalidArgument) => return Err(DisksimError::NotFound),
            other => other?,
        }
        let entries = dir.entries().ok_or(DisksimError::NotADirectory)?.lock();
        let ino = *entries.get(name).ok_or(DisksimError::NotFound)?;
        self.lookup_id(ino)
    }

    /// Entries of `dir` sorted by name. "." and ".." are left to the host.
    pub fn readdir(&self, dir: &Arc<Node>) -> DisksimResult<Vec<DirEntry>> {
        let _guard = self.enter()?;
        let entries = dir.entries().ok_or(DisksimError::NotADirectory)?.lock();
        let mut list = Vec::with_capacity(entries.len());
        for (name, ino) in entries.iter() {
            let kind = self.lookup_id(*ino)?.file_type();
            list.push(DirEntry {
                name: name.clone(),
                ino: *ino,
                kind,
            });
        }
        dir.touch_atime(self.now());
        Ok(list)
    }

    /// Remove an empty directory.
    pub fn rmdir(&self, parent: &Arc<Node>, name: &str) -> DisksimResult<()> {
        let _guard = self.enter()?;
        check_name(name)?;
        let _rename = self.rename_lock();
        let mut entries = parent.entries().ok_or(DisksimError::NotADirectory)?.lock();
        let ino = *entries.get(name).ok_or(DisksimError::NotFound)?;
        let child = self.lookup_id(ino)?;
        let child_entries = child.entries().ok_or(DisksimError::NotADirectory)?.lock();
        if !child_entries.is_empty() {
            return Err(DisksimError::NotEmpty);
        }
        // Dead directories refuse new entries, see do_create.
        child.clear_nlink();
        drop(child_entries);

        entries.remove(name);
        parent.drop_nlink();
        let now = self.now();
        parent.touch_mtime(now);
        child.touch_ctime(now);
        self.release_node(ino);
        debug!("disksimfs: rmdir {} (inode {}) from inode {}", name, ino, parent.id());
        Ok(())
    }

    /// Move `old_name` in `old_parent` to `new_name` in `new_parent`,
    /// replacing a compatible target. Both directories are locked for the
    /// whole mutation, so a concurrent lookup sees the entry in exactly one
    /// place.
    pub fn rename(
        &self,
        old_parent: &Arc<Node>,
        old_name: &str,
        new_parent: &Arc<Node>,
        new_name: &str,
    ) -> DisksimResult<()> {
        let _guard = self.enter()?;
        check_name(old_name)?;
        check_name(new_name)?;
        let old_dir = old_parent.entries().ok_or(DisksimError::NotADirectory)?;
        let new_dir = new_parent.entries().ok_or(DisksimError::NotADirectory)?;
        let _rename = self.rename_lock();

        let cross_dir = old_parent.id() != new_parent.id();
        // Directories only move under the rename lock, so the ancestry seen
        // here holds for the rest of the call.
        let moving = {
            let entries = old_dir.lock();
            *entries.get(old_name).ok_or(DisksimError::NotFound)?
        };
        let moving = self.lookup_id(moving)?;
        if moving.is_dir() && cross_dir && self.is_ancestor(&moving, new_parent.id())? {
            return Err(DisksimError::InvalidArgument);
        }

        // Lock both directories, lower id first.
        let (mut old_entries, mut new_entries) = if !cross_dir {
            (old_dir.lock(), None)
        } else if old_parent.id() < new_parent.id() {
            let old = old_dir.lock();
            (old, Some(new_dir.lock()))
        } else {
            let new = new_dir.lock();
            (old_dir.lock(), Some(new))
        };

        if new_parent.nlink() == 0 {
            return Err(DisksimError::NotFound);
        }
        let src_ino = *old_entries.get(old_name).ok_or(DisksimError::NotFound)?;
        let src = self.lookup_id(src_ino)?;
        if !cross_dir && old_name == new_name {
            return Ok(());
        }

        let target = match new_entries.as_ref() {
            Some(entries) => entries.get(new_name).copied(),
            None => old_entries.get(new_name).copied(),
        };
        let now = self.now();
        if let Some(target_ino) = target {
            if target_ino == src_ino {
                // Two names of the same node: nothing to do.
                return Ok(());
            }
            let victim = self.lookup_id(target_ino)?;
            match (src.is_dir(), victim.is_dir()) {
                (true, false) => return Err(DisksimError::NotADirectory),
                (false, true) => return Err(DisksimError::IsADirectory),
                (true, true) => {
                    if target_ino == old_parent.id() {
                        // already locked above, and it holds the source
                        return Err(DisksimError::NotEmpty);
                    }
                    let victim_entries = victim.entries().ok_or(DisksimError::NotADirectory)?.lock();
                    if !victim_entries.is_empty() {
                        return Err(DisksimError::NotEmpty);
                    }
                    victim.clear_nlink();
                    drop(victim_entries);
                    new_parent.drop_nlink();
                    self.release_node(target_ino);
                }
                (false, false) => {
                    if victim.drop_nlink() == 0 {
                        self.release_node(target_ino);
                    }
                }
            }
            victim.touch_ctime(now);
        }

        old_entries.remove(old_name);
        match new_entries.as_mut() {
            Some(entries) => entries.insert(new_name.to_string(), src_ino),
            None => old_entries.insert(new_name.to_string(), src_ino),
        };
        if src.is_dir() && cross_dir {
            old_parent.drop_nlink();
            new_parent.inc_nlink();
        }

        old_parent.touch_mtime(now);
        if cross_dir {
            new_parent.touch_mtime(now);
        }
        src.touch_ctime(now);
        debug!(
            "disksimfs: rename {}/{} -> {}/{} (inode {})",
            old_parent.id(),
            old_name,
            new_parent.id(),
            new_name,
            src_ino
        );
        Ok(())
    }

    /// Whether `target` sits anywhere below (or is) `dir`.
    fn is_ancestor(&self, dir: &Arc<Node>, target: NodeId) -> DisksimResult<bool> {
        if dir.id() == target {
            return Ok(true);
        }
        let mut stack = alloc::vec![dir.clone()];
        while let Some(node) = stack.pop() {
            let children: Vec<NodeId> = match node.entries() {
                Some(entries) => entries.lock().values().copied().collect(),
                None => continue,
            };
            for ino in children {
                if ino == target {
                    return Ok(true);
                }
                if let Ok(child) = self.lookup_id(ino) {
                    if child.is_dir() {
                        stack.push(child);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Insert a new node under `parent`. The node enters the arena before the
    /// entry is published, so an entry never names a missing node.
    pub(crate) fn do_create(
        &self,
        parent: &Arc<Node>,
        name: &str,
        kind: NodeKind,
        mode: u32,
        owner: Owner,
    ) -> DisksimResult<Arc<Node>> {
        check_name(name)?;
        let mut entries = parent.entries().ok_or(DisksimError::NotADirectory)?.lock();
        if entries.contains_key(name) {
            return Err(DisksimError::NameExists);
        }
        let is_dir = matches!(kind, NodeKind::Directory);
        let (owner, mode) = {
            let parent_meta = parent.meta();
            if parent_meta.nlink == 0 {
                // removed while the caller still held it
                return Err(DisksimError::NotFound);
            }
            inherit_owner(parent_meta.mode, parent_meta.gid, owner, mode, is_dir)
        };

        let now = self.now();
        let node = Arc::new(Node::new(self.alloc_ino(), kind, mode, owner, now));
        self.insert_node(node.clone());
        entries.insert(name.to_string(), node.id());
        if is_dir {
            parent.inc_nlink();
        }
        parent.touch_mtime(now);
        debug!(
            "disksimfs: created {:?} {} (inode {}) in inode {}",
            node.file_type(),
            name,
            node.id(),
            parent.id()
        );
        Ok(node)
    }
}

/// A set-group-id directory hands its group to new children, and its
/// set-group-id bit to new subdirectories.
fn inherit_owner(
    parent_mode: DisksimPermission,
    parent_gid: u32,
    owner: Owner,
    mode: u32,
    is_dir: bool,
) -> (Owner, u32) {
    let mut mode = DisksimPermission::from_mode_masked(mode).bits();
    if !parent_mode.contains(DisksimPermission::S_ISGID) {
        return (owner, mode);
    }
    if is_dir {
        mode |= DisksimPermission::S_ISGID.bits();
    }
    (Owner::new(owner.uid, parent_gid), mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hooks::{FixedClock, SessionHooks},
        latency::NoDelay,
        mount_opts::MountOpts,
    };

    fn session() -> Arc<Session> {
        let hooks = SessionHooks::new(Arc::new(FixedClock::new(1)), Arc::new(NoDelay));
        Session::with_hooks(MountOpts::default(), hooks)
    }

    #[test]
    fn create_and_lookup() {
        let sb = session();
        let root = sb.root().unwrap();
        let file = sb.create(&root, "a", 0o644, Owner::ROOT).unwrap();
        assert_eq!(sb.lookup(&root, "a").unwrap().id(), file.id());
        assert_eq!(sb.lookup(&root, "A").unwrap_err(), DisksimError::NotFound);
        assert_eq!(sb.create(&root, "a", 0o644, Owner::ROOT).unwrap_err(), DisksimError::NameExists);
        assert_eq!(sb.create(&file, "b", 0o644, Owner::ROOT).unwrap_err(), DisksimError::NotADirectory);
        assert_eq!(sb.lookup(&file, "b").unwrap_err(), DisksimError::NotADirectory);
    }

    #[test]
    fn lookup_of_unstorable_name_is_not_found() {
        let sb = session();
        let root = sb.root().unwrap();
        for name in [".", "..", "", "a/b", "nul\0"] {
            assert_eq!(sb.lookup(&root, name).unwrap_err(), DisksimError::NotFound, "{:?}", name);
        }
        let long = "n".repeat(256);
        assert_eq!(sb.lookup(&root, &long).unwrap_err(), DisksimError::NameTooLong);
        // creation still rejects them outright
        assert_eq!(sb.create(&root, ".", 0o644, Owner::ROOT).unwrap_err(), DisksimError::InvalidArgument);
    }

    #[test]
    fn mkdir_bumps_parent_links() {
        let sb = session();
        let root = sb.root().unwrap();
        let sub = sb.mkdir(&root, "d", 0o755, Owner::ROOT).unwrap();
        assert_eq!(sub.nlink(), 2);
        assert_eq!(root.nlink(), 3);
        sb.create(&root, "f", 0o644, Owner::ROOT).unwrap();
        assert_eq!(root.nlink(), 3);
        sb.rmdir(&root, "d").unwrap();
        assert_eq!(root.nlink(), 2);
        assert_eq!(sub.nlink(), 0);
    }

    #[test]
    fn rmdir_rules() {
        let sb = session();
        let root = sb.root().unwrap();
        let d = sb.mkdir(&root, "d", 0o755, Owner::ROOT).unwrap();
        sb.create(&d, "f", 0o644, Owner::ROOT).unwrap();
        sb.create(&root, "plain", 0o644, Owner::ROOT).unwrap();
        assert_eq!(sb.rmdir(&root, "d").unwrap_err(), DisksimError::NotEmpty);
        assert_eq!(sb.rmdir(&root, "plain").unwrap_err(), DisksimError::NotADirectory);
        assert_eq!(sb.rmdir(&root, "nope").unwrap_err(), DisksimError::NotFound);
    }

    #[test]
    fn create_in_removed_directory_fails() {
        let sb = session();
        let root = sb.root().unwrap();
        let d = sb.mkdir(&root, "d", 0o755, Owner::ROOT).unwrap();
        sb.rmdir(&root, "d").unwrap();
        assert_eq!(sb.create(&d, "f", 0o644, Owner::ROOT).unwrap_err(), DisksimError::NotFound);
    }

    #[test]
    fn mknod_kinds() {
        let sb = session();
        let root = sb.root().unwrap();
        let fifo = sb.mknod(&root, "p", 0o010644, 0, Owner::ROOT).unwrap();
        assert_eq!(fifo.file_type(), DisksimFileType::NamedPipe);
        let chr = sb.mknod(&root, "null", 0o020666, 0x0103, Owner::ROOT).unwrap();
        assert_eq!(chr.attr().rdev, 0x0103);
        let reg = sb.mknod(&root, "r", 0o600, 0, Owner::ROOT).unwrap();
        assert_eq!(reg.file_type(), DisksimFileType::RegularFile);
        let dir = sb.mknod(&root, "d", 0o040700, 0, Owner::ROOT).unwrap();
        assert!(dir.is_dir());
        assert_eq!(root.nlink(), 3);
        assert_eq!(sb.mknod(&root, "l", 0o120777, 0, Owner::ROOT).unwrap_err(), DisksimError::InvalidArgument);
    }

    #[test]
    fn setgid_directory_is_inherited() {
        let sb = session();
        let root = sb.root().unwrap();
        let shared = sb.mkdir(&root, "shared", 0o2775, Owner::new(0, 50)).unwrap();
        let file = sb.create(&shared, "f", 0o644, Owner::new(1000, 1000)).unwrap();
        let sub = sb.mkdir(&shared, "sub", 0o755, Owner::new(1000, 1000)).unwrap();
        assert_eq!((file.attr().uid, file.attr().gid), (1000, 50));
        assert_eq!(sub.attr().gid, 50);
        assert!(sub.attr().mode.contains(DisksimPermission::S_ISGID));
        assert!(!file.attr().mode.contains(DisksimPermission::S_ISGID));
    }

    #[test]
    fn readdir_sorted() {
        let sb = session();
        let root = sb.root().unwrap();
        sb.create(&root, "b", 0o644, Owner::ROOT).unwrap();
        sb.mkdir(&root, "a", 0o755, Owner::ROOT).unwrap();
        let names: Vec<_> = sb.readdir(&root).unwrap().into_iter().map(|e| (e.name, e.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("a".to_string(), DisksimFileType::Directory),
                ("b".to_string(), DisksimFileType::RegularFile)
            ]
        );
    }

    #[test]
    fn rename_within_directory() {
        let sb = session();
        let root = sb.root().unwrap();
        let f = sb.create(&root, "old", 0o644, Owner::ROOT).unwrap();
        sb.rename(&root, "old", &root, "new").unwrap();
        assert_eq!(sb.lookup(&root, "old").unwrap_err(), DisksimError::NotFound);
        assert_eq!(sb.lookup(&root, "new").unwrap().id(), f.id());
        sb.rename(&root, "new", &root, "new").unwrap();
        assert_eq!(sb.rename(&root, "gone", &root, "x").unwrap_err(), DisksimError::NotFound);
    }

    #[test]
    fn rename_directory_across_parents() {
        let sb = session();
        let root = sb.root().unwrap();
        let a = sb.mkdir(&root, "a", 0o755, Owner::ROOT).unwrap();
        let b = sb.mkdir(&root, "b", 0o755, Owner::ROOT).unwrap();
        let d = sb.mkdir(&a, "d", 0o755, Owner::ROOT).unwrap();
        assert_eq!((a.nlink(), b.nlink()), (3, 2));
        sb.rename(&a, "d", &b, "d2").unwrap();
        assert_eq!((a.nlink(), b.nlink()), (2, 3));
        assert_eq!(sb.lookup(&b, "d2").unwrap().id(), d.id());
        assert_eq!(root.nlink(), 4);
    }

    #[test]
    fn rename_replaces_target() {
        let sb = session();
        let root = sb.root().unwrap();
        let src = sb.create(&root, "src", 0o644, Owner::ROOT).unwrap();
        let dst = sb.create(&root, "dst", 0o644, Owner::ROOT).unwrap();
        let before = sb.node_count();
        sb.rename(&root, "src", &root, "dst").unwrap();
        assert_eq!(sb.lookup(&root, "dst").unwrap().id(), src.id());
        assert_eq!(dst.nlink(), 0);
        assert_eq!(sb.node_count(), before - 1);
    }

    #[test]
    fn rename_type_mismatch_and_nonempty() {
        let sb = session();
        let root = sb.root().unwrap();
        sb.create(&root, "f", 0o644, Owner::ROOT).unwrap();
        let d = sb.mkdir(&root, "d", 0o755, Owner::ROOT).unwrap();
        let full = sb.mkdir(&root, "full", 0o755, Owner::ROOT).unwrap();
        sb.create(&full, "x", 0o644, Owner::ROOT).unwrap();
        assert_eq!(sb.rename(&root, "d", &root, "f").unwrap_err(), DisksimError::NotADirectory);
        assert_eq!(sb.rename(&root, "f", &root, "d").unwrap_err(), DisksimError::IsADirectory);
        assert_eq!(sb.rename(&root, "d", &root, "full").unwrap_err(), DisksimError::NotEmpty);
        // empty directory over empty directory
        let e = sb.mkdir(&root, "e", 0o755, Owner::ROOT).unwrap();
        assert_eq!(root.nlink(), 5);
        sb.rename(&root, "e", &root, "d").unwrap();
        assert_eq!(d.nlink(), 0);
        assert_eq!(root.nlink(), 4);
        assert_eq!(sb.lookup(&root, "d").unwrap().id(), e.id());
    }

    #[test]
    fn rename_into_own_subtree_rejected() {
        let sb = session();
        let root = sb.root().unwrap();
        let a = sb.mkdir(&root, "a", 0o755, Owner::ROOT).unwrap();
        let b = sb.mkdir(&a, "b", 0o755, Owner::ROOT).unwrap();
        let c = sb.mkdir(&b, "c", 0o755, Owner::ROOT).unwrap();
        assert_eq!(sb.rename(&root, "a", &c, "a").unwrap_err(), DisksimError::InvalidArgument);
        assert_eq!(sb.rename(&root, "a", &a, "a").unwrap_err(), DisksimError::InvalidArgument);
        assert_eq!(sb.lookup(&root, "a").unwrap().id(), a.id());
    }
}
