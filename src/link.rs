//! Names that come and go: hard links, unlink and symbolic links.

use alloc::{string::String, string::ToString, sync::Arc};

use log::debug;

use crate::{
    common::{check_name, DisksimError, DisksimResult, Owner},
    node::{Node, NodeData, NodeKind},
    superblock::Session,
};

/// Longest symlink target, one page including the terminating NUL.
pub const SYMLINK_MAX: usize = 4095;

impl Session {
    /// Add `name` in `parent` as another name of `existing`.
    pub fn link(&self, parent: &Arc<Node>, name: &str, existing: &Arc<Node>) -> DisksimResult<()> {
        let _guard = self.enter()?;
        check_name(name)?;
        if existing.is_dir() {
            return Err(DisksimError::OperationNotPermitted);
        }
        let mut entries = parent.entries().ok_or(DisksimError::NotADirectory)?.lock();
        if entries.contains_key(name) {
            return Err(DisksimError::NameExists);
        }
        if parent.nlink() == 0 {
            return Err(DisksimError::NotFound);
        }
        let now = self.now();
        {
            let mut meta = existing.meta();
            if meta.nlink == 0 {
                // its last name went away already
                return Err(DisksimError::NotFound);
            }
            meta.nlink += 1;
            meta.ctime = now;
        }
        entries.insert(name.to_string(), existing.id());
        parent.touch_mtime(now);
        debug!("disksimfs: link {} -> inode {} in inode {}", name, existing.id(), parent.id());
        Ok(())
    }

    /// Remove a non-directory name. The node goes away with its last name;
    /// callers still holding it keep a usable node until they drop it.
    pub fn unlink(&self, parent: &Arc<Node>, name: &str) -> DisksimResult<()> {
        let _guard = self.enter()?;
        check_name(name)?;
        let mut entries = parent.entries().ok_or(DisksimError::NotADirectory)?.lock();
        let ino = *entries.get(name).ok_or(DisksimError::NotFound)?;
        let child = self.lookup_id(ino)?;
        if child.is_dir() {
            return Err(DisksimError::IsADirectory);
        }
        entries.remove(name);
        let now = self.now();
        parent.touch_mtime(now);
        child.touch_ctime(now);
        if child.drop_nlink() == 0 {
            self.release_node(ino);
        }
        debug!("disksimfs: unlink {} (inode {}) from inode {}", name, ino, parent.id());
        Ok(())
    }

    /// Create a symbolic link. The target is stored verbatim and never
    /// resolved.
    pub fn symlink(&self, parent: &Arc<Node>, name: &str, target: &str, owner: Owner) -> DisksimResult<Arc<Node>> {
        if target.is_empty() || target.contains('\0') {
            return Err(DisksimError::InvalidArgument);
        }
        if target.len() > SYMLINK_MAX {
            return Err(DisksimError::NameTooLong);
        }
        self.create_node(parent, name, NodeKind::Symlink(target.to_string()), 0o777, owner)
    }

    pub fn readlink(&self, node: &Arc<Node>) -> DisksimResult<String> {
        let _guard = self.enter()?;
        match node.data() {
            NodeData::Symlink(target) => {
                node.touch_atime(self.now());
                Ok(target.clone())
            }
            NodeData::Directory(_) | NodeData::RegularFile(_) | NodeData::Special(_) => {
                Err(DisksimError::InvalidArgument)
            }
        }
    }
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
    fn hard_link_counts() {
        let sb = session();
        let root = sb.root().unwrap();
        let f = sb.create(&root, "a", 0o644, Owner::ROOT).unwrap();
        sb.link(&root, "b", &f).unwrap();
        assert_eq!(f.nlink(), 2);
        assert_eq!(sb.lookup(&root, "b").unwrap().id(), f.id());
        assert_eq!(sb.link(&root, "b", &f).unwrap_err(), DisksimError::NameExists);

        sb.unlink(&root, "a").unwrap();
        assert_eq!(f.nlink(), 1);
        assert!(sb.node(f.id()).is_ok());
        sb.unlink(&root, "b").unwrap();
        assert_eq!(f.nlink(), 0);
        assert_eq!(sb.node(f.id()).unwrap_err(), DisksimError::NotFound);
        // cannot bring a dead node back
        assert_eq!(sb.link(&root, "c", &f).unwrap_err(), DisksimError::NotFound);
    }

    #[test]
    fn link_directory_not_permitted() {
        let sb = session();
        let root = sb.root().unwrap();
        let d = sb.mkdir(&root, "d", 0o755, Owner::ROOT).unwrap();
        assert_eq!(sb.link(&root, "d2", &d).unwrap_err(), DisksimError::OperationNotPermitted);
        assert_eq!(d.nlink(), 2);
    }

    #[test]
    fn unlink_directory_is_refused() {
        let sb = session();
        let root = sb.root().unwrap();
        sb.mkdir(&root, "d", 0o755, Owner::ROOT).unwrap();
        assert_eq!(sb.unlink(&root, "d").unwrap_err(), DisksimError::IsADirectory);
        assert_eq!(sb.unlink(&root, "x").unwrap_err(), DisksimError::NotFound);
    }

    #[test]
    fn symlink_stores_target_verbatim() {
        let sb = session();
        let root = sb.root().unwrap();
        let l = sb.symlink(&root, "l", "../../nowhere//x", Owner::ROOT).unwrap();
        assert_eq!(sb.readlink(&l).unwrap(), "../../nowhere//x");
        assert_eq!(l.attr().mode.perm(), 0o777);
        assert_eq!(sb.symlink(&root, "e", "", Owner::ROOT).unwrap_err(), DisksimError::InvalidArgument);
        assert_eq!(sb.symlink(&root, "n", "a\0b", Owner::ROOT).unwrap_err(), DisksimError::InvalidArgument);
        let long = "x".repeat(SYMLINK_MAX + 1);
        assert_eq!(sb.symlink(&root, "t", &long, Owner::ROOT).unwrap_err(), DisksimError::NameTooLong);
        assert_eq!(sb.readlink(&root).unwrap_err(), DisksimError::InvalidArgument);
    }
}
