//! getattr / setattr.

use alloc::sync::Arc;

use crate::{
    common::{DisksimAttr, DisksimError, DisksimPermission, DisksimResult, SetAttr},
    node::Node,
    superblock::Session,
};

impl Session {
    pub fn getattr(&self, node: &Arc<Node>) -> DisksimResult<DisksimAttr> {
        let _guard = self.enter()?;
        Ok(node.attr())
    }

    /// Apply the requested changes and return the resulting attributes.
    /// Permission enforcement is the host's job; this only stores values.
    pub fn setattr(&self, node: &Arc<Node>, attr: SetAttr) -> DisksimResult<DisksimAttr> {
        let _guard = self.enter()?;
        if let Some(size) = attr.size {
            if node.is_dir() {
                return Err(DisksimError::IsADirectory);
            }
            self.do_truncate(node, size)?;
        }
        let now = self.now();
        {
            let mut meta = node.meta();
            if let Some(mode) = attr.mode {
                let type_bits = DisksimPermission::from_bits_truncate(meta.mode.file_type_bits());
                meta.mode = type_bits | DisksimPermission::from_mode_masked(mode);
            }
            if let Some(uid) = attr.uid {
                meta.uid = uid;
            }
            if let Some(gid) = attr.gid {
                meta.gid = gid;
            }
            if let Some(atime) = attr.atime {
                meta.atime = atime;
            }
            if let Some(mtime) = attr.mtime {
                meta.mtime = mtime;
            }
            meta.ctime = now;
        }
        Ok(node.attr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::{DisksimTimeSpec, Owner},
        hooks::{FixedClock, SessionHooks},
        latency::NoDelay,
        mount_opts::MountOpts,
    };

    fn session() -> Arc<Session> {
        let hooks = SessionHooks::new(Arc::new(FixedClock::new(42)), Arc::new(NoDelay));
        Session::with_hooks(MountOpts::default(), hooks)
    }

    #[test]
    fn chmod_keeps_type_bits() {
        let sb = session();
        let root = sb.root().unwrap();
        let f = sb.create(&root, "f", 0o644, Owner::ROOT).unwrap();
        let attr = sb
            .setattr(&f, SetAttr { mode: Some(0o170600), ..SetAttr::default() })
            .unwrap();
        assert_eq!(attr.mode.bits(), 0o100600);
    }

    #[test]
    fn chown_and_times() {
        let sb = session();
        let root = sb.root().unwrap();
        let f = sb.create(&root, "f", 0o644, Owner::ROOT).unwrap();
        let attr = sb
            .setattr(
                &f,
                SetAttr {
                    uid: Some(7),
                    gid: Some(8),
                    atime: Some(DisksimTimeSpec::new(1, 2)),
                    mtime: Some(DisksimTimeSpec::new(3, 4)),
                    ..SetAttr::default()
                },
            )
            .unwrap();
        assert_eq!((attr.uid, attr.gid), (7, 8));
        assert_eq!(attr.atime, DisksimTimeSpec::new(1, 2));
        assert_eq!(attr.mtime, DisksimTimeSpec::new(3, 4));
        assert_eq!(attr.ctime, DisksimTimeSpec::new(42, 0));
    }

    #[test]
    fn resize_through_setattr() {
        let sb = session();
        let root = sb.root().unwrap();
        let f = sb.create(&root, "f", 0o644, Owner::ROOT).unwrap();
        sb.write(&f, 0, &[1u8; 32]).unwrap();
        let attr = sb.setattr(&f, SetAttr { size: Some(8), ..SetAttr::default() }).unwrap();
        assert_eq!(attr.size, 8);
        assert_eq!(sb.read(&f, 0, 32).unwrap(), vec![1u8; 8]);
        assert_eq!(
            sb.setattr(&root, SetAttr { size: Some(0), ..SetAttr::default() }).unwrap_err(),
            DisksimError::IsADirectory
        );
        assert_eq!(sb.getattr(&f).unwrap().size, 8);
    }
}
