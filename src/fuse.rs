//! FUSE front end: serves a [`Session`] through `fuser`.
//!
//! Inode numbers are node ids. Every open file handle pins its node, so a
//! file unlinked while open keeps reading and writing until released.

use std::{
    collections::HashMap,
    ffi::OsStr,
    path::Path,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use log::{debug, info};

use crate::{
    common::{DisksimAttr, DisksimError, DisksimFileType, DisksimResult, DisksimTimeSpec, NodeId, Owner, SetAttr},
    fstype::DISKSIMFS_NAME,
    node::Node,
    superblock::Session,
};

const TTL: Duration = Duration::from_secs(1);

impl DisksimError {
    pub fn errno(&self) -> i32 {
        match self {
            DisksimError::Config(_) | DisksimError::InvalidArgument => libc::EINVAL,
            DisksimError::NotFound => libc::ENOENT,
            DisksimError::NameExists => libc::EEXIST,
            DisksimError::NotADirectory => libc::ENOTDIR,
            DisksimError::IsADirectory => libc::EISDIR,
            DisksimError::NotEmpty => libc::ENOTEMPTY,
            DisksimError::OperationNotPermitted => libc::EPERM,
            DisksimError::OutOfMemory => libc::ENOMEM,
            DisksimError::NameTooLong => libc::ENAMETOOLONG,
            DisksimError::FileTooLarge => libc::EFBIG,
            DisksimError::Unmounted => libc::EIO,
        }
    }
}

impl From<DisksimFileType> for FileType {
    fn from(kind: DisksimFileType) -> Self {
        match kind {
            DisksimFileType::Directory => FileType::Directory,
            DisksimFileType::RegularFile => FileType::RegularFile,
            DisksimFileType::Symlink => FileType::Symlink,
            DisksimFileType::CharDevice => FileType::CharDevice,
            DisksimFileType::BlockDevice => FileType::BlockDevice,
            DisksimFileType::NamedPipe => FileType::NamedPipe,
            DisksimFileType::Socket => FileType::Socket,
        }
    }
}

fn to_system_time(ts: DisksimTimeSpec) -> SystemTime {
    if ts.sec >= 0 {
        UNIX_EPOCH + Duration::new(ts.sec as u64, ts.nsec)
    } else {
        UNIX_EPOCH - Duration::from_secs(ts.sec.unsigned_abs()) + Duration::from_nanos(ts.nsec as u64)
    }
}

fn from_system_time(time: SystemTime) -> DisksimTimeSpec {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => DisksimTimeSpec::new(d.as_secs() as i64, d.subsec_nanos()),
        Err(before) => {
            let d = before.duration();
            DisksimTimeSpec::new(-(d.as_secs() as i64), 0)
        }
    }
}

fn from_time_or_now(time: TimeOrNow) -> DisksimTimeSpec {
    match time {
        TimeOrNow::SpecificTime(time) => from_system_time(time),
        TimeOrNow::Now => from_system_time(SystemTime::now()),
    }
}

fn to_file_attr(attr: &DisksimAttr) -> FileAttr {
    let mtime = to_system_time(attr.mtime);
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: to_system_time(attr.atime),
        mtime,
        ctime: to_system_time(attr.ctime),
        crtime: mtime,
        kind: attr.kind.into(),
        perm: attr.mode.perm() as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev as u32,
        blksize: attr.blksize,
        flags: 0,
    }
}

fn name_str(name: &OsStr) -> DisksimResult<&str> {
    name.to_str().ok_or(DisksimError::InvalidArgument)
}

fn owner(req: &Request<'_>) -> Owner {
    Owner::new(req.uid(), req.gid())
}

pub struct DisksimFuse {
    session: Arc<Session>,
    handles: HashMap<u64, Arc<Node>>,
    next_fh: u64,
}

impl DisksimFuse {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            handles: HashMap::new(),
            next_fh: 1,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn open_handle(&mut self, node: Arc<Node>) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, node);
        fh
    }

    /// Resolve `ino`, falling back to open handles for nodes whose last name
    /// is gone.
    fn resolve(&self, ino: NodeId, fh: Option<u64>) -> DisksimResult<Arc<Node>> {
        if let Some(node) = fh.and_then(|fh| self.handles.get(&fh)) {
            return Ok(node.clone());
        }
        match self.session.node(ino) {
            Err(DisksimError::NotFound) => self
                .handles
                .values()
                .find(|node| node.id() == ino)
                .cloned()
                .ok_or(DisksimError::NotFound),
            other => other,
        }
    }

    fn reply_entry(&self, node: DisksimResult<Arc<Node>>, reply: ReplyEntry) {
        match node.and_then(|node| self.session.getattr(&node)) {
            Ok(attr) => reply.entry(&TTL, &to_file_attr(&attr), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create_entry(
        &self,
        parent: u64,
        name: &OsStr,
        create: impl FnOnce(&Session, &Arc<Node>, &str) -> DisksimResult<Arc<Node>>,
    ) -> DisksimResult<Arc<Node>> {
        let dir = self.resolve(parent, None)?;
        let name = name_str(name)?;
        create(&self.session, &dir, name)
    }
}

impl Filesystem for DisksimFuse {
    fn destroy(&mut self) {
        info!("{}: fuse session ending, {} open handles", DISKSIMFS_NAME, self.handles.len());
        self.session.destroy();
        self.handles.clear();
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let node = self.create_entry(parent, name, |sb, dir, name| sb.lookup(dir, name));
        self.reply_entry(node, reply);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        match self.resolve(ino, fh).and_then(|node| self.session.getattr(&node)) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let changes = SetAttr {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(from_time_or_now),
            mtime: mtime.map(from_time_or_now),
        };
        match self.resolve(ino, fh).and_then(|node| self.session.setattr(&node, changes)) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        match self.resolve(ino, None).and_then(|node| self.session.readlink(&node)) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let owner = owner(req);
        let node = self.create_entry(parent, name, |sb, dir, name| {
            sb.mknod(dir, name, mode & !umask, rdev as u64, owner)
        });
        self.reply_entry(node, reply);
    }

    fn mkdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, umask: u32, reply: ReplyEntry) {
        let owner = owner(req);
        let node = self.create_entry(parent, name, |sb, dir, name| sb.mkdir(dir, name, mode & !umask, owner));
        self.reply_entry(node, reply);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let res = self
            .resolve(parent, None)
            .and_then(|dir| self.session.unlink(&dir, name_str(name)?));
        match res {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let res = self
            .resolve(parent, None)
            .and_then(|dir| self.session.rmdir(&dir, name_str(name)?));
        match res {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(&mut self, req: &Request<'_>, parent: u64, link_name: &OsStr, target: &Path, reply: ReplyEntry) {
        let owner = owner(req);
        let node = self.create_entry(parent, link_name, |sb, dir, name| {
            let target = target.to_str().ok_or(DisksimError::InvalidArgument)?;
            sb.symlink(dir, name, target, owner)
        });
        self.reply_entry(node, reply);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        if flags != 0 {
            // RENAME_NOREPLACE / RENAME_EXCHANGE are not supported
            reply.error(libc::EINVAL);
            return;
        }
        let res = (|| {
            let old_dir = self.resolve(parent, None)?;
            let new_dir = self.resolve(newparent, None)?;
            self.session.rename(&old_dir, name_str(name)?, &new_dir, name_str(newname)?)
        })();
        match res {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn link(&mut self, _req: &Request<'_>, ino: u64, newparent: u64, newname: &OsStr, reply: ReplyEntry) {
        let node = self.resolve(ino, None).and_then(|existing| {
            let dir = self.resolve(newparent, None)?;
            self.session.link(&dir, name_str(newname)?, &existing)?;
            Ok(existing)
        });
        self.reply_entry(node, reply);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.resolve(ino, None) {
            Ok(node) => {
                let fh = self.open_handle(node);
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let res = self
            .resolve(ino, Some(fh))
            .and_then(|node| self.session.read(&node, offset as u64, size as usize));
        match res {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let res = self
            .resolve(ino, Some(fh))
            .and_then(|node| self.session.write(&node, offset as u64, data));
        match res {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Some(node) = self.handles.remove(&fh) {
            debug!("{}: released handle {} of inode {}", DISKSIMFS_NAME, fh, node.id());
        }
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.resolve(ino, Some(fh)).and_then(|node| self.session.fsync(&node)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let entries = match self.resolve(ino, None).and_then(|dir| self.session.readdir(&dir)) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };
        let dots = [(ino, FileType::Directory, "."), (ino, FileType::Directory, "..")];
        let listing = dots
            .into_iter()
            .chain(entries.iter().map(|e| (e.ino, e.kind.into(), e.name.as_str())));
        for (idx, (entry_ino, kind, name)) in listing.enumerate().skip(offset.max(0) as usize) {
            if reply.add(entry_ino, (idx + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match self.session.statfs() {
            Ok(st) => reply.statfs(
                st.f_blocks,
                0,
                0,
                st.f_files,
                0,
                st.f_bsize,
                st.f_namemax,
                st.f_bsize,
            ),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let owner = owner(req);
        let res = self
            .create_entry(parent, name, |sb, dir, name| sb.create(dir, name, mode & !umask, owner))
            .and_then(|node| Ok((self.session.getattr(&node)?, node)));
        match res {
            Ok((attr, node)) => {
                let fh = self.open_handle(node);
                reply.created(&TTL, &to_file_attr(&attr), 0, fh, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }
}

/// Serve `session` at `mountpoint` until it is unmounted.
pub fn mount(session: Arc<Session>, mountpoint: &Path) -> std::io::Result<()> {
    info!("{}: mounting at {} ({})", DISKSIMFS_NAME, mountpoint.display(), session.opts());
    let options = [
        MountOption::FSName(DISKSIMFS_NAME.to_owned()),
        MountOption::AutoUnmount,
    ];
    fuser::mount2(DisksimFuse::new(session), mountpoint, &options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(DisksimError::NotFound.errno(), libc::ENOENT);
        assert_eq!(DisksimError::NotEmpty.errno(), libc::ENOTEMPTY);
        assert_eq!(DisksimError::Config("x".into()).errno(), libc::EINVAL);
        assert_eq!(DisksimError::FileTooLarge.errno(), libc::EFBIG);
    }

    #[test]
    fn times_convert_both_ways() {
        let ts = DisksimTimeSpec::new(1_700_000_000, 250);
        assert_eq!(from_system_time(to_system_time(ts)), ts);
        assert_eq!(to_system_time(DisksimTimeSpec::new(-5, 0)), UNIX_EPOCH - Duration::from_secs(5));
    }

    #[test]
    fn unlinked_open_file_still_resolves() {
        let sb = Session::new(crate::MountOpts::default());
        let mut fs = DisksimFuse::new(sb.clone());
        let root = sb.root().unwrap();
        let f = sb.create(&root, "f", 0o644, Owner::ROOT).unwrap();
        let fh = fs.open_handle(f.clone());
        sb.unlink(&root, "f").unwrap();
        assert_eq!(fs.resolve(f.id(), None).unwrap().id(), f.id());
        assert_eq!(fs.resolve(f.id(), Some(fh)).unwrap().id(), f.id());
        fs.handles.remove(&fh);
        assert_eq!(fs.resolve(f.id(), None).unwrap_err(), DisksimError::NotFound);
    }
}
