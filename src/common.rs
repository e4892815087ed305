//! Types shared by every part of disksimfs: errors, mode bits, node kinds,
//! timestamps and attributes.

use alloc::string::String;

use bitflags::bitflags;
use onlyerror::Error;
use serde::{Deserialize, Serialize};

/// Session scoped node identifier. Doubles as the inode number.
pub type NodeId = u64;

/// Id of the root directory of every session.
pub const ROOT_ID: NodeId = 1;

/// Longest accepted single path component, in bytes.
pub const NAME_MAX: usize = 255;

/// Largest logical size a regular file may reach (MAX_LFS_FILESIZE).
pub const MAX_FILE_SIZE: u64 = i64::MAX as u64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisksimError {
    #[error("invalid mount option: {0}")]
    Config(String),
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    NameExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("operation not permitted")]
    OperationNotPermitted,
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("file name too long")]
    NameTooLong,
    #[error("file too large")]
    FileTooLarge,
    #[error("filesystem is unmounted")]
    Unmounted,
}

pub type DisksimResult<T> = Result<T, DisksimError>;

bitflags! {
    /// Mode word of a node: file type in the high bits, permissions below.
    #[derive(Serialize, Deserialize)]
    pub struct DisksimPermission: u32 {
        const S_IFMT = 0o170000;
        const S_IFSOCK = 0o140000;
        const S_IFLNK = 0o120000;
        const S_IFREG = 0o100000;
        const S_IFBLK = 0o060000;
        const S_IFDIR = 0o040000;
        const S_IFCHR = 0o020000;
        const S_IFIFO = 0o010000;

        const S_ISUID = 0o4000;
        const S_ISGID = 0o2000;
        const S_ISVTX = 0o1000;

        const S_IRWXU = 0o700;
        const S_IRUSR = 0o400;
        const S_IWUSR = 0o200;
        const S_IXUSR = 0o100;

        const S_IRWXG = 0o070;
        const S_IRGRP = 0o040;
        const S_IWGRP = 0o020;
        const S_IXGRP = 0o010;

        const S_IRWXO = 0o007;
        const S_IROTH = 0o004;
        const S_IWOTH = 0o002;
        const S_IXOTH = 0o001;

        /// Every permission bit including set-id and sticky (S_IALLUGO).
        const S_IALLUGO = 0o7777;
    }
}

impl DisksimPermission {
    /// Keep only the permission sub-bits of a raw mode value.
    pub fn from_mode_masked(mode: u32) -> Self {
        Self::from_bits_truncate(mode & Self::S_IALLUGO.bits())
    }

    /// Permission part of this mode word.
    pub fn perm(&self) -> u32 {
        self.bits() & Self::S_IALLUGO.bits()
    }

    /// Type part of this mode word.
    pub fn file_type_bits(&self) -> u32 {
        self.bits() & Self::S_IFMT.bits()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisksimFileType {
    Directory,
    RegularFile,
    Symlink,
    CharDevice,
    BlockDevice,
    NamedPipe,
    Socket,
}

impl DisksimFileType {
    /// Decode the type bits of a mode word. Zero type bits mean a regular
    /// file, as mknod(2) does.
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & DisksimPermission::S_IFMT.bits() {
            0 => Some(Self::RegularFile),
            0o100000 => Some(Self::RegularFile),
            0o040000 => Some(Self::Directory),
            0o120000 => Some(Self::Symlink),
            0o020000 => Some(Self::CharDevice),
            0o060000 => Some(Self::BlockDevice),
            0o010000 => Some(Self::NamedPipe),
            0o140000 => Some(Self::Socket),
            _ => None,
        }
    }

    pub fn type_bits(&self) -> DisksimPermission {
        match self {
            Self::Directory => DisksimPermission::S_IFDIR,
            Self::RegularFile => DisksimPermission::S_IFREG,
            Self::Symlink => DisksimPermission::S_IFLNK,
            Self::CharDevice => DisksimPermission::S_IFCHR,
            Self::BlockDevice => DisksimPermission::S_IFBLK,
            Self::NamedPipe => DisksimPermission::S_IFIFO,
            Self::Socket => DisksimPermission::S_IFSOCK,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DisksimTimeSpec {
    pub sec: i64,
    pub nsec: u32,
}

impl DisksimTimeSpec {
    pub const fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }
}

/// Owner assigned to newly created nodes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    pub const ROOT: Owner = Owner { uid: 0, gid: 0 };

    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

/// Snapshot of a node's attributes, as returned by getattr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisksimAttr {
    pub ino: NodeId,
    pub kind: DisksimFileType,
    pub mode: DisksimPermission,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub blksize: u32,
    pub rdev: u64,
    pub atime: DisksimTimeSpec,
    pub mtime: DisksimTimeSpec,
    pub ctime: DisksimTimeSpec,
}

/// Attribute changes requested through setattr. `None` leaves a field alone.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<DisksimTimeSpec>,
    pub mtime: Option<DisksimTimeSpec>,
}

/// Filesystem statistics for statfs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisksimFsStat {
    pub f_type: u32,
    pub f_bsize: u32,
    pub f_namemax: u32,
    pub f_files: u64,
    pub f_blocks: u64,
}

/// Serialize introspection data. Every serialization failure is reported
/// as `InvalidArgument`.
pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> DisksimResult<String> {
    serde_json::to_string(value).map_err(|_| DisksimError::InvalidArgument)
}

/// Validate a single path component handed to a namespace operation.
pub fn check_name(name: &str) -> DisksimResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(DisksimError::InvalidArgument);
    }
    if name.bytes().any(|b| b == b'/' || b == 0) {
        return Err(DisksimError::InvalidArgument);
    }
    if name.len() > NAME_MAX {
        return Err(DisksimError::NameTooLong);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_strips_type_bits() {
        let p = DisksimPermission::from_mode_masked(0o140755);
        assert_eq!(p.bits(), 0o755);
        assert_eq!(p.file_type_bits(), 0);
        let p = DisksimPermission::from_mode_masked(0o4711);
        assert!(p.contains(DisksimPermission::S_ISUID));
    }

    #[test]
    fn file_type_decoding() {
        assert_eq!(DisksimFileType::from_mode(0o644), Some(DisksimFileType::RegularFile));
        assert_eq!(DisksimFileType::from_mode(0o060600), Some(DisksimFileType::BlockDevice));
        assert_eq!(DisksimFileType::from_mode(0o040755), Some(DisksimFileType::Directory));
        assert_eq!(DisksimFileType::from_mode(0o170000), None);
    }

    #[test]
    fn names() {
        assert!(check_name("a").is_ok());
        assert_eq!(check_name(""), Err(DisksimError::InvalidArgument));
        assert_eq!(check_name(".."), Err(DisksimError::InvalidArgument));
        assert_eq!(check_name("a/b"), Err(DisksimError::InvalidArgument));
        assert_eq!(check_name(&"x".repeat(256)), Err(DisksimError::NameTooLong));
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refused"))
        }
    }

    #[test]
    fn json_failures_share_one_error() {
        assert_eq!(to_json(&Unserializable), Err(DisksimError::InvalidArgument));
        assert_eq!(to_json(&Owner::new(1, 2)).unwrap(), r#"{"uid":1,"gid":2}"#);
    }
}
