#![cfg_attr(not(any(test, feature = "std")), no_std)]
extern crate alloc;

pub mod common;
pub mod mount_opts;
pub mod hooks;
pub mod latency;
pub mod content;
pub mod node;
pub mod superblock;

// Operations on `Session`
mod dir;
mod link;
mod file;
mod attr;

pub mod fstype;

#[cfg(feature = "fuse")]
pub mod fuse;


pub use common::{
    DisksimAttr, DisksimError, DisksimFileType, DisksimFsStat, DisksimPermission, DisksimResult,
    DisksimTimeSpec, NodeId, Owner, SetAttr, ROOT_ID,
};
pub use dir::DirEntry;
pub use file::MappedRegion;
pub use fstype::DisksimFsType;
pub use link::SYMLINK_MAX;
pub use mount_opts::{MountOpts, UnknownOptionPolicy};
pub use node::Node;
pub use superblock::{Session, SessionStats};

/// Reported as `f_type` by statfs.
pub const DISKSIMFS_MAGIC: u32 = 0xdeadbeef;

/// Block size reported by statfs and getattr.
pub const BLOCK_SIZE: u32 = 4096;

/// Allocation granularity of file content, picked by the `chunk*` features.
pub const CHUNK_SIZE: usize = if cfg!(feature = "chunk512") {
    512
} else if cfg!(feature = "chunk1k") {
    1024
} else if cfg!(feature = "chunk8k") {
    8192
} else if cfg!(feature = "chunk32k") {
    8192 * 2 * 2
} else {
    4096
};
