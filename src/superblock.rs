//! The live state of one mount.
//!
//! A [`Session`] owns the mount options, the latency gate, the injected hooks
//! and an arena of every node that still has a name. Namespace and data
//! operations live in `dir`, `link`, `file` and `attr` as further `impl
//! Session` blocks.

use alloc::{collections::BTreeMap, string::String, sync::Arc};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::info;
use serde::{Deserialize, Serialize};
use spin::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    common::{
        DisksimError, DisksimFsStat, DisksimResult, DisksimTimeSpec, NodeId, NAME_MAX, ROOT_ID,
    },
    hooks::SessionHooks,
    latency::LatencyGate,
    mount_opts::MountOpts,
    node::{Node, NodeData, NodeKind},
    BLOCK_SIZE, DISKSIMFS_MAGIC,
};

/// Held for the duration of one operation. Teardown waits until none is held.
pub(crate) struct OpGuard<'a> {
    _state: RwLockReadGuard<'a, ()>,
}

pub struct Session {
    opts: MountOpts,
    gate: LatencyGate,
    hooks: SessionHooks,
    /// Every node with at least one name, keyed by id.
    nodes: RwLock<BTreeMap<NodeId, Arc<Node>>>,
    next_ino: AtomicU64,
    /// Serializes rename and rmdir, the only operations that lock a
    /// directory nested inside another one.
    rename_lock: Mutex<()>,
    /// Read side held by in-flight operations, write side by teardown.
    state_lock: RwLock<()>,
    closing: AtomicBool,
}

/// Point-in-time counters for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub options: String,
    pub nodes: u64,
    pub directories: u64,
    pub regular_files: u64,
    pub resident_bytes: u64,
    pub delayed_ms: u64,
}

impl SessionStats {
    pub fn to_json(&self) -> DisksimResult<String> {
        crate::common::to_json(self)
    }
}

impl Session {
    /// Create a session with the default std hooks: wall clock and real
    /// thread sleeps.
    #[cfg(feature = "std")]
    pub fn new(opts: MountOpts) -> Arc<Self> {
        Self::with_hooks(opts, SessionHooks::default())
    }

    pub fn with_hooks(opts: MountOpts, hooks: SessionHooks) -> Arc<Self> {
        let now = hooks.clock.now();
        let root = Node::new(ROOT_ID, NodeKind::Directory, opts.mode, hooks.root_owner, now);
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_ID, Arc::new(root));
        Arc::new(Self {
            gate: LatencyGate::new(&opts, hooks.delay.clone()),
            opts,
            hooks,
            nodes: RwLock::new(nodes),
            next_ino: AtomicU64::new(ROOT_ID + 1),
            rename_lock: Mutex::new(()),
            state_lock: RwLock::new(()),
            closing: AtomicBool::new(false),
        })
    }

    pub fn opts(&self) -> &MountOpts {
        &self.opts
    }

    pub fn show_options(&self) -> String {
        self.opts.show_options()
    }

    pub fn root(&self) -> DisksimResult<Arc<Node>> {
        self.node(ROOT_ID)
    }

    /// Resolve an id to a live node.
    pub fn node(&self, ino: NodeId) -> DisksimResult<Arc<Node>> {
        let _guard = self.enter()?;
        self.nodes.read().get(&ino).cloned().ok_or(DisksimError::NotFound)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn statfs(&self) -> DisksimResult<DisksimFsStat> {
        let _guard = self.enter()?;
        let nodes = self.nodes.read();
        let blocks = nodes
            .values()
            .filter_map(|node| node.content())
            .map(|content| content.read().resident_bytes() / BLOCK_SIZE as u64)
            .sum();
        Ok(DisksimFsStat {
            f_type: DISKSIMFS_MAGIC,
            f_bsize: BLOCK_SIZE,
            f_namemax: NAME_MAX as u32,
            f_files: nodes.len() as u64,
            f_blocks: blocks,
        })
    }

    pub fn stats(&self) -> SessionStats {
        let nodes = self.nodes.read();
        let mut stats = SessionStats {
            options: self.opts.show_options(),
            nodes: nodes.len() as u64,
            directories: 0,
            regular_files: 0,
            resident_bytes: 0,
            delayed_ms: self.gate.delayed_ms(),
        };
        for node in nodes.values() {
            match node.data() {
                NodeData::Directory(_) => stats.directories += 1,
                NodeData::RegularFile(content) => {
                    stats.regular_files += 1;
                    stats.resident_bytes += content.read().resident_bytes();
                }
                NodeData::Symlink(_) | NodeData::Special(_) => {}
            }
        }
        stats
    }

    /// Tear the session down. New operations fail with `Unmounted`; the call
    /// blocks until every in-flight operation, pending delays included, has
    /// finished, then drops every node. Nodes still pinned by an outside
    /// `Arc` (an open file handle) are freed when that last reference goes.
    pub fn destroy(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let _state = self.drain();
        let released = {
            let mut nodes = self.nodes.write();
            let count = nodes.len();
            nodes.clear();
            count
        };
        info!("disksimfs: unmounted, released {} nodes", released);
    }

    /// Wait for every operation guard to go away. In-flight operations may
    /// sit in a delay for a long time, so under std the waiting thread
    /// yields between attempts instead of spinning hot.
    fn drain(&self) -> RwLockWriteGuard<'_, ()> {
        loop {
            if let Some(guard) = self.state_lock.try_write() {
                return guard;
            }
            #[cfg(feature = "std")]
            std::thread::yield_now();
            #[cfg(not(feature = "std"))]
            core::hint::spin_loop();
        }
    }

    pub(crate) fn enter(&self) -> DisksimResult<OpGuard<'_>> {
        let state = self.state_lock.read();
        if self.closing.load(Ordering::SeqCst) {
            return Err(DisksimError::Unmounted);
        }
        Ok(OpGuard { _state: state })
    }

    pub(crate) fn rename_lock(&self) -> spin::MutexGuard<'_, ()> {
        self.rename_lock.lock()
    }

    pub(crate) fn gate(&self) -> &LatencyGate {
        &self.gate
    }

    pub(crate) fn hooks(&self) -> &SessionHooks {
        &self.hooks
    }

    pub(crate) fn now(&self) -> DisksimTimeSpec {
        self.hooks.clock.now()
    }

    pub(crate) fn alloc_ino(&self) -> NodeId {
        self.next_ino.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn lookup_id(&self, ino: NodeId) -> DisksimResult<Arc<Node>> {
        self.nodes.read().get(&ino).cloned().ok_or(DisksimError::NotFound)
    }

    pub(crate) fn insert_node(&self, node: Arc<Node>) {
        self.nodes.write().insert(node.id(), node);
    }

    /// Drop a node from the arena once it has no names left.
    pub(crate) fn release_node(&self, ino: NodeId) {
        if self.nodes.write().remove(&ino).is_some() {
            log::debug!("disksimfs: released inode {}", ino);
        }
    }
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("opts", &self.opts)
            .field("nodes", &self.node_count())
            .field("closing", &self.is_closed())
            .finish()
    }
}
