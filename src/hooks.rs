//! Capabilities the integration layer hands to a session when it is created.
//!
//! The core never reaches into the host for these: a clock for timestamps,
//! a delay provider for the latency gate and a tracker told about dirtied
//! content chunks.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicI64, Ordering};

use crate::{
    common::{DisksimTimeSpec, NodeId, Owner},
    latency::Delay,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DisksimTimeSpec;
}

/// Wall clock backed by `std::time::SystemTime`.
#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now(&self) -> DisksimTimeSpec {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        DisksimTimeSpec::new(since_epoch.as_secs() as i64, since_epoch.subsec_nanos())
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct FixedClock {
    sec: AtomicI64,
}

impl FixedClock {
    pub fn new(sec: i64) -> Self {
        Self {
            sec: AtomicI64::new(sec),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.sec.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DisksimTimeSpec {
        DisksimTimeSpec::new(self.sec.load(Ordering::SeqCst), 0)
    }
}

/// Receives a notification for every content chunk a write touches.
pub trait DirtyTracker: Send + Sync {
    fn mark_dirty(&self, ino: NodeId, chunk: u64);
}

/// Content lives only in memory, so there is nothing to write back.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWriteback;

impl DirtyTracker for NoWriteback {
    fn mark_dirty(&self, _ino: NodeId, _chunk: u64) {}
}

#[derive(Clone)]
pub struct SessionHooks {
    pub clock: Arc<dyn Clock>,
    pub delay: Arc<dyn Delay>,
    pub dirty: Arc<dyn DirtyTracker>,
    /// Owner of the root directory.
    pub root_owner: Owner,
}

impl SessionHooks {
    pub fn new(clock: Arc<dyn Clock>, delay: Arc<dyn Delay>) -> Self {
        Self {
            clock,
            delay,
            dirty: Arc::new(NoWriteback),
            root_owner: Owner::ROOT,
        }
    }

    pub fn with_dirty_tracker(mut self, dirty: Arc<dyn DirtyTracker>) -> Self {
        self.dirty = dirty;
        self
    }

    pub fn with_root_owner(mut self, owner: Owner) -> Self {
        self.root_owner = owner;
        self
    }
}

#[cfg(feature = "std")]
impl Default for SessionHooks {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(crate::latency::ThreadSleep))
    }
}

impl core::fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionHooks")
            .field("root_owner", &self.root_owner)
            .finish_non_exhaustive()
    }
}
