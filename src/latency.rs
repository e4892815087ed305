//! The I/O latency gate.
//!
//! Every read and write against a regular file waits a fixed number of
//! milliseconds before the content store is touched. The wait is a blocking
//! one on the calling thread: it always runs to completion, is never
//! cancelled and is independent of the request size.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use log::info;

use crate::{common::NodeId, mount_opts::MountOpts};

/// Blocks the calling thread for a number of milliseconds.
pub trait Delay: Send + Sync {
    fn delay_ms(&self, ms: u32);
}

/// Real wall-clock wait. `thread::sleep` restarts after signals, so the full
/// duration always elapses.
#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

#[cfg(feature = "std")]
impl Delay for ThreadSleep {
    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl Delay for NoDelay {
    fn delay_ms(&self, _ms: u32) {}
}

/// Virtual clock: accounts for every requested delay without waiting.
#[derive(Debug, Default)]
pub struct RecordingDelay {
    total_ms: AtomicU64,
    calls: AtomicU64,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all delays requested so far.
    pub fn total_ms(&self) -> u64 {
        self.total_ms.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Delay for RecordingDelay {
    fn delay_ms(&self, ms: u32) {
        self.total_ms.fetch_add(ms as u64, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct LatencyGate {
    read_delay: u32,
    write_delay: u32,
    delay: Arc<dyn Delay>,
    delayed_ms: AtomicU64,
}

impl LatencyGate {
    pub fn new(opts: &MountOpts, delay: Arc<dyn Delay>) -> Self {
        Self {
            read_delay: opts.read_delay,
            write_delay: opts.write_delay,
            delay,
            delayed_ms: AtomicU64::new(0),
        }
    }

    pub fn wrap_read<T>(&self, ino: NodeId, op: impl FnOnce() -> T) -> T {
        log::trace!("Delaying read of inode {} for {} ms", ino, self.read_delay);
        self.wait(self.read_delay);
        op()
    }

    pub fn wrap_write<T>(&self, ino: NodeId, op: impl FnOnce() -> T) -> T {
        info!("Delaying write for {} ms (inode {})", self.write_delay, ino);
        self.wait(self.write_delay);
        op()
    }

    /// Milliseconds of delay applied by this gate so far.
    pub fn delayed_ms(&self) -> u64 {
        self.delayed_ms.load(Ordering::Relaxed)
    }

    fn wait(&self, ms: u32) {
        if ms == 0 {
            return;
        }
        self.delay.delay_ms(ms);
        self.delayed_ms.fetch_add(ms as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(read_delay: u32, write_delay: u32) -> MountOpts {
        MountOpts {
            read_delay,
            write_delay,
            ..MountOpts::default()
        }
    }

    #[test]
    fn delay_runs_before_op() {
        let rec = Arc::new(RecordingDelay::new());
        let gate = LatencyGate::new(&opts(50, 20), rec.clone());

        let seen = gate.wrap_read(7, || rec.total_ms());
        assert_eq!(seen, 50);
        let seen = gate.wrap_write(7, || rec.total_ms());
        assert_eq!(seen, 70);
        assert_eq!(rec.calls(), 2);
        assert_eq!(gate.delayed_ms(), 70);
    }

    #[test]
    fn zero_delay_skips_provider() {
        let rec = Arc::new(RecordingDelay::new());
        let gate = LatencyGate::new(&opts(0, 0), rec.clone());
        assert_eq!(gate.wrap_read(1, || 3), 3);
        gate.wrap_write(1, || ());
        assert_eq!(rec.calls(), 0);
    }

    #[cfg(feature = "std")]
    #[test]
    fn thread_sleep_blocks() {
        let gate = LatencyGate::new(&opts(30, 0), Arc::new(ThreadSleep));
        let start = std::time::Instant::now();
        gate.wrap_read(1, || ());
        assert!(start.elapsed() >= std::time::Duration::from_millis(30));
    }
}
