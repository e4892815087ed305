use alloc::sync::Arc;

use log::info;

use crate::{
    common::DisksimResult,
    hooks::SessionHooks,
    mount_opts::{MountOpts, UnknownOptionPolicy},
    superblock::Session,
};

pub const DISKSIMFS_NAME: &str = "disksimfs";

/// Filesystem type registered with the host. Every mount gets a fresh,
/// empty session built from the same hooks.
#[derive(Debug, Clone)]
pub struct DisksimFsType {
    hooks: SessionHooks,
    policy: UnknownOptionPolicy,
}

impl DisksimFsType {
    pub fn new(hooks: SessionHooks) -> Self {
        Self {
            hooks,
            policy: UnknownOptionPolicy::default(),
        }
    }

    /// Reject unknown mount keys instead of skipping them.
    pub fn with_unknown_option_policy(mut self, policy: UnknownOptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn fs_name(&self) -> &'static str {
        DISKSIMFS_NAME
    }

    /// Parse `options` and build a session. On a config error nothing is
    /// created.
    pub fn mount(&self, options: &str) -> DisksimResult<Arc<Session>> {
        let opts = MountOpts::parse_with(options, self.policy)?;
        info!("Mounting {} ({})", DISKSIMFS_NAME, opts);
        Ok(Session::with_hooks(opts, self.hooks.clone()))
    }

    pub fn kill_sb(&self, sb: &Session) {
        info!("Unmounting {}", DISKSIMFS_NAME);
        sb.destroy();
    }
}

#[cfg(feature = "std")]
impl Default for DisksimFsType {
    fn default() -> Self {
        Self::new(SessionHooks::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{common::DisksimError, hooks::FixedClock, latency::NoDelay};

    fn fs_type() -> DisksimFsType {
        DisksimFsType::new(SessionHooks::new(Arc::new(FixedClock::new(0)), Arc::new(NoDelay)))
    }

    #[test]
    fn mount_and_kill() {
        let fs = fs_type();
        assert_eq!(fs.fs_name(), "disksimfs");
        let sb = fs.mount("mode=750,read_delay=4").unwrap();
        assert_eq!(sb.opts().read_delay, 4);
        assert_eq!(sb.root().unwrap().attr().mode.perm(), 0o750);
        fs.kill_sb(&sb);
        assert_eq!(sb.root().unwrap_err(), DisksimError::Unmounted);
    }

    #[test]
    fn bad_options_fail_mount() {
        let fs = fs_type();
        assert!(matches!(fs.mount("read_delay=-1"), Err(DisksimError::Config(_))));
        assert!(fs.mount("size=1m").is_ok());
        let strict = fs.with_unknown_option_policy(UnknownOptionPolicy::Reject);
        assert!(matches!(strict.mount("size=1m"), Err(DisksimError::Config(_))));
    }

    #[test]
    fn mounts_are_independent() {
        let fs = fs_type();
        let a = fs.mount("").unwrap();
        let b = fs.mount("").unwrap();
        let root = a.root().unwrap();
        a.create(&root, "only-in-a", 0o644, crate::common::Owner::ROOT).unwrap();
        assert_eq!(b.lookup(&b.root().unwrap(), "only-in-a").unwrap_err(), DisksimError::NotFound);
    }
}
