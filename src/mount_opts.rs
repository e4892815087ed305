//! Mount option parsing and `/proc/mounts` style display.
//!
//! Options are comma separated `key=value` pairs:
//!
//! - `mode=<octal>`: permission bits of the root directory (default `0755`)
//! - `read_delay=<ms>`: delay injected before every read (default `0`)
//! - `write_delay=<ms>`: delay injected before every write (default `0`)

use alloc::{format, string::String, vec::Vec};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::common::{DisksimError, DisksimPermission, DisksimResult};

pub const DISKSIMFS_DEFAULT_MODE: u32 = 0o755;
pub const DISKSIMFS_DEFAULT_READ_DELAY: u32 = 0;
pub const DISKSIMFS_DEFAULT_WRITE_DELAY: u32 = 0;

/// What to do with a key the parser does not recognize.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum UnknownOptionPolicy {
    /// Skip it with a warning.
    #[default]
    Ignore,
    /// Fail the whole parse.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOpts {
    /// Root directory permission bits, already masked.
    pub mode: u32,
    /// Milliseconds every read waits before touching content.
    pub read_delay: u32,
    /// Milliseconds every write waits before touching content.
    pub write_delay: u32,
}

impl Default for MountOpts {
    fn default() -> Self {
        Self {
            mode: DISKSIMFS_DEFAULT_MODE,
            read_delay: DISKSIMFS_DEFAULT_READ_DELAY,
            write_delay: DISKSIMFS_DEFAULT_WRITE_DELAY,
        }
    }
}

enum Token {
    Mode,
    ReadDelay,
    WriteDelay,
}

impl Token {
    fn match_key(key: &str) -> Option<Self> {
        match key {
            "mode" => Some(Token::Mode),
            "read_delay" => Some(Token::ReadDelay),
            "write_delay" => Some(Token::WriteDelay),
            _ => None,
        }
    }
}

impl MountOpts {
    /// Parse an option string, ignoring unknown keys.
    pub fn parse(data: &str) -> DisksimResult<Self> {
        Self::parse_with(data, UnknownOptionPolicy::Ignore)
    }

    pub fn parse_with(data: &str, policy: UnknownOptionPolicy) -> DisksimResult<Self> {
        let mut opts = MountOpts::default();

        for p in data.split(',') {
            if p.is_empty() {
                continue;
            }
            let (key, value) = match p.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (p, None),
            };
            let token = match Token::match_key(key) {
                Some(token) => token,
                None => {
                    if policy == UnknownOptionPolicy::Reject {
                        return Err(DisksimError::Config(format!("unknown option `{}`", p)));
                    }
                    warn!("disksimfs: ignoring unknown mount option `{}`", p);
                    continue;
                }
            };
            let value = value.ok_or_else(|| DisksimError::Config(format!("`{}` needs a value", key)))?;
            match token {
                Token::Mode => {
                    let mode = match_octal(value)
                        .ok_or_else(|| DisksimError::Config(format!("bad mode `{}`", value)))?;
                    opts.mode = DisksimPermission::from_mode_masked(mode).bits();
                }
                Token::ReadDelay => opts.read_delay = match_delay(key, value)?,
                Token::WriteDelay => opts.write_delay = match_delay(key, value)?,
            }
        }
        Ok(opts)
    }

    /// Only the options that differ from their defaults, canonical order.
    pub fn show_options(&self) -> String {
        let mut parts = Vec::new();
        if self.mode != DISKSIMFS_DEFAULT_MODE {
            parts.push(format!("mode={:o}", self.mode));
        }
        if self.read_delay != DISKSIMFS_DEFAULT_READ_DELAY {
            parts.push(format!("read_delay={}", self.read_delay));
        }
        if self.write_delay != DISKSIMFS_DEFAULT_WRITE_DELAY {
            parts.push(format!("write_delay={}", self.write_delay));
        }
        parts.join(",")
    }
}

fn match_octal(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return None;
    }
    u32::from_str_radix(s, 8).ok()
}

fn match_delay(key: &str, s: &str) -> DisksimResult<u32> {
    // Delays are stored like a C int: non-negative and at most i32::MAX.
    let bad = || DisksimError::Config(format!("bad {} `{}`", key, s));
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let ms: u32 = s.parse().map_err(|_| bad())?;
    if ms > i32::MAX as u32 {
        return Err(bad());
    }
    Ok(ms)
}

impl core::fmt::Display for MountOpts {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.show_options())
    }
}

impl core::str::FromStr for MountOpts {
    type Err = DisksimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl MountOpts {
    /// Serialize the effective configuration, defaults included.
    pub fn to_json(&self) -> DisksimResult<String> {
        crate::common::to_json(self)
    }
}
