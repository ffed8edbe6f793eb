// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The blocklist oracle (spec §1, §6.4): an external collaborator treated
//! as a callable "is this address allowed?" check plus a periodic
//! "did the ruleset change?" probe. The router polls [`Blocklist::refresh`]
//! once per event-loop iteration and, only when it reports a change, closes
//! every connection whose peer no longer passes [`Blocklist::check`]
//! (spec §4.1 step 6, §9 "Open question: blocklist race" -- this race is
//! intentional and preserved, not a bug to fix).

use std::net::IpAddr;

pub trait Blocklist: Send + Sync {
    /// Whether `addr` is currently allowed to hold a connection.
    fn check(&self, addr: IpAddr) -> bool;

    /// Returns `true` iff the ruleset has changed since the last call.
    /// The very first call conventionally returns `false` (nothing to
    /// react to yet).
    fn refresh(&self) -> bool;
}

/// A no-op blocklist: every address is allowed, the ruleset never changes.
/// Used when no `blocklist` config key is set.
pub struct AllowAll;

impl Blocklist for AllowAll {
    fn check(&self, _addr: IpAddr) -> bool {
        true
    }

    fn refresh(&self) -> bool {
        false
    }
}

/// A file-backed blocklist (spec §6.2 `blocklist` key): one blocked IP
/// address per line, re-read whenever the file's mtime advances.
pub struct FileBlocklist {
    path: std::path::PathBuf,
    last_modified: std::sync::Mutex<Option<std::time::SystemTime>>,
    blocked: std::sync::RwLock<std::collections::HashSet<IpAddr>>,
}

impl FileBlocklist {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into(), last_modified: std::sync::Mutex::new(None), blocked: std::sync::RwLock::new(std::collections::HashSet::new()) }
    }

    fn reload(&self) {
        let Ok(text) = std::fs::read_to_string(&self.path) else { return };
        let parsed = text.lines().filter_map(|l| l.trim().parse::<IpAddr>().ok()).collect();
        *self.blocked.write().expect("lock poisoned") = parsed;
    }
}

impl Blocklist for FileBlocklist {
    fn check(&self, addr: IpAddr) -> bool {
        !self.blocked.read().expect("lock poisoned").contains(&addr)
    }

    fn refresh(&self) -> bool {
        let Ok(meta) = std::fs::metadata(&self.path) else { return false };
        let Ok(modified) = meta.modified() else { return false };
        let mut last = self.last_modified.lock().expect("lock poisoned");
        if *last == Some(modified) {
            return false;
        }
        let changed = last.is_some();
        *last = Some(modified);
        drop(last);
        self.reload();
        changed
    }
}
