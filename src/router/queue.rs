// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The single FIFO of messages queued for currently-disconnected
//! recipients (spec §3.3). Byte-budgeted and TTL-swept.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;

pub const DEFAULT_QUEUED_MSG_MAX_BYTES: usize = 128 * 1024 * 1024;
pub const DEFAULT_QUEUED_MSG_TIMEOUT_SECS: u64 = 3600;

/// Accounting overhead charged against the byte budget for each entry's
/// `(from, to, created_at)` metadata, on top of the encoded frame itself
/// (spec §8 testable property 7: "byte accounting equals the sum of
/// encoded lengths plus per-entry overhead").
const ENTRY_OVERHEAD: usize = 64;

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub bytes: Bytes,
    pub from: String,
    pub to: String,
    pub created_at: Instant,
}

fn entry_cost(bytes: &Bytes) -> usize {
    bytes.len() + ENTRY_OVERHEAD
}

pub struct Queue {
    entries: VecDeque<QueuedMessage>,
    max_bytes: usize,
    timeout: Duration,
    used_bytes: usize,
}

impl Queue {
    pub fn new(max_bytes: usize, timeout: Duration) -> Self {
        Self { entries: VecDeque::new(), max_bytes, timeout, used_bytes: 0 }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Enqueues `msg`. Returns `false` without enqueuing if doing so would
    /// exceed the byte budget -- the caller is responsible for replying
    /// `TOO MANY QUEUED MESSAGES` to the sender in that case.
    pub fn push(&mut self, msg: QueuedMessage) -> bool {
        let cost = entry_cost(&msg.bytes);
        if self.used_bytes + cost > self.max_bytes {
            return false;
        }
        self.used_bytes += cost;
        self.entries.push_back(msg);
        true
    }

    /// Removes and returns every entry addressed to `to`, oldest first.
    pub fn drain_for(&mut self, to: &str) -> Vec<QueuedMessage> {
        let mut drained = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.entries.len());
        for msg in self.entries.drain(..) {
            if msg.to == to {
                self.used_bytes -= entry_cost(&msg.bytes);
                drained.push(msg);
            } else {
                remaining.push_back(msg);
            }
        }
        self.entries = remaining;
        drained
    }

    /// Drops every entry older than the configured TTL relative to `now`.
    /// Returns the number dropped.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let mut dropped = 0usize;
        let mut freed = 0usize;
        self.entries.retain(|msg| {
            if now.saturating_duration_since(msg.created_at) > timeout {
                dropped += 1;
                freed += entry_cost(&msg.bytes);
                false
            } else {
                true
            }
        });
        self.used_bytes -= freed;
        dropped
    }
}
