// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `MsgList`, the client-side thread engine (spec §2, §4.2). Groups
//! messages into MRN-chained [`Thread`]s, assigns MIN/MRN, and keeps each
//! thread's [`ThreadStatus`] current as traffic is sent, received, and as
//! time passes.

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::catalog::codes::DM62_ERROR;
use crate::wire::{Direction, Message, Segment};

use super::status::{self, StatusOutcome};
use super::thread::{Bucket, Thread, ThreadId, ThreadStatus};
use super::transport::{ClientTransport, LogonStatus, SendToken};

/// Where a freshly-built message should be filed.
#[derive(Debug, Clone, Copy)]
pub enum ThreadTarget {
    New,
    Existing(ThreadId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no such thread: {0}")]
    ThreadNotFound(ThreadId),
}

/// One bucket's worth of data returned by [`MsgList::get_thr_msg`].
#[derive(Debug, Clone)]
pub struct BucketView {
    pub msg: Message,
    pub token: Option<SendToken>,
    pub sent: bool,
    pub hour: u8,
    pub minute: u8,
}

struct Inner {
    threads: Vec<Thread>,
    next_min: u32,
    next_thread_id: ThreadId,
}

fn find_mut(inner: &mut Inner, id: ThreadId) -> Option<&mut Thread> {
    inner.threads.iter_mut().find(|t| t.id == id)
}

/// The thread engine. Generic over the transport it rides on, so tests can
/// swap in an in-memory double (spec §6.4).
pub struct MsgList<T: ClientTransport> {
    transport: Arc<T>,
    inner: Mutex<Inner>,
    own_callsign: String,
    now_fn: Arc<dyn Fn() -> u64 + Send + Sync>,
    time_fn: Arc<dyn Fn() -> (u8, u8) + Send + Sync>,
    update_cb: Mutex<Option<Box<dyn Fn(Vec<ThreadId>) + Send + Sync>>>,
}

impl<T: ClientTransport> MsgList<T> {
    pub fn new(
        transport: Arc<T>,
        own_callsign: impl Into<String>,
        now_fn: Arc<dyn Fn() -> u64 + Send + Sync>,
        time_fn: Arc<dyn Fn() -> (u8, u8) + Send + Sync>,
    ) -> Self {
        Self {
            transport,
            inner: Mutex::new(Inner { threads: Vec::new(), next_min: 1, next_thread_id: 1 }),
            own_callsign: own_callsign.into(),
            now_fn,
            time_fn,
            update_cb: Mutex::new(None),
        }
    }

    /// Registers the callback invoked (outside any lock) after a thread's
    /// buckets change as a result of [`MsgList::on_receive`].
    pub fn set_update_cb(&self, cb: Box<dyn Fn(Vec<ThreadId>) + Send + Sync>) {
        *self.update_cb.lock().expect("lock poisoned") = Some(cb);
    }

    /// Assigns MIN (and, by walking the target thread tail-to-head for the
    /// latest opposite-direction bucket, MRN), hands the message to the
    /// transport, appends a sent bucket, and recomputes the thread's
    /// status. Returns the thread the message landed in.
    pub fn send(&self, mut msg: Message, target: ThreadTarget) -> Result<ThreadId, EngineError> {
        let thread_id = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            let idx = match target {
                ThreadTarget::New => {
                    let id = inner.next_thread_id;
                    inner.next_thread_id += 1;
                    inner.threads.push(Thread::new(id));
                    inner.threads.len() - 1
                }
                ThreadTarget::Existing(id) => inner
                    .threads
                    .iter()
                    .position(|t| t.id == id)
                    .ok_or(EngineError::ThreadNotFound(id))?,
            };

            if let Some(mrn) = inner.threads[idx]
                .buckets
                .iter()
                .rev()
                .find(|b| b.msg.direction == msg.direction.opposite())
                .map(|b| b.msg.min)
            {
                msg.mrn = Some(mrn);
            }
            msg.min = inner.next_min;
            inner.next_min += 1;

            let token = self.transport.send(&msg);
            let (hour, minute) = (self.time_fn)();
            inner.threads[idx].buckets.push(Bucket {
                msg,
                token: Some(token),
                sent: true,
                timestamp_secs: (self.now_fn)(),
                hour,
                minute,
            });
            inner.threads[idx].dirty = true;
            inner.threads[idx].id
        };
        self.recompute_and_apply(thread_id);
        Ok(thread_id)
    }

    /// Files an inbound message: correlates it against every non-CLOSED
    /// thread (newest thread first, newest bucket first within a thread)
    /// by MRN, falling back to a brand-new thread when no match is found
    /// (spec §4.2 "closed-thread forces new thread"). Returns the thread
    /// the message landed in, then recomputes status and invokes the
    /// update callback (outside the lock).
    pub fn on_receive(&self, msg: Message) -> ThreadId {
        let thread_id = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            let disregard = msg.segments.iter().any(|s| s.code == crate::catalog::codes::UM168_DISREGARD);
            let found = msg.mrn.and_then(|mrn| {
                inner
                    .threads
                    .iter()
                    .rev()
                    .filter(|t| t.status != ThreadStatus::Closed)
                    .find_map(|t| {
                        t.buckets
                            .iter()
                            .rev()
                            .find(|b| b.msg.min == mrn && (if disregard { !b.sent } else { b.sent }))
                            .map(|_| t.id)
                    })
            });
            let thread_id = match found {
                Some(id) => id,
                None => {
                    let id = inner.next_thread_id;
                    inner.next_thread_id += 1;
                    inner.threads.push(Thread::new(id));
                    id
                }
            };
            let (hour, minute) = (self.time_fn)();
            let now = (self.now_fn)();
            if let Some(t) = find_mut(&mut inner, thread_id) {
                t.buckets.push(Bucket { msg, token: None, sent: false, timestamp_secs: now, hour, minute });
                t.dirty = true;
            }
            thread_id
        };
        self.recompute_and_apply(thread_id);
        if let Some(cb) = self.update_cb.lock().expect("lock poisoned").as_ref() {
            cb(vec![thread_id]);
        }
        thread_id
    }

    /// Recomputes the status of every thread. Used to pick up reply
    /// timeouts that elapse with no further traffic on the thread.
    pub fn update(&self) {
        let ids: Vec<ThreadId> = {
            let inner = self.inner.lock().expect("lock poisoned");
            inner.threads.iter().map(|t| t.id).collect()
        };
        for id in ids {
            self.recompute_and_apply(id);
        }
    }

    fn recompute_and_apply(&self, thread_id: ThreadId) {
        let outcome = {
            let inner = self.inner.lock().expect("lock poisoned");
            let Some(t) = inner.threads.iter().find(|t| t.id == thread_id) else {
                return;
            };
            status::recompute(t, self.transport.as_ref(), (self.now_fn)(), self.transport.logon_status())
        };
        match outcome {
            StatusOutcome::Unchanged => {}
            StatusOutcome::Set(next) => {
                let mut inner = self.inner.lock().expect("lock poisoned");
                if let Some(t) = find_mut(&mut inner, thread_id) {
                    t.status = next;
                    t.dirty = next != ThreadStatus::ConnEnded;
                }
            }
            StatusOutcome::SynthesizeTimeoutError { peer, final_status } => {
                let synth = Message::new_traffic(
                    Direction::Downlink,
                    self.own_callsign.clone(),
                    Some(peer),
                    vec![Segment::new(DM62_ERROR, vec!["TIMEDOUT".to_string()])],
                );
                let _ = self.send(synth, ThreadTarget::Existing(thread_id));
                let mut inner = self.inner.lock().expect("lock poisoned");
                if let Some(t) = find_mut(&mut inner, thread_id) {
                    t.status = final_status;
                    t.dirty = true;
                }
            }
        }
    }

    /// Thread ids in creation order. When `ignore_closed` is set, omits
    /// threads that are both final and not dirty.
    pub fn get_thr_ids(&self, ignore_closed: bool) -> Vec<ThreadId> {
        let inner = self.inner.lock().expect("lock poisoned");
        inner
            .threads
            .iter()
            .filter(|t| !ignore_closed || !t.status.is_final() || t.dirty)
            .map(|t| t.id)
            .collect()
    }

    pub fn get_thr_status(&self, id: ThreadId) -> Option<(ThreadStatus, bool)> {
        let inner = self.inner.lock().expect("lock poisoned");
        inner.threads.iter().find(|t| t.id == id).map(|t| (t.status, t.dirty))
    }

    pub fn thr_mark_seen(&self, id: ThreadId) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if let Some(t) = find_mut(&mut inner, id) {
            t.dirty = false;
        }
    }

    pub fn get_thr_msg(&self, id: ThreadId, n: usize) -> Option<BucketView> {
        let inner = self.inner.lock().expect("lock poisoned");
        inner.threads.iter().find(|t| t.id == id).and_then(|t| t.buckets.get(n)).map(|b| BucketView {
            msg: b.msg.clone(),
            token: b.token,
            sent: b.sent,
            hour: b.hour,
            minute: b.minute,
        })
    }

    pub fn get_thr_msg_count(&self, id: ThreadId) -> usize {
        let inner = self.inner.lock().expect("lock poisoned");
        inner.threads.iter().find(|t| t.id == id).map_or(0, |t| t.buckets.len())
    }

    /// Forces a non-final thread to CLOSED.
    pub fn thr_close(&self, id: ThreadId) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if let Some(t) = find_mut(&mut inner, id)
            && !t.status.is_final()
        {
            t.status = ThreadStatus::Closed;
            t.dirty = true;
        }
    }

    /// Drops a thread entirely, regardless of status.
    pub fn remove_thr(&self, id: ThreadId) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.threads.retain(|t| t.id != id);
    }
}
