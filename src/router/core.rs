// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The router core (spec §4.1): connection registry, callsign multimap,
//! message queue, and the forwarding algorithm. Transport-agnostic --
//! see [`super::sink::OutboundSink`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::catalog::codes::{DM62_ERROR, UM159_ERROR};
use crate::wire::{self, Direction, Message, Segment};

use super::blocklist::Blocklist;
use super::connection::{ConnId, ConnState, Connection};
use super::queue::{Queue, QueuedMessage, DEFAULT_QUEUED_MSG_MAX_BYTES, DEFAULT_QUEUED_MSG_TIMEOUT_SECS};
use super::sink::OutboundSink;

/// Point-in-time counters, snapshotted from [`Router::stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub messages_routed: u64,
    pub messages_queued: u64,
    pub messages_dropped_ttl: u64,
}

#[derive(Default)]
struct Counters {
    connections_accepted: AtomicU64,
    connections_closed: AtomicU64,
    messages_routed: AtomicU64,
    messages_queued: AtomicU64,
    messages_dropped_ttl: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> Stats {
        Stats {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            messages_dropped_ttl: self.messages_dropped_ttl.load(Ordering::Relaxed),
        }
    }
}

/// Builds the CPDLC error reply for a policy-violation offense (spec §4.1
/// "Error reporting", §7): direction is the opposite of the offender's,
/// the segment code is UM159 when the offender was a downlink (or the
/// offender is otherwise unknown) and DM62 when it was an uplink, and the
/// reply's own MIN mirrors the offender's MIN.
fn synth_error(offender: &Message, description: &str) -> Message {
    let code = if offender.direction == Direction::Uplink { DM62_ERROR } else { UM159_ERROR };
    let mut err = Message::new_traffic(
        offender.direction.opposite(),
        offender.to.clone().unwrap_or_default(),
        Some(offender.from.clone()),
        vec![Segment::new(code, vec![description.to_string()])],
    );
    err.min = offender.min;
    err
}

/// The router core. Holds every live [`Connection`], the callsign
/// multimap, and the queue of messages waiting for an offline recipient.
pub struct Router {
    conns: Mutex<HashMap<ConnId, Connection>>,
    by_callsign: DashMap<String, Vec<ConnId>>,
    queue: Mutex<Queue>,
    blocklist: Arc<dyn Blocklist>,
    counters: Counters,
    next_conn_id: AtomicU64,
}

impl Router {
    pub fn new(blocklist: Arc<dyn Blocklist>) -> Self {
        Self::with_queue_limits(
            blocklist,
            DEFAULT_QUEUED_MSG_MAX_BYTES,
            Duration::from_secs(DEFAULT_QUEUED_MSG_TIMEOUT_SECS),
        )
    }

    pub fn with_queue_limits(blocklist: Arc<dyn Blocklist>, max_bytes: usize, timeout: Duration) -> Self {
        Self {
            conns: Mutex::new(HashMap::new()),
            by_callsign: DashMap::new(),
            queue: Mutex::new(Queue::new(max_bytes, timeout)),
            blocklist,
            counters: Counters::default(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn stats(&self) -> Stats {
        self.counters.snapshot()
    }

    /// Registers a freshly TLS-accepted connection and returns its id.
    pub fn accept(&self, peer_addr: SocketAddr, sink: Arc<dyn OutboundSink>) -> ConnId {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.conns.lock().expect("lock poisoned").insert(id, Connection::new(id, peer_addr, sink));
        self.counters.connections_accepted.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Feeds freshly-read bytes for connection `id`, decodes every complete
    /// frame, and processes each one. Closes the connection on a fatal
    /// protocol error (malformed frame or cap overflow).
    pub fn on_readable(&self, id: ConnId, data: &[u8]) {
        let messages = {
            let mut conns = self.conns.lock().expect("lock poisoned");
            let Some(conn) = conns.get_mut(&id) else { return };
            match conn.feed(data) {
                Ok(msgs) => msgs,
                Err(e) => {
                    warn!("connection {id} closed on protocol error: {e}");
                    self.close_locked(&mut conns, id);
                    return;
                },
            }
        };
        for msg in messages {
            if let Err(e) = msg.validate() {
                let mut conns = self.conns.lock().expect("lock poisoned");
                warn!("connection {id} closed on invalid message: {e}");
                self.reply_error(&conns, id, &msg, &e.to_string());
                self.close_locked(&mut conns, id);
                continue;
            }
            self.handle_message(id, msg);
        }
    }

    fn handle_message(&self, id: ConnId, msg: Message) {
        let mut conns = self.conns.lock().expect("lock poisoned");
        let Some(state) = conns.get(&id).map(|c| c.state) else { return };

        if state != ConnState::LoggedOn {
            if !msg.is_logon {
                debug!("connection {id} sent traffic before logon, closing");
                self.reply_error(&conns, id, &msg, "LOGON REQUIRED");
                self.close_locked(&mut conns, id);
                return;
            }
            if msg.from.is_empty() {
                self.reply_error(&conns, id, &msg, "LOGON REQUIRES FROM= HEADER");
                return;
            }
            self.bind_logon(&mut conns, id, &msg);
            return;
        }

        if msg.is_logon {
            if msg.from.is_empty() {
                self.reply_error(&conns, id, &msg, "LOGON REQUIRES FROM= HEADER");
                return;
            }
            // Spec §9 "Open question: logon replay": re-binding on an
            // already-logged-on connection is preserved verbatim, with no
            // acknowledgement sent to the peer.
            if let Some(prev_from) = conns.get(&id).map(|c| c.from.clone()) {
                self.unbind_callsign(&prev_from, id);
            }
            self.bind_logon(&mut conns, id, &msg);
            return;
        }

        self.forward(&mut conns, id, msg);
    }

    fn bind_logon(&self, conns: &mut HashMap<ConnId, Connection>, id: ConnId, msg: &Message) {
        if let Some(conn) = conns.get_mut(&id) {
            conn.from = msg.from.clone();
            conn.to = msg.to.clone();
            conn.state = ConnState::LoggedOn;
        }
        self.by_callsign.entry(msg.from.clone()).or_default().push(id);
        info!("connection {id} logged on as {}", msg.from);
        self.drain_queue_for_locked(conns, &msg.from);
    }

    fn unbind_callsign(&self, callsign: &str, id: ConnId) {
        if callsign.is_empty() {
            return;
        }
        if let Some(mut entry) = self.by_callsign.get_mut(callsign) {
            entry.retain(|&cid| cid != id);
        }
    }

    fn reply_error(&self, conns: &HashMap<ConnId, Connection>, id: ConnId, offender: &Message, description: &str) {
        let err = synth_error(offender, description);
        if let (Ok(bytes), Some(conn)) = (wire::encode(&err), conns.get(&id)) {
            conn.send(Bytes::from(bytes));
        }
    }

    fn forward(&self, conns: &mut HashMap<ConnId, Connection>, id: ConnId, mut msg: Message) {
        let Some(conn) = conns.get(&id) else { return };
        let to = msg.to.clone().or_else(|| conn.to.clone());
        let Some(to) = to else {
            self.reply_error(conns, id, &msg, "MESSAGE MISSING TO= HEADER");
            return;
        };
        msg.from = conn.from.clone();
        msg.to = Some(to.clone());

        let Ok(bytes) = wire::encode(&msg) else { return };
        let bytes = Bytes::from(bytes);

        let live_targets = self.live_connections_for(conns, &to);
        if !live_targets.is_empty() {
            for target in &live_targets {
                if let Some(c) = conns.get(target) {
                    c.send(bytes.clone());
                }
            }
            self.counters.messages_routed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let queued = QueuedMessage { bytes, from: msg.from.clone(), to, created_at: Instant::now() };
        let accepted = self.queue.lock().expect("lock poisoned").push(queued);
        if accepted {
            self.counters.messages_queued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reply_error(conns, id, &msg, "TOO MANY QUEUED MESSAGES");
        }
    }

    fn live_connections_for(&self, conns: &HashMap<ConnId, Connection>, callsign: &str) -> Vec<ConnId> {
        let Some(ids) = self.by_callsign.get(callsign).map(|v| v.clone()) else {
            return Vec::new();
        };
        ids.into_iter().filter(|cid| conns.get(cid).is_some_and(|c| c.state == ConnState::LoggedOn)).collect()
    }

    /// Performs the queue-drain and TTL-sweep and blocklist-closure
    /// portions of one event-loop iteration (spec §4.1 steps 5-6). `now`
    /// is the monotonic instant the TTL sweep is evaluated against.
    pub fn tick(&self, now: Instant) {
        let callsigns: Vec<String> = self.by_callsign.iter().map(|e| e.key().clone()).collect();
        for callsign in callsigns {
            self.drain_queue_for(&callsign);
        }

        let dropped = self.queue.lock().expect("lock poisoned").sweep_expired(now);
        if dropped > 0 {
            self.counters.messages_dropped_ttl.fetch_add(dropped as u64, Ordering::Relaxed);
        }

        if self.blocklist.refresh() {
            self.close_blocked_connections();
        }
    }

    fn drain_queue_for(&self, to: &str) {
        let mut conns = self.conns.lock().expect("lock poisoned");
        self.drain_queue_for_locked(&mut conns, to);
    }

    fn drain_queue_for_locked(&self, conns: &mut HashMap<ConnId, Connection>, to: &str) {
        let live_targets = self.live_connections_for(conns, to);
        if live_targets.is_empty() {
            return;
        }
        let drained = self.queue.lock().expect("lock poisoned").drain_for(to);
        for msg in drained {
            for target in &live_targets {
                if let Some(c) = conns.get(target) {
                    c.send(msg.bytes.clone());
                }
            }
            self.counters.messages_routed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn close_blocked_connections(&self) {
        let mut conns = self.conns.lock().expect("lock poisoned");
        let to_close: Vec<ConnId> = conns
            .iter()
            .filter(|(_, c)| !self.blocklist.check(c.peer_addr.ip()))
            .map(|(&id, _)| id)
            .collect();
        for id in to_close {
            self.close_locked(&mut conns, id);
        }
    }

    fn close_locked(&self, conns: &mut HashMap<ConnId, Connection>, id: ConnId) {
        if let Some(mut conn) = conns.remove(&id) {
            if !conn.from.is_empty() {
                self.unbind_callsign(&conn.from, id);
            }
            conn.close();
            self.counters.connections_closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Closes connection `id` administratively.
    pub fn close(&self, id: ConnId) {
        let mut conns = self.conns.lock().expect("lock poisoned");
        self.close_locked(&mut conns, id);
    }

    pub fn is_logged_on(&self, id: ConnId) -> bool {
        self.conns.lock().expect("lock poisoned").get(&id).is_some_and(|c| c.state == ConnState::LoggedOn)
    }

    pub fn connection_count(&self) -> usize {
        self.conns.lock().expect("lock poisoned").len()
    }
}
