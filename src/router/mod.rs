// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Router daemon core (spec §2, §3.2, §3.3, §4.1, §5, §9): connection
//! state machine, callsign multimap, message queue, blocklist polling,
//! and the forwarding algorithm. Transport-agnostic by design -- see
//! [`sink::OutboundSink`] -- so the daemon binary is the only place that
//! wires this up to real TLS sockets.

pub mod blocklist;
pub mod connection;
pub mod core;
pub mod queue;
pub mod sink;

pub use blocklist::{AllowAll, Blocklist, FileBlocklist};
pub use connection::{ConnError, ConnId, ConnState, Connection, MAX_BUF_SZ, MAX_BUF_SZ_NO_LOGON};
pub use core::{Router, Stats};
pub use queue::{Queue, QueuedMessage, DEFAULT_QUEUED_MSG_MAX_BYTES, DEFAULT_QUEUED_MSG_TIMEOUT_SECS};
pub use sink::{Handle, OutboundSink};

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::sink::test_support::RecordingSink;
    use super::*;
    use crate::catalog::codes;
    use crate::wire::{self, Direction, Message, Segment};

    fn addr() -> SocketAddr {
        "127.0.0.1:9".parse().expect("valid address")
    }

    fn logon(from: &str, to: Option<&str>) -> Message {
        Message::new_logon(from, to.map(str::to_string))
    }

    fn traffic(from: &str, to: &str, code: u16) -> Message {
        Message::new_traffic(Direction::Downlink, from, Some(to.to_string()), vec![Segment::bare(code)])
    }

    fn feed(router: &Router, id: ConnId, msg: &Message) {
        let bytes = wire::encode(msg).expect("encode");
        router.on_readable(id, &bytes);
    }

    #[test]
    fn fan_out_delivers_to_every_connection_sharing_a_callsign() {
        let router = Router::new(Arc::new(AllowAll));
        let a1_sink = Arc::new(RecordingSink::default());
        let a2_sink = Arc::new(RecordingSink::default());
        let b_sink = Arc::new(RecordingSink::default());
        let a1 = router.accept(addr(), a1_sink.clone());
        let a2 = router.accept(addr(), a2_sink.clone());
        let b = router.accept(addr(), b_sink.clone());

        feed(&router, a1, &logon("ATC1", None));
        feed(&router, a2, &logon("ATC1", None));
        feed(&router, b, &logon("B", Some("ATC1")));

        feed(&router, b, &traffic("B", "ATC1", codes::DM3_ROGER));

        assert_eq!(a1_sink.sent.lock().expect("lock poisoned").len(), 1);
        assert_eq!(a2_sink.sent.lock().expect("lock poisoned").len(), 1);
        assert!(b_sink.sent.lock().expect("lock poisoned").is_empty());
    }

    #[test]
    fn queue_then_drain_on_logon() {
        let router = Router::new(Arc::new(AllowAll));
        let b_sink = Arc::new(RecordingSink::default());
        let b = router.accept(addr(), b_sink.clone());
        feed(&router, b, &logon("B", Some("ATC1")));
        feed(&router, b, &traffic("B", "ATC1", codes::DM3_ROGER));

        let a1_sink = Arc::new(RecordingSink::default());
        let a1 = router.accept(addr(), a1_sink.clone());
        feed(&router, a1, &logon("ATC1", None));

        assert_eq!(a1_sink.sent.lock().expect("lock poisoned").len(), 1);
    }

    #[test]
    fn queue_entry_expires_after_ttl() {
        let router = Router::with_queue_limits(Arc::new(AllowAll), DEFAULT_QUEUED_MSG_MAX_BYTES, Duration::from_secs(60));
        let b_sink = Arc::new(RecordingSink::default());
        let b = router.accept(addr(), b_sink);
        feed(&router, b, &logon("B", Some("ATC1")));
        feed(&router, b, &traffic("B", "ATC1", codes::DM3_ROGER));

        router.tick(Instant::now() + Duration::from_secs(61));
        assert_eq!(router.stats().messages_dropped_ttl, 1);

        let a1_sink = Arc::new(RecordingSink::default());
        let a1 = router.accept(addr(), a1_sink.clone());
        feed(&router, a1, &logon("ATC1", None));
        assert!(a1_sink.sent.lock().expect("lock poisoned").is_empty());
    }

    #[test]
    fn oversize_pre_logon_input_closes_connection_without_routing() {
        let router = Router::new(Arc::new(AllowAll));
        let sink = Arc::new(RecordingSink::default());
        let id = router.accept(addr(), sink.clone());
        let oversize = vec![b'X'; MAX_BUF_SZ_NO_LOGON + 1];
        router.on_readable(id, &oversize);
        assert_eq!(router.stats().connections_closed, 1);
        assert!(sink.sent.lock().expect("lock poisoned").is_empty());
    }

    #[test]
    fn traffic_before_logon_replies_logon_required_and_closes() {
        let router = Router::new(Arc::new(AllowAll));
        let sink = Arc::new(RecordingSink::default());
        let id = router.accept(addr(), sink.clone());
        feed(&router, id, &traffic("B", "ATC1", codes::DM3_ROGER));
        assert_eq!(router.stats().connections_closed, 1);
        assert!(!router.is_logged_on(id));

        let sent = sink.sent.lock().expect("lock poisoned");
        assert_eq!(sent.len(), 1);
        let reply = String::from_utf8_lossy(&sent[0]);
        assert!(reply.contains("LOGON REQUIRED"), "reply was: {reply}");
    }

    #[test]
    fn oversize_callsign_is_rejected_and_closes_connection() {
        let router = Router::new(Arc::new(AllowAll));
        let sink = Arc::new(RecordingSink::default());
        let id = router.accept(addr(), sink.clone());
        let bad_logon = Message::new_logon("N".repeat(crate::wire::MAX_CALLSIGN_LEN + 1), None);
        feed(&router, id, &bad_logon);
        assert_eq!(router.stats().connections_closed, 1);
        assert!(!sink.sent.lock().expect("lock poisoned").is_empty());
    }

    #[test]
    fn missing_to_header_replies_with_error_and_keeps_connection_open() {
        let router = Router::new(Arc::new(AllowAll));
        let sink = Arc::new(RecordingSink::default());
        let id = router.accept(addr(), sink.clone());
        feed(&router, id, &logon("B", None));
        feed(&router, id, &Message::new_traffic(Direction::Downlink, "B", None, vec![Segment::bare(codes::DM3_ROGER)]));

        assert_eq!(router.stats().connections_closed, 0);
        let sent = sink.sent.lock().expect("lock poisoned");
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn queue_overflow_replies_too_many_queued_messages() {
        let router = Router::with_queue_limits(Arc::new(AllowAll), 1, Duration::from_secs(60));
        let sink = Arc::new(RecordingSink::default());
        let id = router.accept(addr(), sink.clone());
        feed(&router, id, &logon("B", Some("ATC1")));
        feed(&router, id, &traffic("B", "ATC1", codes::DM3_ROGER));

        assert_eq!(router.stats().messages_queued, 0);
        let sent = sink.sent.lock().expect("lock poisoned");
        assert_eq!(sent.len(), 1);
    }
}
