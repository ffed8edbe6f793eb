// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The status-recomputation rule (spec §4.2): a pure, lock-free function
//! of a thread's current bucket chain plus two external facts (whether the
//! connection is logged on, and the transport's view of a send token).
//!
//! Kept as a plain function rather than a `StateMachine`/`Transition` trait
//! pair: the rule is an ordered cascade of conditions on one thread, not a
//! dispatch table keyed by message type, so a trait object per state would
//! only add indirection.
//!
//! The one rule that needs to *do* something instead of just reporting a new
//! status -- "synthesize a DM62 ERROR and send it" on reply timeout -- is
//! reported back as [`StatusOutcome::SynthesizeTimeoutError`] rather than
//! performed here, since this function runs with the engine's thread list
//! locked and sending re-enters the engine.

use crate::catalog;
use crate::wire::{Direction, Message};

use super::thread::{Bucket, Thread, ThreadStatus};
use super::transport::{ClientTransport, LogonStatus, SendStatus};

/// What the caller should do after a recomputation pass.
pub enum StatusOutcome {
    /// Nothing changed.
    Unchanged,
    /// Move the thread to this status.
    Set(ThreadStatus),
    /// The thread's last bucket is an uplink message whose reply timeout
    /// has elapsed. The caller must send a DM62 ERROR "TIMEDOUT" addressed
    /// to `peer` (MRN auto-assigned to the offending message's MIN by the
    /// normal send path) via the engine's own `send`, *outside* the thread
    /// list lock, and then force the thread to `final_status`.
    SynthesizeTimeoutError { peer: String, final_status: ThreadStatus },
}

fn msg_has_any(msg: &Message, codes: &[u16]) -> bool {
    msg.segments.iter().any(|s| codes.contains(&s.code))
}

fn msg_expects_reply(msg: &Message) -> bool {
    msg.segments
        .iter()
        .any(|s| catalog::lookup(s.code).is_some_and(|info| info.response_class.is_reply_required()))
}

fn msg_is_downlink_request(msg: &Message) -> bool {
    msg.direction == Direction::Downlink
        && msg.segments.iter().any(|s| catalog::is_downlink_request(s.code))
}

fn msg_is_uplink_reply_required(msg: &Message) -> bool {
    msg.direction == Direction::Uplink && msg_expects_reply(msg)
}

/// `timeout := min over all segments in all buckets of segment.timeout_seconds,
/// ignoring 0` (spec §4.2).
fn thread_min_timeout(thread: &Thread) -> u32 {
    thread
        .buckets
        .iter()
        .flat_map(|b| b.msg.segments.iter())
        .filter_map(|s| catalog::lookup(s.code))
        .map(|info| info.timeout_seconds)
        .filter(|secs| *secs != 0)
        .min()
        .unwrap_or(0)
}

use catalog::codes::{
    DM0_WILCO, DM1_UNABLE, DM2_STANDBY, DM3_ROGER, DM4_AFFIRM, DM5_NEGATIVE, DM62_ERROR,
    UM0_UNABLE, UM1_STANDBY, UM159_ERROR, UM160_NEXT_DATA_AUTHORITY, UM161_END_SVC, UM168_DISREGARD,
    UM3_ROGER, UM4_AFFIRM, UM5_NEGATIVE,
};

const STANDBY_CODES: &[u16] = &[DM2_STANDBY, UM1_STANDBY];
const ACCEPT_CODES: &[u16] = &[DM0_WILCO, DM4_AFFIRM, UM4_AFFIRM];
const REJECT_CODES: &[u16] = &[DM1_UNABLE, DM5_NEGATIVE, DM62_ERROR, UM0_UNABLE, UM5_NEGATIVE, UM159_ERROR];
const ROGER_OR_LINKMGMT_CODES: &[u16] = &[DM3_ROGER, UM3_ROGER, UM160_NEXT_DATA_AUTHORITY, UM161_END_SVC];
const DISREGARD_CODES: &[u16] = &[UM168_DISREGARD];
const ERROR_CODES: &[u16] = &[DM62_ERROR, UM159_ERROR];

/// Runs the status rule for one thread against its current last bucket
/// `l` and head bucket `h`. Returns `Unchanged` for threads with no
/// buckets, already-final threads, and when none of the rule's branches
/// fire.
pub fn recompute(
    thread: &Thread,
    transport: &dyn ClientTransport,
    now_secs: u64,
    logon: LogonStatus,
) -> StatusOutcome {
    if thread.status.is_final() {
        return StatusOutcome::Unchanged;
    }
    let Some(l) = thread.buckets.last() else {
        return StatusOutcome::Unchanged;
    };
    let h: &Bucket = &thread.buckets[0];

    let only_bucket = thread.buckets.len() == 1;

    if only_bucket && l.sent && !msg_expects_reply(&l.msg) {
        return set_if_changed(thread.status, ThreadStatus::Closed);
    }

    if l.sent && msg_is_downlink_request(&l.msg) {
        let status = match l.token.map(|tok| transport.status(tok)) {
            Some(SendStatus::Sending) => ThreadStatus::Pending,
            Some(SendStatus::SendFailed) => ThreadStatus::Failed,
            Some(SendStatus::Sent) | None => ThreadStatus::Open,
        };
        return set_if_changed(thread.status, status);
    }

    if msg_has_any(&l.msg, STANDBY_CODES) {
        return set_if_changed(thread.status, ThreadStatus::Standby);
    }
    if msg_has_any(&l.msg, ACCEPT_CODES) {
        return set_if_changed(thread.status, ThreadStatus::Accepted);
    }
    if msg_has_any(&l.msg, REJECT_CODES) {
        return set_if_changed(thread.status, ThreadStatus::Rejected);
    }
    if msg_has_any(&l.msg, ROGER_OR_LINKMGMT_CODES) {
        return set_if_changed(thread.status, ThreadStatus::Closed);
    }

    if !l.sent
        && msg_is_uplink_reply_required(&l.msg)
        && thread.status != ThreadStatus::Standby
    {
        let timeout = thread_min_timeout(thread);
        if timeout != 0 && now_secs.saturating_sub(l.timestamp_secs) > u64::from(timeout) {
            return StatusOutcome::SynthesizeTimeoutError {
                peer: l.msg.from.clone(),
                final_status: ThreadStatus::TimedOut,
            };
        }
    }

    if msg_has_any(&l.msg, DISREGARD_CODES) {
        return set_if_changed(thread.status, ThreadStatus::Disregard);
    }
    if msg_has_any(&l.msg, ERROR_CODES) {
        return set_if_changed(thread.status, ThreadStatus::Error);
    }

    if logon == LogonStatus::LoggedOff {
        return StatusOutcome::Set(ThreadStatus::ConnEnded);
    }

    let _ = h;
    StatusOutcome::Unchanged
}

fn set_if_changed(current: ThreadStatus, next: ThreadStatus) -> StatusOutcome {
    if current == next {
        StatusOutcome::Unchanged
    } else {
        StatusOutcome::Set(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_engine::thread::Bucket;
    use crate::wire::{Message, Segment};

    struct FakeTransport {
        status: SendStatus,
        logon: LogonStatus,
    }

    impl ClientTransport for FakeTransport {
        fn send(&self, _msg: &Message) -> super::super::transport::SendToken {
            0
        }
        fn status(&self, _token: super::super::transport::SendToken) -> SendStatus {
            self.status
        }
        fn logon_status(&self) -> LogonStatus {
            self.logon
        }
        fn set_recv_cb(&self, _cb: Box<dyn Fn(Message) + Send + Sync>) {}
    }

    fn bucket(msg: Message, sent: bool, timestamp_secs: u64, token: Option<u64>) -> Bucket {
        Bucket { msg, token, sent, timestamp_secs, hour: 0, minute: 0 }
    }

    #[test]
    fn solo_sent_message_with_no_reply_expected_closes() {
        let msg = Message::new_traffic(
            Direction::Downlink,
            "N1",
            Some("ATC"),
            vec![Segment::bare(DM3_ROGER)],
        );
        let mut t = Thread::new(1);
        t.buckets.push(bucket(msg, true, 0, Some(1)));
        let transport = FakeTransport { status: SendStatus::Sent, logon: LogonStatus::LoggedOn };
        assert!(matches!(
            recompute(&t, &transport, 0, LogonStatus::LoggedOn),
            StatusOutcome::Set(ThreadStatus::Closed)
        ));
    }

    #[test]
    fn sent_downlink_request_tracks_token_status() {
        let msg = Message::new_traffic(Direction::Downlink, "N1", Some("ATC"), vec![Segment::bare(6)]);
        let mut t = Thread::new(1);
        t.buckets.push(bucket(msg, true, 0, Some(1)));
        let transport = FakeTransport { status: SendStatus::Sending, logon: LogonStatus::LoggedOn };
        assert!(matches!(recompute(&t, &transport, 0, LogonStatus::LoggedOn), StatusOutcome::Set(ThreadStatus::Pending)));
    }

    #[test]
    fn reply_required_uplink_past_timeout_synthesizes_error() {
        let msg = Message::new_traffic(Direction::Uplink, "ATC", Some("N1"), vec![Segment::bare(catalog::um(20))]);
        let mut t = Thread::new(1);
        t.buckets.push(bucket(msg, false, 0, None));
        let transport = FakeTransport { status: SendStatus::Sent, logon: LogonStatus::LoggedOn };
        match recompute(&t, &transport, 101, LogonStatus::LoggedOn) {
            StatusOutcome::SynthesizeTimeoutError { peer, final_status } => {
                assert_eq!(peer, "ATC");
                assert_eq!(final_status, ThreadStatus::TimedOut);
            }
            _ => panic!("expected timeout synthesis"),
        }
    }

    #[test]
    fn timeout_is_the_minimum_over_every_bucket_not_just_the_last() {
        let earlier = Message::new_traffic(Direction::Uplink, "ATC", Some("N1"), vec![Segment::bare(catalog::um(169))]);
        let msg = Message::new_traffic(Direction::Uplink, "ATC", Some("N1"), vec![Segment::bare(catalog::um(20))]);
        let mut t = Thread::new(1);
        t.buckets.push(bucket(earlier, false, 0, None));
        t.buckets.push(bucket(msg, false, 0, None));
        let transport = FakeTransport { status: SendStatus::Sent, logon: LogonStatus::LoggedOn };
        // um(20)'s own timeout is 100s, so 70s elapsed would be "within timeout"
        // if only the last bucket's segments were considered. um(169)'s 60s
        // timeout earlier in the thread brings the overall minimum down to 60s.
        match recompute(&t, &transport, 70, LogonStatus::LoggedOn) {
            StatusOutcome::SynthesizeTimeoutError { peer, final_status } => {
                assert_eq!(peer, "ATC");
                assert_eq!(final_status, ThreadStatus::TimedOut);
            }
            _ => panic!("expected timeout synthesis"),
        }
    }

    #[test]
    fn reply_required_uplink_within_timeout_is_unchanged() {
        let msg = Message::new_traffic(Direction::Uplink, "ATC", Some("N1"), vec![Segment::bare(catalog::um(20))]);
        let mut t = Thread::new(1);
        t.buckets.push(bucket(msg, false, 0, None));
        let transport = FakeTransport { status: SendStatus::Sent, logon: LogonStatus::LoggedOn };
        assert!(matches!(recompute(&t, &transport, 50, LogonStatus::LoggedOn), StatusOutcome::Unchanged));
    }

    #[test]
    fn logoff_forces_conn_ended() {
        let msg = Message::new_traffic(Direction::Uplink, "ATC", Some("N1"), vec![Segment::bare(catalog::um(200))]);
        let mut t = Thread::new(1);
        t.buckets.push(bucket(msg, false, 0, None));
        let transport = FakeTransport { status: SendStatus::Sent, logon: LogonStatus::LoggedOff };
        assert!(matches!(recompute(&t, &transport, 0, LogonStatus::LoggedOff), StatusOutcome::Set(ThreadStatus::ConnEnded)));
    }

    #[test]
    fn final_status_is_never_recomputed() {
        let msg = Message::new_traffic(Direction::Downlink, "N1", Some("ATC"), vec![Segment::bare(DM1_UNABLE)]);
        let mut t = Thread::new(1);
        t.status = ThreadStatus::Rejected;
        t.buckets.push(bucket(msg, true, 0, Some(1)));
        let transport = FakeTransport { status: SendStatus::Sent, logon: LogonStatus::LoggedOff };
        assert!(matches!(recompute(&t, &transport, 0, LogonStatus::LoggedOff), StatusOutcome::Unchanged));
    }
}
