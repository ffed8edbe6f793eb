// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Static message-type metadata table (spec §3.1, §6.4). The full
//! enumeration of CPDLC message types and their human-readable formatting
//! is an external collaborator (spec §1); this module carries only the
//! `(is_downlink, response_class, timeout_seconds)` triple the router and
//! thread engine need, indexed by integer code, plus the named codes the
//! status-recomputation rule (spec §4.2) references directly.
//!
//! Downlink and uplink codes share one namespace: a downlink `DMn` is
//! encoded as the code `n`, an uplink `UMn` as `10_000 + n`, so `dm(6)` and
//! `um(6)` never collide. [`is_downlink_request`] implements the DM6-27 /
//! DM49-54 / DM70-71 range predicate used by the downlink-request branch
//! of the status rule.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// How a message type expects to be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseClass {
    /// No reply expected.
    None,
    /// WILCO / UNABLE.
    Wu,
    /// AFFIRM / NEGATIVE.
    An,
    /// No reply strictly required, but an acknowledgement is expected.
    Ne,
}

impl ResponseClass {
    /// True for the {WU, AN, NE} set spec §4.2 calls "reply-required".
    pub fn is_reply_required(self) -> bool {
        !matches!(self, ResponseClass::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageTypeInfo {
    pub is_downlink: bool,
    pub response_class: ResponseClass,
    pub timeout_seconds: u32,
}

/// Builds a downlink code `DMn`.
pub const fn dm(n: u16) -> u16 {
    n
}

/// Builds an uplink code `UMn`.
pub const fn um(n: u16) -> u16 {
    10_000 + n
}

pub mod codes {
    use super::{dm, um};

    pub const DM0_WILCO: u16 = dm(0);
    pub const DM1_UNABLE: u16 = dm(1);
    pub const DM2_STANDBY: u16 = dm(2);
    pub const DM3_ROGER: u16 = dm(3);
    pub const DM4_AFFIRM: u16 = dm(4);
    pub const DM5_NEGATIVE: u16 = dm(5);
    pub const DM62_ERROR: u16 = dm(62);
    pub const DM70_REQUEST_HEADING: u16 = dm(70);
    pub const DM71_REQUEST_GROUND_TRACK: u16 = dm(71);

    pub const UM0_UNABLE: u16 = um(0);
    pub const UM1_STANDBY: u16 = um(1);
    pub const UM3_ROGER: u16 = um(3);
    pub const UM4_AFFIRM: u16 = um(4);
    pub const UM5_NEGATIVE: u16 = um(5);
    pub const UM159_ERROR: u16 = um(159);
    pub const UM160_NEXT_DATA_AUTHORITY: u16 = um(160);
    pub const UM161_END_SVC: u16 = um(161);
    pub const UM168_DISREGARD: u16 = um(168);
}

/// True when `code` is a downlink *request* per spec §4.2: the DM6-27 range,
/// the DM49-54 range, or DM70/DM71 (request-heading / request-ground-track).
pub fn is_downlink_request(code: u16) -> bool {
    matches!(code, 6..=27 | 49..=54 | 70 | 71)
}

fn table() -> HashMap<u16, MessageTypeInfo> {
    use codes::*;
    use ResponseClass::*;

    let mut t = HashMap::new();

    let mut insert = |code, is_downlink, response_class, timeout_seconds| {
        t.insert(code, MessageTypeInfo { is_downlink, response_class, timeout_seconds });
    };

    // Downlink terminal/ack types.
    insert(DM0_WILCO, true, None, 0);
    insert(DM1_UNABLE, true, None, 0);
    insert(DM2_STANDBY, true, None, 0);
    insert(DM3_ROGER, true, None, 0);
    insert(DM4_AFFIRM, true, None, 0);
    insert(DM5_NEGATIVE, true, None, 0);
    insert(DM62_ERROR, true, None, 0);

    // Downlink requests (DM6-27), reply-required (expect WILCO/UNABLE).
    for n in 6..=27u16 {
        insert(dm(n), true, Wu, 0);
    }
    // Downlink requests (DM49-54).
    for n in 49..=54u16 {
        insert(dm(n), true, Wu, 0);
    }
    insert(DM70_REQUEST_HEADING, true, Wu, 0);
    insert(DM71_REQUEST_GROUND_TRACK, true, Wu, 0);

    // Uplink terminal/ack types.
    insert(UM0_UNABLE, false, None, 0);
    insert(UM1_STANDBY, false, None, 0);
    insert(UM3_ROGER, false, None, 0);
    insert(UM4_AFFIRM, false, None, 0);
    insert(UM5_NEGATIVE, false, None, 0);
    insert(UM159_ERROR, false, None, 0);
    insert(UM160_NEXT_DATA_AUTHORITY, false, None, 0);
    insert(UM161_END_SVC, false, None, 0);
    insert(UM168_DISREGARD, false, None, 0);

    // A representative sample of reply-required uplink instructions,
    // spanning all three reply-required response classes, with nonzero
    // timeouts so the reply-timeout rule (spec §4.2, §8 scenario 6) has
    // something to exercise.
    insert(um(20), false, Wu, 100); // CLIMB TO AND MAINTAIN [altitude]
    insert(um(23), false, Wu, 100); // DESCEND TO AND MAINTAIN [altitude]
    insert(um(74), false, An, 100); // CONFIRM ASSIGNED ALTITUDE
    insert(um(78), false, An, 100); // CONFIRM SPEED
    insert(um(169), false, Ne, 60); // REQUEST FORWARDED

    t
}

static TABLE: Lazy<HashMap<u16, MessageTypeInfo>> = Lazy::new(table);

/// Looks up `code`'s catalog entry, if it names a known message type.
pub fn lookup(code: u16) -> Option<MessageTypeInfo> {
    TABLE.get(&code).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_named_codes_resolve() {
        assert_eq!(
            lookup(codes::UM159_ERROR),
            Some(MessageTypeInfo {
                is_downlink: false,
                response_class: ResponseClass::None,
                timeout_seconds: 0
            })
        );
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(lookup(65535), None);
    }

    #[test]
    fn downlink_request_ranges() {
        assert!(is_downlink_request(dm(6)));
        assert!(is_downlink_request(dm(27)));
        assert!(is_downlink_request(dm(49)));
        assert!(is_downlink_request(dm(54)));
        assert!(is_downlink_request(70));
        assert!(is_downlink_request(71));
        assert!(!is_downlink_request(dm(5)));
        assert!(!is_downlink_request(dm(28)));
        assert!(!is_downlink_request(72));
    }

    #[test]
    fn dm_and_um_namespaces_never_collide() {
        for n in 0..200u16 {
            assert_ne!(dm(n), um(n));
        }
    }

    #[test]
    fn reply_required_predicate() {
        assert!(!ResponseClass::None.is_reply_required());
        assert!(ResponseClass::Wu.is_reply_required());
        assert!(ResponseClass::An.is_reply_required());
        assert!(ResponseClass::Ne.is_reply_required());
    }
}
