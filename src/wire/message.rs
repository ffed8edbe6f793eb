// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

use crate::catalog;

/// Maximum encoded length of a callsign, not counting any wire terminator.
pub const MAX_CALLSIGN_LEN: usize = 15;

/// Wire-level sentinel for "no MRN present", matching the
/// `CPDLC_INVALID_MSG_SEQ_NR` constant from the reference protocol. Callers
/// normally never see this value directly -- [`Message::mrn`] is `None` when
/// absent -- it only appears inside the codec.
pub const INVALID_MSG_SEQ_NR: u32 = u32::MAX;

/// Direction a message travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Aircraft -> ground.
    Downlink,
    /// Ground -> aircraft.
    Uplink,
}

impl Direction {
    pub fn is_downlink(self) -> bool {
        matches!(self, Direction::Downlink)
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Downlink => Direction::Uplink,
            Direction::Uplink => Direction::Downlink,
        }
    }
}

/// One `(message_type_code, argument_vector)` tuple within a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub code: u16,
    pub args: Vec<String>,
}

impl Segment {
    pub fn new(code: u16, args: Vec<String>) -> Self {
        Self { code, args }
    }

    pub fn bare(code: u16) -> Self {
        Self { code, args: Vec::new() }
    }
}

/// A single CPDLC message: either a logon or an ordinary traffic message
/// carrying one or more segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub direction: Direction,
    pub min: u32,
    pub mrn: Option<u32>,
    pub from: String,
    pub to: Option<String>,
    pub is_logon: bool,
    pub logon_payload: Option<String>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("callsign {0:?} exceeds {MAX_CALLSIGN_LEN} bytes")]
    CallsignTooLong(String),
    #[error("logon message must set FROM=")]
    LogonMissingFrom,
    #[error("segment {0} direction does not match message direction")]
    MixedSegmentDirection(u16),
}

impl Message {
    /// Validates the invariants from spec §3.1: callsign length, a
    /// non-empty FROM on logon, and that every segment whose code is in the
    /// catalog shares the message's own direction. Segments with an unknown
    /// code are skipped -- the catalog is not exhaustive.
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.from.len() > MAX_CALLSIGN_LEN {
            return Err(MessageError::CallsignTooLong(self.from.clone()));
        }
        if let Some(to) = &self.to
            && to.len() > MAX_CALLSIGN_LEN
        {
            return Err(MessageError::CallsignTooLong(to.clone()));
        }
        if self.is_logon && self.from.is_empty() {
            return Err(MessageError::LogonMissingFrom);
        }
        for segment in &self.segments {
            if let Some(info) = catalog::lookup(segment.code)
                && info.is_downlink != self.direction.is_downlink()
            {
                return Err(MessageError::MixedSegmentDirection(segment.code));
            }
        }
        Ok(())
    }

    pub fn new_logon(from: impl Into<String>, to: Option<String>) -> Self {
        Self {
            direction: Direction::Downlink,
            min: 0,
            mrn: None,
            from: from.into(),
            to,
            is_logon: true,
            logon_payload: None,
            segments: Vec::new(),
        }
    }

    pub fn new_traffic(
        direction: Direction,
        from: impl Into<String>,
        to: Option<String>,
        segments: Vec<Segment>,
    ) -> Self {
        Self {
            direction,
            min: 0,
            mrn: None,
            from: from.into(),
            to,
            is_logon: false,
            logon_payload: None,
            segments,
        }
    }
}
