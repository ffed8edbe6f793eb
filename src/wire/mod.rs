// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared wire message model and textual codec (spec §3.1, §6.1). Used by
//! both the router daemon and the client-side thread engine.

pub mod codec;
pub mod message;

pub use codec::{decode, encode, DecodeError, DecodeOutcome, EncodeError};
pub use message::{
    Direction, Message, MessageError, Segment, INVALID_MSG_SEQ_NR, MAX_CALLSIGN_LEN,
};
