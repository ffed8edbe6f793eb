// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Textual frame codec shared by the router daemon and the client-side
//! message-list engine (spec §3.1, §6.1).
//!
//! Wire grammar, one frame per line:
//!
//! ```text
//! CPDLC1|DIR=D|FROM=<callsign>|[TO=<callsign>|]MIN=<u32>|[MRN=<u32>|]LOGON=0|1|[LDATA=<text>|][SEG=<code>[:<arg>[,<arg>...]][;<code>...]]\n
//! ```
//!
//! `CPDLC1` is a fixed sync marker. Fields are `|`-separated `KEY=VALUE`
//! pairs; segments are packed into one trailing `SEG=` field, `;`-separated,
//! each segment as `code` or `code:arg,arg,...`. A frame is terminated by a
//! single `\n` and carries no other embedded newlines. Every byte must be
//! printable 7-bit ASCII (0x20-0x7E) except the terminating `\n` itself; a
//! byte of value 0 or greater than 127 anywhere in the stream is a fatal
//! protocol error per spec §6.1, checked independently of frame boundaries
//! so that the caller can enforce it on partial buffers too.

use thiserror::Error;

use crate::wire::message::{Direction, Message, Segment};

const MAGIC: &str = "CPDLC1";
const FIELD_SEP: char = '|';
const SEG_SEP: char = ';';
const ARG_SEP: char = ',';
const KV_SEP: char = '=';
const SEG_KV_SEP: char = ':';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("non-ASCII or NUL byte in input stream")]
    NonAscii,
    #[error("missing or malformed sync marker")]
    BadMagic,
    #[error("malformed field: {0:?}")]
    MalformedField(String),
    #[error("missing mandatory field {0}")]
    MissingField(&'static str),
    #[error("malformed segment: {0:?}")]
    MalformedSegment(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("field {field} contains a disallowed byte: {value:?}")]
    DisallowedByte { field: &'static str, value: String },
}

/// Result of attempting to decode one frame out of a byte buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A complete message was decoded; second element is the number of
    /// bytes consumed from the front of the buffer.
    Message(Message, usize),
    /// Not enough bytes buffered yet for a complete frame; wait for more.
    NeedMore,
}

/// Returns `Err` if `b` is NUL or non-ASCII (spec §6.1).
fn check_stream_byte(b: u8) -> Result<(), DecodeError> {
    if b == 0 || b > 127 {
        Err(DecodeError::NonAscii)
    } else {
        Ok(())
    }
}

fn disallowed(s: &str) -> bool {
    s.bytes().any(|b| {
        b == 0
            || b > 127
            || b == b'\n'
            || b == FIELD_SEP as u8
            || b == SEG_SEP as u8
            || b == ARG_SEP as u8
            || b == KV_SEP as u8
            || b == SEG_KV_SEP as u8
    })
}

fn check_field(field: &'static str, value: &str) -> Result<(), EncodeError> {
    if disallowed(value) {
        Err(EncodeError::DisallowedByte { field, value: value.to_string() })
    } else {
        Ok(())
    }
}

/// Encodes `msg` into a single newline-terminated frame.
///
/// An implementation MUST accept any encoding produced by its own encoder
/// (spec §6.1); callers that need to guard against malformed application
/// data should call [`Message::validate`] first.
pub fn encode(msg: &Message) -> Result<Vec<u8>, EncodeError> {
    check_field("FROM", &msg.from)?;
    if let Some(to) = &msg.to {
        check_field("TO", to)?;
    }
    if let Some(payload) = &msg.logon_payload {
        check_field("LDATA", payload)?;
    }
    for seg in &msg.segments {
        for arg in &seg.args {
            check_field("SEG arg", arg)?;
        }
    }

    let mut out = String::with_capacity(64);
    out.push_str(MAGIC);
    out.push(FIELD_SEP);
    out.push_str(if msg.direction.is_downlink() { "DIR=D" } else { "DIR=U" });
    out.push(FIELD_SEP);
    out.push_str("FROM=");
    out.push_str(&msg.from);
    if let Some(to) = &msg.to {
        out.push(FIELD_SEP);
        out.push_str("TO=");
        out.push_str(to);
    }
    out.push(FIELD_SEP);
    out.push_str(&format!("MIN={}", msg.min));
    if let Some(mrn) = msg.mrn {
        out.push(FIELD_SEP);
        out.push_str(&format!("MRN={mrn}"));
    }
    out.push(FIELD_SEP);
    out.push_str(if msg.is_logon { "LOGON=1" } else { "LOGON=0" });
    if let Some(payload) = &msg.logon_payload {
        out.push(FIELD_SEP);
        out.push_str("LDATA=");
        out.push_str(payload);
    }
    if !msg.segments.is_empty() {
        out.push(FIELD_SEP);
        out.push_str("SEG=");
        for (i, seg) in msg.segments.iter().enumerate() {
            if i > 0 {
                out.push(SEG_SEP);
            }
            out.push_str(&seg.code.to_string());
            if !seg.args.is_empty() {
                out.push(SEG_KV_SEP);
                out.push_str(&seg.args.join(&ARG_SEP.to_string()));
            }
        }
    }
    out.push('\n');
    Ok(out.into_bytes())
}

fn parse_segments(raw: &str) -> Result<Vec<Segment>, DecodeError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    raw.split(SEG_SEP)
        .map(|spec| {
            let (code_str, args_str) = match spec.split_once(SEG_KV_SEP) {
                Some((c, a)) => (c, Some(a)),
                None => (spec, None),
            };
            let code: u16 = code_str
                .parse()
                .map_err(|_| DecodeError::MalformedSegment(spec.to_string()))?;
            let args = match args_str {
                None | Some("") => Vec::new(),
                Some(a) => a.split(ARG_SEP).map(str::to_string).collect(),
            };
            Ok(Segment { code, args })
        })
        .collect()
}

/// Attempts to decode one frame from the front of `buf`.
///
/// Returns [`DecodeOutcome::NeedMore`] when no `\n` has arrived yet (wait
/// for more bytes); otherwise returns the decoded message and the number
/// of bytes that made up its frame (including the trailing `\n`), which
/// the caller must drain from its input buffer.
pub fn decode(buf: &[u8]) -> Result<DecodeOutcome, DecodeError> {
    let Some(nl) = buf.iter().position(|&b| b == b'\n') else {
        for &b in buf {
            check_stream_byte(b)?;
        }
        return Ok(DecodeOutcome::NeedMore);
    };

    for &b in &buf[..nl] {
        check_stream_byte(b)?;
    }

    let line = std::str::from_utf8(&buf[..nl])
        .map_err(|_| DecodeError::MalformedField("non-UTF8 line".to_string()))?;

    let mut fields = line.split(FIELD_SEP);
    let magic = fields.next().unwrap_or("");
    if magic != MAGIC {
        return Err(DecodeError::BadMagic);
    }

    let mut direction = None;
    let mut from = None;
    let mut to = None;
    let mut min = None;
    let mut mrn = None;
    let mut is_logon = None;
    let mut logon_payload = None;
    let mut segments = Vec::new();

    for field in fields {
        let (key, value) = field
            .split_once(KV_SEP)
            .ok_or_else(|| DecodeError::MalformedField(field.to_string()))?;
        match key {
            "DIR" => {
                direction = Some(match value {
                    "D" => Direction::Downlink,
                    "U" => Direction::Uplink,
                    _ => return Err(DecodeError::MalformedField(field.to_string())),
                });
            },
            "FROM" => from = Some(value.to_string()),
            "TO" => to = Some(value.to_string()),
            "MIN" => {
                min = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| DecodeError::MalformedField(field.to_string()))?,
                )
            },
            "MRN" => {
                mrn = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| DecodeError::MalformedField(field.to_string()))?,
                )
            },
            "LOGON" => {
                is_logon = Some(match value {
                    "0" => false,
                    "1" => true,
                    _ => return Err(DecodeError::MalformedField(field.to_string())),
                });
            },
            "LDATA" => logon_payload = Some(value.to_string()),
            "SEG" => segments = parse_segments(value)?,
            _ => return Err(DecodeError::MalformedField(field.to_string())),
        }
    }

    let msg = Message {
        direction: direction.ok_or(DecodeError::MissingField("DIR"))?,
        min: min.ok_or(DecodeError::MissingField("MIN"))?,
        mrn,
        from: from.ok_or(DecodeError::MissingField("FROM"))?,
        to,
        is_logon: is_logon.ok_or(DecodeError::MissingField("LOGON"))?,
        logon_payload,
        segments,
    };

    Ok(DecodeOutcome::Message(msg, nl + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::message::MAX_CALLSIGN_LEN;

    fn sample() -> Message {
        Message {
            direction: Direction::Downlink,
            min: 7,
            mrn: None,
            from: "B".to_string(),
            to: Some("ATC1".to_string()),
            is_logon: false,
            logon_payload: None,
            segments: vec![
                Segment::new(20, vec!["350".to_string()]),
                Segment::bare(3),
            ],
        }
    }

    #[test]
    fn round_trips_a_traffic_message() {
        let msg = sample();
        let bytes = encode(&msg).expect("encode");
        match decode(&bytes).expect("decode") {
            DecodeOutcome::Message(decoded, consumed) => {
                assert_eq!(consumed, bytes.len());
                assert_eq!(decoded, msg);
            },
            DecodeOutcome::NeedMore => panic!("expected a complete message"),
        }
    }

    #[test]
    fn round_trips_a_logon_with_reply() {
        let msg = Message {
            direction: Direction::Downlink,
            min: 0,
            mrn: Some(41),
            from: "ABC123".to_string(),
            to: None,
            is_logon: true,
            logon_payload: Some("hello".to_string()),
            segments: Vec::new(),
        };
        let bytes = encode(&msg).expect("encode");
        match decode(&bytes).expect("decode") {
            DecodeOutcome::Message(decoded, _) => assert_eq!(decoded, msg),
            DecodeOutcome::NeedMore => panic!("expected a complete message"),
        }
    }

    #[test]
    fn need_more_until_newline_arrives() {
        let msg = sample();
        let bytes = encode(&msg).expect("encode");
        let partial = &bytes[..bytes.len() - 1];
        assert_eq!(decode(partial).expect("decode"), DecodeOutcome::NeedMore);
    }

    #[test]
    fn decodes_two_frames_sequentially_from_one_buffer() {
        let mut buf = encode(&sample()).expect("encode");
        let second = Message::new_logon("XYZ", Some("ATC1".to_string()));
        buf.extend(encode(&second).expect("encode"));

        let DecodeOutcome::Message(first_decoded, consumed) = decode(&buf).expect("decode")
        else {
            panic!("expected first message")
        };
        assert_eq!(first_decoded, sample());
        let DecodeOutcome::Message(second_decoded, consumed2) =
            decode(&buf[consumed..]).expect("decode")
        else {
            panic!("expected second message")
        };
        assert_eq!(second_decoded, second);
        assert_eq!(consumed + consumed2, buf.len());
    }

    #[test]
    fn rejects_non_ascii_byte() {
        let mut bytes = encode(&sample()).expect("encode");
        bytes[3] = 0xFF;
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::NonAscii);
    }

    #[test]
    fn rejects_nul_byte_even_without_newline_yet() {
        let buf = [b'C', b'P', 0u8];
        assert_eq!(decode(&buf).unwrap_err(), DecodeError::NonAscii);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = b"NOPE|DIR=D\n";
        assert_eq!(decode(buf).unwrap_err(), DecodeError::BadMagic);
    }

    #[test]
    fn encode_rejects_disallowed_bytes_in_callsign() {
        let mut msg = sample();
        msg.from = "A|B".to_string();
        assert!(matches!(
            encode(&msg),
            Err(EncodeError::DisallowedByte { field: "FROM", .. })
        ));
    }

    #[test]
    fn callsign_length_limit_is_fifteen_bytes() {
        let mut msg = sample();
        msg.from = "A".repeat(MAX_CALLSIGN_LEN);
        assert!(msg.validate().is_ok());
        msg.from.push('X');
        assert!(msg.validate().is_err());
    }
}
