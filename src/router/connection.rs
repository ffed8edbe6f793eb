// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server-side connection state (spec §3.2, §4.1). A `Connection` never
//! touches a socket: it owns an input buffer and decodes frames from
//! whatever bytes the daemon's I/O task feeds it, and writes out through
//! an [`OutboundSink`].

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::wire::{self, DecodeOutcome, Message};

use super::sink::OutboundSink;

pub type ConnId = u64;

/// Input byte budget while `TLS_UP` (pre-logon), spec §6.1.
pub const MAX_BUF_SZ_NO_LOGON: usize = 128;
/// Input byte budget once `LOGGED_ON`, spec §6.1.
pub const MAX_BUF_SZ: usize = 8192;

/// Connection state machine, spec §4.1. `Accepted` is the daemon's own
/// bookkeeping for a socket still mid-TLS-handshake -- by the time a
/// `Connection` is registered with [`super::core::Router`] the handshake
/// has already completed, so `Router` itself only ever observes
/// `TlsUp` onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Accepted,
    TlsUp,
    LoggedOn,
    Closed,
}

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("input buffer exceeded {0}-byte cap")]
    BufferOverflow(usize),
    #[error("malformed frame")]
    Decode(#[from] wire::DecodeError),
}

pub struct Connection {
    pub id: ConnId,
    pub peer_addr: SocketAddr,
    pub state: ConnState,
    /// Bound sender callsign; empty until logon.
    pub from: String,
    /// Declared peer callsign from the logon (or most recent) message.
    pub to: Option<String>,
    in_buf: BytesMut,
    sink: Arc<dyn OutboundSink>,
}

impl Connection {
    pub fn new(id: ConnId, peer_addr: SocketAddr, sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            id,
            peer_addr,
            state: ConnState::TlsUp,
            from: String::new(),
            to: None,
            in_buf: BytesMut::new(),
            sink,
        }
    }

    fn cap(&self) -> usize {
        if self.state == ConnState::LoggedOn {
            MAX_BUF_SZ
        } else {
            MAX_BUF_SZ_NO_LOGON
        }
    }

    pub fn send(&self, bytes: Bytes) {
        self.sink.enqueue_bytes(bytes);
    }

    pub fn close(&mut self) {
        self.state = ConnState::Closed;
        self.sink.close();
    }

    /// Appends `data`, decodes every complete frame it can, and enforces
    /// the active byte-budget cap. A malformed frame or cap overflow is
    /// fatal (spec §4.1, §6.1): the caller must close the connection.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Message>, ConnError> {
        self.in_buf.extend_from_slice(data);
        let cap = self.cap();
        let mut out = Vec::new();
        loop {
            match wire::decode(&self.in_buf)? {
                DecodeOutcome::Message(msg, consumed) => {
                    let _ = self.in_buf.split_to(consumed);
                    out.push(msg);
                }
                DecodeOutcome::NeedMore => break,
            }
        }
        if self.in_buf.len() > cap {
            return Err(ConnError::BufferOverflow(cap));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::sink::test_support::RecordingSink;

    fn conn() -> Connection {
        Connection::new(1, "127.0.0.1:9".parse().expect("valid address"), Arc::new(RecordingSink::default()))
    }

    #[test]
    fn pre_logon_cap_is_128_bytes() {
        let mut c = conn();
        let oversize = vec![b'X'; MAX_BUF_SZ_NO_LOGON + 1];
        assert!(matches!(c.feed(&oversize), Err(ConnError::BufferOverflow(128))));
    }

    #[test]
    fn logged_on_cap_is_8192_bytes() {
        let mut c = conn();
        c.state = ConnState::LoggedOn;
        let oversize = vec![b'X'; MAX_BUF_SZ + 1];
        assert!(matches!(c.feed(&oversize), Err(ConnError::BufferOverflow(8192))));
    }

    #[test]
    fn complete_frame_decodes_and_drains_buffer() {
        let mut c = conn();
        let msg = Message::new_logon("N1", Some("ATC".to_string()));
        let encoded = wire::encode(&msg).expect("encode");
        let decoded = c.feed(&encoded).expect("decode");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].from, "N1");
    }
}
