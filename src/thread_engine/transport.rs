// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The thin "client transport" interface the thread engine sits on top of
//! (spec §2, §6.4). Hides the TLS connection from the engine: the engine
//! never touches a socket directly, only this trait.

use crate::wire::Message;

/// Opaque handle returned by [`ClientTransport::send`]. The engine only
/// ever stores and later passes this back to [`ClientTransport::status`];
/// it never inspects the value (spec §9 "Opaque send tokens").
pub type SendToken = u64;

/// Status of a previously-submitted send, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sending,
    Sent,
    SendFailed,
}

/// Whether the underlying connection is currently logged on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonStatus {
    LoggedOn,
    LoggedOff,
}

/// Collaborator interface consumed by the thread engine (spec §6.4).
///
/// A real implementation wraps a TLS client connection and a background
/// task that decodes incoming frames and invokes the callback registered
/// via [`ClientTransport::set_recv_cb`]. Polling [`ClientTransport::status`]
/// is acceptable -- the engine recomputes thread status on every external
/// event (spec §9 "Opaque send tokens").
pub trait ClientTransport: Send + Sync {
    /// Hands an already MIN/MRN-assigned message to the transport for
    /// encoding and transmission; returns a token for later status queries.
    fn send(&self, msg: &Message) -> SendToken;

    /// Current status of a previously-submitted send.
    fn status(&self, token: SendToken) -> SendStatus;

    /// Whether the connection backing this transport is still logged on.
    fn logon_status(&self) -> LogonStatus;

    /// Registers the callback invoked whenever a message arrives. Only one
    /// callback is ever registered (the engine's `on_receive`); a second
    /// call replaces the first.
    fn set_recv_cb(&self, cb: Box<dyn Fn(Message) + Send + Sync>);
}
