//  Copyright (C) 2017-2019  The AXIOM TEAM Association.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The peer wire frame taxonomy, and the `PeerTransport` contract the
//! manager consumes. The mutual-TLS socket fabric between hosts, and its
//! wire encoding, are out of scope for the core: the core only ever sees
//! the three frame variants below, already decoded.

use crate::model::{ModuleName, PeerName, UserName};

/// The three frame variants the core recognises on the peer wire. Any
/// payload carried inside `Data` is opaque to the core and passed
/// verbatim to the destination module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opaque application payload.
    Data(Vec<u8>),
    /// Cooperative decline, carrying a human-readable reason.
    Reject(String),
    /// Unhandled module failure.
    Except,
}

/// One frame addressed to or originating from a specific module instance
/// on a specific peer, under an optional user scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    /// Peer this message is to/from.
    pub peer_name: PeerName,
    /// User scope, if any.
    pub user_name: Option<UserName>,
    /// Name of the module that sent (inbound) or should receive
    /// (outbound) this frame, from the *sender's* point of view.
    pub module_name: ModuleName,
    /// The frame itself.
    pub frame: Frame,
}

/// Notifications the transport raises about the federation's roster,
/// independent of any particular module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEvent {
    /// A peer's advertised `SysInfo` changed (including first contact).
    PeerChanged(PeerName, crate::model::SysInfo),
    /// A peer was removed from the federation.
    PeerRemoved(PeerName),
}

/// External collaborator: delivers inbound peer frames and roster events,
/// and accepts outbound frames. Authentication and frame encoding are the
/// transport's job; the core trusts every message this contract delivers.
pub trait PeerTransport: Send {
    /// Hand an outbound frame to the transport for delivery to `message`'s
    /// peer. Errors are transport-internal and logged; the core does not
    /// retry (per the error handling design, module exceptions are never
    /// retried, and transport failures are fatal only at the level of
    /// `ManagerError::TransportFailed`, raised separately).
    fn send(&self, message: PeerMessage) -> Result<(), String>;
}
