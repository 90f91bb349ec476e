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

//! Module Host (component B): the two uniform hosting strategies that
//! isolate module code from the supervisor. Both variants are driven
//! through the same `ModuleHost` trait so the FSM engine never has to
//! know which one backs a given instance.

pub mod in_process;
pub mod subprocess;
pub mod wire;

use crate::instance::Callback;
use crate::module_trait::ModuleFailure;
use crate::state::WorkState;
use crate::transport::PeerMessage;

/// Arguments a callback dispatch carries. Only `OnRecv` carries a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackArgs {
    /// No argument.
    None,
    /// The opaque `DATA` payload delivered to `on_recv`.
    Payload(Vec<u8>),
}

/// What a completed (or failed) callback dispatch reports back to the FSM
/// engine, uniformly for both hosting strategies.
#[derive(Debug, Clone)]
pub enum HostNotification {
    /// The callback returned successfully.
    Return,
    /// The callback cooperatively rejected (`on_recv` only).
    Reject(String),
    /// The callback failed any other way, including a child crash.
    Except(ModuleFailure),
    /// The module asked to send a frame to its peer, independent of the
    /// callback's own completion. Subprocess hosts relay their child's
    /// `SEND` messages this way; in-process hosts queue the same
    /// notification from inside `ModuleCtx::send_data` and surface it
    /// through `drain_notifications` right after the callback that queued
    /// it returns.
    Send(PeerMessage),
    /// The module reported its aggregate work indicator, independent of
    /// the callback's own completion. Queued/relayed the same way as
    /// `Send`.
    WorkState(WorkState),
}

/// Whether a dispatched callback completed synchronously (in-process) or
/// only started, with its result to arrive later via
/// `ModuleHost::drain_notifications` (subprocess).
#[derive(Debug)]
pub enum InvokeOutcome {
    /// The in-process host ran the callback to completion immediately
    /// when invoked from the deferred queue.
    Completed(HostNotification),
    /// The subprocess host only forwarded the request to the child; the
    /// result will surface later.
    Pending,
}

/// Isolation boundary for one module instance's callbacks. Implementations
/// guarantee: after an `Except` notification the host is inert (no further
/// callbacks dispatched); callbacks are never re-entrant (the caller
/// enforces `pending` is clear before invoking).
pub trait ModuleHost {
    /// Dispatch `callback`. Must only be called when no callback is
    /// already in flight for this host (the manager enforces this via
    /// `ModuleInstance::pending`).
    fn invoke(&mut self, callback: Callback, args: CallbackArgs) -> InvokeOutcome;

    /// Drain notifications queued independently of the in-flight
    /// callback's own completion: subprocess `SEND`/`WORK_STATE` messages
    /// arriving asynchronously (or a crashed child, surfaced as `EXCEPT`),
    /// and in-process `send_data`/`set_work_state` calls queued by the
    /// callback that `invoke` just completed. Called by the manager right
    /// after every `invoke`, and once per loop tick otherwise.
    fn drain_notifications(&mut self) -> Vec<HostNotification>;

    /// True once this host is inert after an `Except` notification: no
    /// further callbacks will be dispatched.
    fn is_inert(&self) -> bool;
}
