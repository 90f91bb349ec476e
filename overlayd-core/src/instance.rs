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

//! Module Instance Descriptor (component A): the identity triple plus the
//! mutable FSM slot for one `(peer, user?, module)` instance. All mutation
//! is funnelled through the FSM engine; this type itself only exposes
//! read accessors plus the handful of setters the engine and host need.

use crate::host::ModuleHost;
use crate::model::{ModuleName, PeerName, UserName};
use crate::state::{MiState, WorkState};
use std::collections::VecDeque;
use std::path::PathBuf;

/// Identity of one module instance: which peer it talks to, which local
/// user it is scoped to (absent for system-scoped modules), and which
/// local module it is an instance of. Exactly one `ModuleInstance` exists
/// per distinct `InstanceId` for the lifetime of the manager (invariant I1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    /// Peer this instance is paired with (the local host's own name for
    /// self-peer / loopback instances).
    pub peer_name: PeerName,
    /// Local user this instance is scoped to, or `None` for a
    /// system-scoped module.
    pub user_name: Option<UserName>,
    /// Local module name (`<class>-<role>-<tag>`).
    pub module_name: ModuleName,
}

/// Name of the module callback currently in flight for an instance, or
/// queued behind one. At most one is ever in flight per instance
/// (invariant I2).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Callback {
    /// Instance creation notification.
    OnInit,
    /// Instance became active.
    OnActive,
    /// Instance is being torn down.
    OnInactive,
    /// Inbound data frame delivery.
    OnRecv,
}

/// A pending FSM event queued behind an in-flight callback (FSM rule 1).
/// Re-exported here rather than in `fsm` to avoid a dependency cycle;
/// `fsm::Event` is the canonical definition this wraps.
pub type QueuedEvent = crate::fsm::Event;

/// The central entity of the local module manager: identity plus mutable
/// FSM slot. Construction and all state transitions happen through
/// `LocalManager`/`fsm`; this struct's own methods are read accessors and
/// the narrow set of mutators those two need.
pub struct ModuleInstance {
    id: InstanceId,
    state: MiState,
    work_state: WorkState,
    fail_message: Option<String>,
    pending: Option<Callback>,
    queued_events: VecDeque<QueuedEvent>,
    host: Box<dyn ModuleHost>,
    tmp_dir: PathBuf,
}

impl ModuleInstance {
    /// Construct a freshly-created instance in state `INIT`, with no
    /// callback in flight and no failure recorded.
    pub fn new(id: InstanceId, host: Box<dyn ModuleHost>, tmp_dir: PathBuf) -> ModuleInstance {
        ModuleInstance {
            id,
            state: MiState::Init,
            work_state: WorkState::Idle,
            fail_message: None,
            pending: None,
            queued_events: VecDeque::new(),
            host,
            tmp_dir,
        }
    }

    /// This instance's identity triple.
    pub fn identity(&self) -> &InstanceId {
        &self.id
    }

    /// Current FSM state.
    pub fn state(&self) -> MiState {
        self.state
    }

    /// Current aggregate work indicator.
    pub fn work_state(&self) -> WorkState {
        self.work_state
    }

    /// Failure message, set iff `state()` is one of the four failure
    /// states (invariant I3).
    pub fn fail_message(&self) -> Option<&str> {
        self.fail_message.as_deref()
    }

    /// Name of the callback currently in flight, if any.
    pub fn pending(&self) -> Option<Callback> {
        self.pending
    }

    /// This instance's isolated module host.
    pub fn host(&self) -> &dyn ModuleHost {
        self.host.as_ref()
    }

    /// This instance's isolated module host, mutably.
    pub fn host_mut(&mut self) -> &mut dyn ModuleHost {
        self.host.as_mut()
    }

    /// Scoped workspace directory for this instance.
    pub fn tmp_dir(&self) -> &PathBuf {
        &self.tmp_dir
    }

    pub(crate) fn set_state(&mut self, state: MiState, fail_message: Option<String>) {
        debug_assert_eq!(
            state.is_failure(),
            fail_message.is_some(),
            "failMessage must be set iff the target state is a failure state"
        );
        self.state = state;
        self.fail_message = fail_message;
    }

    pub(crate) fn set_pending(&mut self, callback: Option<Callback>) {
        self.pending = callback;
    }

    /// Reported by the module through the manager-provided setter
    /// (§9, open question): the manager only aggregates this, it never
    /// transitions it on the module's behalf.
    pub fn set_work_state(&mut self, work_state: WorkState) {
        self.work_state = work_state;
    }

    /// Queue an event behind the in-flight callback (FSM rule 1).
    pub(crate) fn queue_event(&mut self, event: QueuedEvent) {
        self.queued_events.push_back(event);
    }

    /// Drain events queued while a callback was in flight, FIFO.
    pub(crate) fn drain_queued_events(&mut self) -> VecDeque<QueuedEvent> {
        std::mem::take(&mut self.queued_events)
    }

    pub(crate) fn has_queued_events(&self) -> bool {
        !self.queued_events.is_empty()
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("work_state", &self.work_state)
            .field("pending", &self.pending)
            .finish()
    }
}
