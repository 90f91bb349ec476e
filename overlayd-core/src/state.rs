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

//! The module instance FSM's state and work-state enums.

/// State of one module instance, per the transition table of the FSM
/// engine. `REJECT`/`PEER_REJECT`/`EXCEPT`/`PEER_EXCEPT` are the four
/// failure states; `failMessage` is non-empty iff the state is one of
/// these (invariant I3).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MiState {
    /// Just created; `onInit` has not yet completed.
    Init,
    /// `onInit` completed; waiting for a matching peer advertisement.
    Inactive,
    /// `onActive` completed; the instance may exchange `DATA` frames.
    Active,
    /// The module cooperatively declined to continue.
    Reject,
    /// The peer declined to continue (a `REJECT` frame arrived).
    PeerReject,
    /// The module raised an unhandled error.
    Except,
    /// The peer raised an unhandled error (an `EXCEPT` frame arrived).
    PeerExcept,
}

impl MiState {
    /// True for the four failure states, exactly when `failMessage` must
    /// be non-empty (invariant I3).
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            MiState::Reject | MiState::PeerReject | MiState::Except | MiState::PeerExcept
        )
    }

    /// True once the instance is considered settled for shutdown purposes
    /// (invariant I6: every instance must be INACTIVE or EXCEPT after
    /// `dispose()`).
    pub fn is_dispose_safe(self) -> bool {
        matches!(self, MiState::Inactive | MiState::Except)
    }
}

/// Aggregate work indicator a module reports about itself. The manager
/// never sets this directly; modules report it through a manager-provided
/// setter and the manager only aggregates it (§4.E, S6).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WorkState {
    /// The instance has no outstanding work.
    Idle,
    /// The instance considers itself busy.
    Working,
}

impl Default for WorkState {
    fn default() -> Self {
        WorkState::Idle
    }
}
