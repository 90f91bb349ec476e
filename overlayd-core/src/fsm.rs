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

//! FSM Engine (component C). Pure transition logic for one module instance:
//! given the instance's current state plus either an external event or the
//! result of the callback it is currently running, decides what happens
//! next. Holds no state of its own and owns no instance; `LocalManager`
//! drives it, enforcing single-flight dispatch and FIFO queueing of events
//! that arrive while a callback is in flight (FSM rule 1).

use crate::host::HostNotification;
use crate::instance::Callback;
use crate::host::CallbackArgs;
use crate::state::MiState;
use crate::transport::Frame;

/// External stimulus for an idle module instance (no callback in flight):
/// either a roster change forwarded by the reconciler, or an inbound peer
/// frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The peer's advertisement now matches this instance.
    PeerMatchAppears,
    /// The peer's advertisement no longer matches this instance, while it
    /// stays in the federation.
    PeerMatchGone,
    /// The peer left the federation entirely.
    PeerRemoved,
    /// A frame addressed to this instance arrived from its peer.
    Frame(Frame),
}

/// Which landing state a pending `onInactive` invocation is working
/// towards, decided when the callback was dispatched — `onInactive` itself
/// does not know why it was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownTarget {
    /// Peer match lost, or peer removed while still matching: lands back
    /// in `INACTIVE`.
    Inactive,
    /// The module itself asked to stop via a cooperative reject raised
    /// from `onRecv`: lands in `REJECT`, then sends `REJECT(message)`.
    Reject,
    /// A `REJECT` frame arrived from the peer: lands in `PEER_REJECT`.
    PeerReject,
    /// An `EXCEPT` frame arrived from the peer: lands in `PEER_EXCEPT`.
    PeerExcept,
}

impl TeardownTarget {
    fn landing_state(self) -> MiState {
        match self {
            TeardownTarget::Inactive => MiState::Inactive,
            TeardownTarget::Reject => MiState::Reject,
            TeardownTarget::PeerReject => MiState::PeerReject,
            TeardownTarget::PeerExcept => MiState::PeerExcept,
        }
    }
}

/// Recorded by the manager alongside `pending` so that when the
/// dispatched callback's result comes back, the engine knows how to
/// interpret it. `onInit`/`onActive`/`onRecv` each have one fixed
/// interpretation; `onInactive` is dispatched for one of four distinct
/// reasons and needs to remember which.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOutcome {
    /// `onInit` is in flight.
    Init,
    /// `onActive` is in flight.
    Active,
    /// `onRecv` is in flight.
    Recv,
    /// `onInactive` is in flight, tearing down towards `target`.
    /// `fail_message` is the message that will be recorded if the teardown
    /// lands in `REJECT` or `PEER_REJECT` (carried from the raised reject,
    /// or the inbound `REJECT` frame); unused for the other two targets.
    Teardown {
        target: TeardownTarget,
        fail_message: Option<String>,
    },
}

/// What the engine decided to do in response to an `Event` on an idle
/// instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Dispatch `0` with argument `1`; interpret its result per `2` once it
    /// completes.
    Dispatch(Callback, CallbackArgs, PendingOutcome),
    /// Move directly to a new state; no callback involved.
    Transition(MiState),
    /// The event has no effect in this state (FSM rule 3 / invariant I4,
    /// and stray frames addressed to a non-`ACTIVE` instance generally).
    Drop,
}

/// Decide how instance state `state` reacts to `event`. Only meaningful
/// while the instance is idle; the caller must queue events that arrive
/// with a callback already in flight (rule 1) and replay them through this
/// same function once it clears.
pub fn react(state: MiState, event: &Event) -> Reaction {
    use Event::*;
    match (state, event) {
        (MiState::Inactive, PeerMatchAppears) => {
            Reaction::Dispatch(Callback::OnActive, CallbackArgs::None, PendingOutcome::Active)
        }
        (MiState::Active, PeerMatchGone) | (MiState::Active, PeerRemoved) => Reaction::Dispatch(
            Callback::OnInactive,
            CallbackArgs::None,
            PendingOutcome::Teardown {
                target: TeardownTarget::Inactive,
                fail_message: None,
            },
        ),
        (MiState::Active, Frame(crate::transport::Frame::Data(payload))) => Reaction::Dispatch(
            Callback::OnRecv,
            CallbackArgs::Payload(payload.clone()),
            PendingOutcome::Recv,
        ),
        (MiState::Active, Frame(crate::transport::Frame::Reject(message))) => Reaction::Dispatch(
            Callback::OnInactive,
            CallbackArgs::None,
            PendingOutcome::Teardown {
                target: TeardownTarget::PeerReject,
                fail_message: Some(message.clone()),
            },
        ),
        (MiState::Active, Frame(crate::transport::Frame::Except)) => Reaction::Dispatch(
            Callback::OnInactive,
            CallbackArgs::None,
            PendingOutcome::Teardown {
                target: TeardownTarget::PeerExcept,
                fail_message: Some("peer raised EXCEPT".to_owned()),
            },
        ),
        // Rows §4.C "PEER_REJECT / PEER_EXCEPT -- peer-removed --> INACTIVE"
        // and its REJECT analogue (needed for I6: dispose() must be able to
        // resolve every failure state other than EXCEPT to INACTIVE).
        // `onInactive` already ran when the instance entered these states;
        // it is not invoked a second time.
        (MiState::Reject, PeerRemoved)
        | (MiState::PeerReject, PeerRemoved)
        | (MiState::PeerExcept, PeerRemoved) => Reaction::Transition(MiState::Inactive),
        // Open question (§9) resolved: EXCEPT is kept terminal. See
        // DESIGN.md for the rationale.
        (MiState::Except, PeerRemoved) => Reaction::Transition(MiState::Except),
        // Data frames addressed to a non-ACTIVE instance are silently
        // dropped (rule 3, invariant I4); so is every other event with no
        // listed transition (e.g. a stray frame while INIT, or a second
        // PeerMatchAppears while already ACTIVE).
        _ => Reaction::Drop,
    }
}

/// The two ways a pending callback's result can be interpreted: it either
/// settles the instance in a new state, or it requires dispatching a
/// further callback first (an `onRecv` reject must still run `onInactive`
/// before the instance lands in `REJECT`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The instance settled. `send` is the frame, if any, the manager must
    /// now hand to the transport — always *after* the state change has
    /// been committed (rule 2).
    Settled {
        new_state: MiState,
        fail_message: Option<String>,
        send: Option<Frame>,
    },
    /// Dispatch another callback before the instance settles.
    Continue(Callback, CallbackArgs, PendingOutcome),
}

fn settled(new_state: MiState, fail_message: Option<String>, send: Option<Frame>) -> Completion {
    Completion::Settled {
        new_state,
        fail_message,
        send,
    }
}

/// Interpret `notification`, the result of the callback dispatched under
/// `outcome`. Panics if `notification` is a `Send` (those are routed to the
/// transport directly by the manager and never reach the engine) or if
/// `outcome`/`notification` are not one of the pairings the host contract
/// guarantees (a `Reject` notification only ever follows `PendingOutcome::Recv`).
pub fn complete(outcome: &PendingOutcome, notification: HostNotification) -> Completion {
    match (outcome, notification) {
        (PendingOutcome::Init, HostNotification::Return) => settled(MiState::Inactive, None, None),
        (PendingOutcome::Init, HostNotification::Except(f)) => {
            settled(MiState::Except, Some(f.message), None)
        }

        (PendingOutcome::Active, HostNotification::Return) => settled(MiState::Active, None, None),
        (PendingOutcome::Active, HostNotification::Except(f)) => {
            settled(MiState::Except, Some(f.message), Some(Frame::Except))
        }

        (PendingOutcome::Recv, HostNotification::Return) => settled(MiState::Active, None, None),
        (PendingOutcome::Recv, HostNotification::Reject(message)) => Completion::Continue(
            Callback::OnInactive,
            CallbackArgs::None,
            PendingOutcome::Teardown {
                target: TeardownTarget::Reject,
                fail_message: Some(message),
            },
        ),
        (PendingOutcome::Recv, HostNotification::Except(f)) => {
            settled(MiState::Except, Some(f.message), Some(Frame::Except))
        }

        (PendingOutcome::Teardown { target, fail_message }, HostNotification::Return) => {
            let send = match target {
                TeardownTarget::Reject => {
                    Some(Frame::Reject(fail_message.clone().unwrap_or_default()))
                }
                _ => None,
            };
            let landed_fail_message = match target {
                TeardownTarget::Reject | TeardownTarget::PeerReject | TeardownTarget::PeerExcept => {
                    fail_message.clone()
                }
                TeardownTarget::Inactive => None,
            };
            settled(target.landing_state(), landed_fail_message, send)
        }
        (PendingOutcome::Teardown { .. }, HostNotification::Except(f)) => {
            settled(MiState::Except, Some(f.message), Some(Frame::Except))
        }

        (outcome, notification) => unreachable!(
            "host contract violated: {:?} does not accept notification {:?}",
            outcome, notification
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_trait::ModuleFailure;
    use crate::errors::ExceptKind;

    fn except(message: &str) -> ModuleFailure {
        ModuleFailure {
            kind: ExceptKind::ModuleError,
            message: message.to_owned(),
            trace: None,
        }
    }

    #[test]
    fn inactive_activates_on_peer_match() {
        let reaction = react(MiState::Inactive, &Event::PeerMatchAppears);
        assert_eq!(
            reaction,
            Reaction::Dispatch(Callback::OnActive, CallbackArgs::None, PendingOutcome::Active)
        );
    }

    #[test]
    fn active_data_frame_dispatches_recv() {
        let reaction = react(MiState::Active, &Event::Frame(Frame::Data(vec![1, 2, 3])));
        assert_eq!(
            reaction,
            Reaction::Dispatch(
                Callback::OnRecv,
                CallbackArgs::Payload(vec![1, 2, 3]),
                PendingOutcome::Recv
            )
        );
    }

    #[test]
    fn inactive_data_frame_is_dropped() {
        assert_eq!(
            react(MiState::Inactive, &Event::Frame(Frame::Data(vec![1]))),
            Reaction::Drop
        );
    }

    #[test]
    fn recv_reject_continues_into_teardown_then_sends_reject_frame() {
        let continuation = complete(&PendingOutcome::Recv, HostNotification::Reject("bad".to_owned()));
        let outcome = match continuation {
            Completion::Continue(Callback::OnInactive, CallbackArgs::None, outcome) => outcome,
            other => panic!("expected a teardown continuation, got {:?}", other),
        };
        let settled = complete(&outcome, HostNotification::Return);
        assert_eq!(
            settled,
            Completion::Settled {
                new_state: MiState::Reject,
                fail_message: Some("bad".to_owned()),
                send: Some(Frame::Reject("bad".to_owned())),
            }
        );
    }

    #[test]
    fn teardown_raising_lands_in_except_regardless_of_target() {
        let outcome = PendingOutcome::Teardown {
            target: TeardownTarget::PeerReject,
            fail_message: Some("peer said so".to_owned()),
        };
        let settled = complete(&outcome, HostNotification::Except(except("boom")));
        assert_eq!(
            settled,
            Completion::Settled {
                new_state: MiState::Except,
                fail_message: Some("boom".to_owned()),
                send: Some(Frame::Except),
            }
        );
    }

    #[test]
    fn peer_except_frame_tears_down_to_peer_except() {
        let reaction = react(MiState::Active, &Event::Frame(Frame::Except));
        let outcome = match reaction {
            Reaction::Dispatch(Callback::OnInactive, CallbackArgs::None, outcome) => outcome,
            other => panic!("expected a teardown dispatch, got {:?}", other),
        };
        let settled = complete(&outcome, HostNotification::Return);
        assert_eq!(
            settled,
            Completion::Settled {
                new_state: MiState::PeerExcept,
                fail_message: Some("peer raised EXCEPT".to_owned()),
                send: None,
            }
        );
    }

    #[test]
    fn failure_states_resolve_to_inactive_on_peer_removed() {
        assert_eq!(
            react(MiState::Reject, &Event::PeerRemoved),
            Reaction::Transition(MiState::Inactive)
        );
        assert_eq!(
            react(MiState::PeerReject, &Event::PeerRemoved),
            Reaction::Transition(MiState::Inactive)
        );
        assert_eq!(
            react(MiState::PeerExcept, &Event::PeerRemoved),
            Reaction::Transition(MiState::Inactive)
        );
    }

    #[test]
    fn except_stays_except_on_peer_removed() {
        assert_eq!(
            react(MiState::Except, &Event::PeerRemoved),
            Reaction::Transition(MiState::Except)
        );
    }
}
