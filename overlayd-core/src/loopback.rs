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

//! Self-Peer Loopback (component F): when a module instance's peer is this
//! same host, `sendData` must still never deliver synchronously into
//! another instance's callback from the caller's own stack — doing so
//! could re-enter the engine while the sender's callback is still
//! in flight, and would let one instance's callback dispatch observe
//! another's mid-transition state. `LocalManager` pushes self-addressed
//! frames here instead of handing them to the transport, and drains the
//! queue only between deferred-queue ticks, once every in-flight callback
//! of that tick has already been accounted for.

use crate::transport::PeerMessage;
use std::collections::VecDeque;

/// FIFO queue of frames addressed to the local host itself, awaiting
/// redelivery on a later turn of the manager's deferred-task loop.
#[derive(Debug, Default)]
pub struct LoopbackQueue {
    pending: VecDeque<PeerMessage>,
}

impl LoopbackQueue {
    /// An empty queue.
    pub fn new() -> LoopbackQueue {
        LoopbackQueue {
            pending: VecDeque::new(),
        }
    }

    /// Enqueue a self-addressed frame for later redelivery.
    pub fn push(&mut self, message: PeerMessage) {
        self.pending.push_back(message);
    }

    /// Drain every frame currently queued, FIFO. Frames pushed by a
    /// callback that runs as a result of this drain are picked up on the
    /// next call, never this one.
    pub fn drain(&mut self) -> Vec<PeerMessage> {
        self.pending.drain(..).collect()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModuleName, PeerName};
    use crate::transport::Frame;

    fn message(tag: &str) -> PeerMessage {
        PeerMessage {
            peer_name: PeerName::from("this-host"),
            user_name: None,
            module_name: ModuleName(format!("chat-server-{}", tag)),
            frame: Frame::Data(vec![1]),
        }
    }

    #[test]
    fn drains_in_fifo_order() {
        let mut queue = LoopbackQueue::new();
        queue.push(message("1"));
        queue.push(message("2"));
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].module_name.0, "chat-server-1");
        assert_eq!(drained[1].module_name.0, "chat-server-2");
        assert!(queue.is_empty());
    }

    #[test]
    fn a_second_drain_is_empty_until_more_is_pushed() {
        let mut queue = LoopbackQueue::new();
        queue.push(message("1"));
        let _ = queue.drain();
        assert!(queue.drain().is_empty());
    }
}
