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

//! The subprocess hosting strategy: a `standalone` module runs as a
//! separate child process, talked to over a framed pipe (`wire`). A reader
//! thread turns the child's `stdout` into `HostNotification`s delivered
//! through an `mpsc` channel; an unexpected exit or pipe close is reported
//! as `EXCEPT` with `ExceptKind::Crashed`, exactly like any other module
//! failure (§4.B).

use super::wire::{read_frame, write_frame, ChildToParent, ParentToChild};
use super::{CallbackArgs, HostNotification, InvokeOutcome, ModuleHost};
use crate::errors::ExceptKind;
use crate::instance::Callback;
use crate::model::{ModuleName, PeerName, UserName};
use crate::module_trait::ModuleFailure;
use crate::state::WorkState;
use crate::transport::{Frame, PeerMessage};
use std::io::BufReader;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;

fn except_crashed(message: impl Into<String>) -> ModuleFailure {
    ModuleFailure {
        kind: ExceptKind::Crashed,
        message: message.into(),
        trace: None,
    }
}

fn reader_loop(stdout: std::process::ChildStdout, tx: mpsc::Sender<HostNotification>) {
    let mut reader = BufReader::new(stdout);
    loop {
        match read_frame::<_, ChildToParent>(&mut reader) {
            Ok(ChildToParent::Return) => {
                if tx.send(HostNotification::Return).is_err() {
                    return;
                }
            }
            Ok(ChildToParent::Reject { message }) => {
                if tx.send(HostNotification::Reject(message)).is_err() {
                    return;
                }
            }
            Ok(ChildToParent::WorkState { working }) => {
                let work_state = if working { WorkState::Working } else { WorkState::Idle };
                if tx.send(HostNotification::WorkState(work_state)).is_err() {
                    return;
                }
            }
            Ok(ChildToParent::Except { message, trace }) => {
                let failure = ModuleFailure {
                    kind: ExceptKind::ModuleError,
                    message,
                    trace,
                };
                let _ = tx.send(HostNotification::Except(failure));
                return;
            }
            Ok(ChildToParent::Send {
                peer,
                user,
                module,
                payload,
            }) => {
                let message = PeerMessage {
                    peer_name: PeerName::from(peer.as_str()),
                    user_name: user.as_deref().map(UserName::from),
                    module_name: ModuleName(module),
                    frame: Frame::Data(payload),
                };
                if tx.send(HostNotification::Send(message)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let failure = except_crashed(format!("standalone module pipe closed: {}", e));
                let _ = tx.send(HostNotification::Except(failure));
                return;
            }
        }
    }
}

/// A standalone module hosted as a child process, talked to over a framed
/// stdin/stdout pipe.
pub struct SubprocessHost {
    child: Child,
    stdin: ChildStdin,
    notifications: Receiver<HostNotification>,
    inert: bool,
}

impl std::fmt::Debug for SubprocessHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessHost")
            .field("pid", &self.child.id())
            .field("inert", &self.inert)
            .finish()
    }
}

impl SubprocessHost {
    /// Spawn `program` (with `args`) as the child hosting this module
    /// instance, wiring its stdio into the framed protocol and starting the
    /// background reader thread.
    pub fn spawn(program: &str, args: &[String]) -> std::io::Result<SubprocessHost> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("overlayd-standalone-reader".to_owned())
            .spawn(move || reader_loop(stdout, tx))
            .expect("failed to spawn standalone module reader thread");
        Ok(SubprocessHost {
            child,
            stdin,
            notifications: rx,
            inert: false,
        })
    }

    fn send(&mut self, message: ParentToChild) -> InvokeOutcome {
        match write_frame(&mut self.stdin, &message) {
            Ok(()) => InvokeOutcome::Pending,
            Err(e) => {
                self.inert = true;
                InvokeOutcome::Completed(HostNotification::Except(except_crashed(format!(
                    "failed to write to standalone module: {}",
                    e
                ))))
            }
        }
    }
}

impl ModuleHost for SubprocessHost {
    fn invoke(&mut self, callback: Callback, args: CallbackArgs) -> InvokeOutcome {
        debug_assert!(!self.inert, "invoke() called on an inert host");
        match (callback, args) {
            (Callback::OnRecv, CallbackArgs::Payload(payload)) => {
                self.send(ParentToChild::Recv { payload })
            }
            (callback, CallbackArgs::None) => {
                let name = match callback {
                    Callback::OnInit => "on_init",
                    Callback::OnActive => "on_active",
                    Callback::OnInactive => "on_inactive",
                    Callback::OnRecv => unreachable!("handled above"),
                };
                self.send(ParentToChild::Call {
                    callback: name.to_owned(),
                    payload: None,
                })
            }
            (callback, args) => {
                warn!("mismatched callback arguments for {:?}: {:?}", callback, args);
                self.inert = true;
                InvokeOutcome::Completed(HostNotification::Except(ModuleFailure::from_message(
                    "mismatched callback arguments",
                )))
            }
        }
    }

    fn drain_notifications(&mut self) -> Vec<HostNotification> {
        let mut out = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            if let HostNotification::Except(_) = notification {
                self.inert = true;
            }
            out.push(notification);
        }
        out
    }

    fn is_inert(&self) -> bool {
        self.inert
    }
}

impl Drop for SubprocessHost {
    fn drop(&mut self) {
        let _ = write_frame(&mut self.stdin, &ParentToChild::Shutdown);
        if self.child.try_wait().ok().flatten().is_none() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}
