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

//! The in-process hosting strategy: the module runs in the manager's own
//! address space. Callbacks complete synchronously from `invoke`; isolation
//! is limited to a caught panic and, on Unix, a per-callback uid/gid drop.

use super::{CallbackArgs, HostNotification, InvokeOutcome, ModuleHost};
use crate::errors::ExceptKind;
use crate::instance::{Callback, InstanceId};
use crate::module_trait::{Module, ModuleCtx, ModuleFailure, RecvFailure};
use crate::state::WorkState;
use crate::transport::{Frame, PeerMessage};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// The real uid/gid an in-process callback should run as, dropped from the
/// manager's own (typically root) credentials before the callback runs and
/// restored immediately after. `None` means no drop is performed.
#[derive(Debug, Clone, Copy)]
pub struct DropCredentials {
    #[cfg(unix)]
    pub uid: nix::unistd::Uid,
    #[cfg(unix)]
    pub gid: nix::unistd::Gid,
}

impl DropCredentials {
    /// Credentials for a given numeric uid/gid pair.
    #[cfg(unix)]
    pub fn new(uid: u32, gid: u32) -> DropCredentials {
        DropCredentials {
            uid: nix::unistd::Uid::from_raw(uid),
            gid: nix::unistd::Gid::from_raw(gid),
        }
    }
}

#[cfg(unix)]
fn with_dropped_privileges<F, T>(creds: Option<&DropCredentials>, f: F) -> T
where
    F: FnOnce() -> T,
{
    use nix::unistd::{getegid, geteuid, setegid, seteuid};

    let creds = match creds {
        Some(c) => c,
        None => return f(),
    };
    let saved_uid = geteuid();
    let saved_gid = getegid();
    // Drop group before user: once the effective uid is non-root the
    // process typically loses permission to change its gid.
    if let Err(e) = setegid(creds.gid) {
        warn!("failed to drop effective gid to {}: {}", creds.gid, e);
    }
    if let Err(e) = seteuid(creds.uid) {
        warn!("failed to drop effective uid to {}: {}", creds.uid, e);
    }
    let result = f();
    if let Err(e) = seteuid(saved_uid) {
        warn!("failed to restore effective uid to {}: {}", saved_uid, e);
    }
    if let Err(e) = setegid(saved_gid) {
        warn!("failed to restore effective gid to {}: {}", saved_gid, e);
    }
    result
}

#[cfg(not(unix))]
fn with_dropped_privileges<F, T>(_creds: Option<&DropCredentials>, f: F) -> T
where
    F: FnOnce() -> T,
{
    f()
}

fn wipe_tmp_dir(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("could not read scoped workspace {:?} to wipe it: {}", dir, e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = result {
            warn!("failed to remove {:?} while wiping scoped workspace: {}", path, e);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "module panicked with a non-string payload".to_owned()
    }
}

/// Context handed to an in-process module's callbacks. `send_data` and
/// `set_work_state` queue a `HostNotification` onto the host's shared
/// side-effect queue rather than acting immediately — the callback is
/// still running, and the manager only inspects these once `invoke`
/// returns, via `drain_notifications`.
pub struct InProcessCtx {
    id: InstanceId,
    tmp_dir: PathBuf,
    side_effects: Rc<RefCell<VecDeque<HostNotification>>>,
}

impl InProcessCtx {
    pub fn new(
        id: InstanceId,
        tmp_dir: PathBuf,
        side_effects: Rc<RefCell<VecDeque<HostNotification>>>,
    ) -> InProcessCtx {
        InProcessCtx {
            id,
            tmp_dir,
            side_effects,
        }
    }
}

impl std::fmt::Debug for InProcessCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessCtx")
            .field("id", &self.id)
            .field("tmp_dir", &self.tmp_dir)
            .finish()
    }
}

impl ModuleCtx for InProcessCtx {
    fn identity(&self) -> &InstanceId {
        &self.id
    }

    fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    fn send_data(&self, payload: Vec<u8>) {
        let message = PeerMessage {
            peer_name: self.id.peer_name.clone(),
            user_name: self.id.user_name.clone(),
            module_name: self.id.module_name.clone(),
            frame: Frame::Data(payload),
        };
        self.side_effects
            .borrow_mut()
            .push_back(HostNotification::Send(message));
    }

    fn set_work_state(&self, work_state: WorkState) {
        self.side_effects
            .borrow_mut()
            .push_back(HostNotification::WorkState(work_state));
    }
}

/// Isolation by in-process hosting: same address space, a caught panic, and
/// (on Unix) a dropped effective uid/gid for the duration of each callback.
pub struct InProcessHost {
    module: Box<dyn Module>,
    ctx: InProcessCtx,
    side_effects: Rc<RefCell<VecDeque<HostNotification>>>,
    credentials: Option<DropCredentials>,
    inert: bool,
}

impl std::fmt::Debug for InProcessHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessHost")
            .field("ctx", &self.ctx)
            .field("inert", &self.inert)
            .finish()
    }
}

impl InProcessHost {
    /// Build a host for `module`, identified by `id` and scoped to
    /// `tmp_dir`. Returns the host together with the `ModuleCtx` its
    /// callbacks will be invoked with — the caller constructs both
    /// together so the side-effect queue is shared between them.
    pub fn new(
        module: Box<dyn Module>,
        id: InstanceId,
        tmp_dir: PathBuf,
        credentials: Option<DropCredentials>,
    ) -> InProcessHost {
        let side_effects = Rc::new(RefCell::new(VecDeque::new()));
        let ctx = InProcessCtx::new(id, tmp_dir, side_effects.clone());
        InProcessHost {
            module,
            ctx,
            side_effects,
            credentials,
            inert: false,
        }
    }

    fn run<F>(&mut self, f: F) -> Result<(), ModuleFailure>
    where
        F: FnOnce(&mut dyn Module, &dyn ModuleCtx) -> Result<(), ModuleFailure>,
    {
        let module = &mut self.module;
        let ctx = &self.ctx;
        let outcome = with_dropped_privileges(self.credentials.as_ref(), || {
            panic::catch_unwind(AssertUnwindSafe(|| f(module.as_mut(), ctx)))
        });
        wipe_tmp_dir(&self.ctx.tmp_dir);
        match outcome {
            Ok(result) => result,
            Err(payload) => Err(ModuleFailure {
                kind: ExceptKind::Panicked,
                message: panic_message(&*payload),
                trace: None,
            }),
        }
    }

    fn run_recv(&mut self, payload: Vec<u8>) -> Result<(), RecvFailure> {
        let module = &mut self.module;
        let ctx = &self.ctx;
        let outcome = with_dropped_privileges(self.credentials.as_ref(), || {
            panic::catch_unwind(AssertUnwindSafe(|| module.on_recv(ctx, payload)))
        });
        wipe_tmp_dir(&self.ctx.tmp_dir);
        match outcome {
            Ok(result) => result,
            Err(payload) => Err(RecvFailure::Except(ModuleFailure {
                kind: ExceptKind::Panicked,
                message: panic_message(&*payload),
                trace: None,
            })),
        }
    }

    fn complete(&mut self, result: Result<(), ModuleFailure>) -> InvokeOutcome {
        match result {
            Ok(()) => InvokeOutcome::Completed(HostNotification::Return),
            Err(failure) => {
                self.inert = true;
                InvokeOutcome::Completed(HostNotification::Except(failure))
            }
        }
    }
}

impl ModuleHost for InProcessHost {
    fn invoke(&mut self, callback: Callback, args: CallbackArgs) -> InvokeOutcome {
        debug_assert!(!self.inert, "invoke() called on an inert host");
        match (callback, args) {
            (Callback::OnInit, CallbackArgs::None) => {
                let result = self.run(|m, ctx| m.on_init(ctx));
                self.complete(result)
            }
            (Callback::OnActive, CallbackArgs::None) => {
                let result = self.run(|m, ctx| m.on_active(ctx));
                self.complete(result)
            }
            (Callback::OnInactive, CallbackArgs::None) => {
                let result = self.run(|m, ctx| m.on_inactive(ctx));
                self.complete(result)
            }
            (Callback::OnRecv, CallbackArgs::Payload(payload)) => match self.run_recv(payload) {
                Ok(()) => InvokeOutcome::Completed(HostNotification::Return),
                Err(RecvFailure::Reject(message)) => {
                    InvokeOutcome::Completed(HostNotification::Reject(message))
                }
                Err(RecvFailure::Except(failure)) => {
                    self.inert = true;
                    InvokeOutcome::Completed(HostNotification::Except(failure))
                }
            },
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
        self.side_effects.borrow_mut().drain(..).collect()
    }

    fn is_inert(&self) -> bool {
        self.inert
    }
}
