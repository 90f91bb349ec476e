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

//! Local Manager (component E): the façade owning the module instance
//! table and the single-threaded cooperative loop that drives it. This is
//! the one entity the daemon's entry point constructs and owns explicitly
//! (design note: "Global state" — no process-wide singleton).

use crate::config::ConfigProvider;
use crate::errors::ManagerError;
use crate::fsm::{self, Completion, Event, PendingOutcome, Reaction};
#[cfg(unix)]
use crate::host::in_process::DropCredentials;
use crate::host::in_process::InProcessHost;
use crate::host::subprocess::SubprocessHost;
use crate::host::{CallbackArgs, HostNotification, InvokeOutcome, ModuleHost};
use crate::instance::{Callback, InstanceId, ModuleInstance};
use crate::loopback::LoopbackQueue;
use crate::model::{ModuleClaim, ModuleScope, PeerName, SysInfo, UserName};
use crate::module_trait::ModuleRegistry;
use crate::reconciler;
use crate::state::{MiState, WorkState};
use crate::transport::{Frame, PeerMessage, PeerTransport};
use crate::users::UserDirectory;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tempfile::TempDir;

/// Spawns the child process for a `standalone` catalogue entry. Separate
/// from `ModuleRegistry` (which only ever builds in-process modules):
/// nothing about "how to exec a module's binary" is part of the module
/// contract itself.
pub trait StandaloneLauncher {
    fn spawn(&self, id: &InstanceId) -> std::io::Result<SubprocessHost>;
}

/// The set of external collaborators `LocalManager::new` wires together;
/// grouped so call sites don't carry five positional `Box<dyn _>` arguments.
pub struct Collaborators {
    pub transport: Box<dyn PeerTransport>,
    pub config: Box<dyn ConfigProvider>,
    pub users: Box<dyn UserDirectory>,
    pub registry: ModuleRegistry,
    pub standalone: Box<dyn StandaloneLauncher>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish()
    }
}

/// A deferred unit of work on the cooperative loop: either dispatching a
/// callback, or replaying a loopback frame. Nothing on this queue runs on
/// the caller's stack (rule 1 / §4.F).
enum DeferredTask {
    Dispatch(InstanceId, Callback, CallbackArgs),
    Loopback(PeerMessage),
}

/// The per-host supervisor. Owns every `ModuleInstance`, the deferred task
/// queue, and the collaborators it was built with.
pub struct LocalManager {
    local_peer_name: PeerName,
    instances: HashMap<InstanceId, ModuleInstance>,
    pending_outcomes: HashMap<InstanceId, PendingOutcome>,
    deferred: VecDeque<DeferredTask>,
    loopback: LoopbackQueue,
    tmp_root: TempDir,
    work_state_observer: Option<Box<dyn FnMut(WorkState)>>,
    aggregate_work_state: WorkState,
    disposed: bool,
    collaborators: Collaborators,
}

impl std::fmt::Debug for LocalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalManager")
            .field("local_peer_name", &self.local_peer_name)
            .field("instance_count", &self.instances.len())
            .field("aggregate_work_state", &self.aggregate_work_state)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl LocalManager {
    /// Construct a manager against `collaborators`, with per-instance
    /// scoped workspaces rooted at a freshly created temporary directory
    /// under `tmp_parent` (created here if absent). The root is a real
    /// `tempfile::TempDir`: it is removed automatically, unconditionally,
    /// the moment the manager is dropped (§6's "unconditionally removed on
    /// shutdown", for free via RAII rather than a hand-rolled teardown
    /// step). Does not build any module instances yet; call `init()` for
    /// that.
    pub fn new(collaborators: Collaborators, tmp_parent: PathBuf) -> Result<LocalManager, ManagerError> {
        std::fs::create_dir_all(&tmp_parent).map_err(ManagerError::Workspace)?;
        let tmp_root = tempfile::Builder::new()
            .prefix("overlayd-")
            .tempdir_in(&tmp_parent)
            .map_err(ManagerError::Workspace)?;
        let local_peer_name = collaborators.config.local_peer_name().clone();
        Ok(LocalManager {
            local_peer_name,
            instances: HashMap::new(),
            pending_outcomes: HashMap::new(),
            deferred: VecDeque::new(),
            loopback: LoopbackQueue::new(),
            tmp_root,
            work_state_observer: None,
            aggregate_work_state: WorkState::Idle,
            disposed: false,
            collaborators,
        })
    }

    /// Register a callback invoked whenever `getWorkState()`'s aggregate
    /// value changes (S6).
    pub fn set_work_state_observer(&mut self, observer: Box<dyn FnMut(WorkState)>) {
        self.work_state_observer = Some(observer);
    }

    /// Build every module instance local configuration permits, dispatch
    /// `onInit` on each, and schedule the self-roster event so local-peer
    /// instances can subsequently activate. Returns once every `onInit`
    /// has been dispatched — not necessarily completed (§4.E).
    pub fn init(&mut self) -> Result<(), ManagerError> {
        let eligible_users = self.eligible_users();
        let peers: Vec<PeerName> = self.collaborators.config.peers().to_vec();
        let catalogue = self.collaborators.config.catalogue().to_vec();

        for peer_name in &peers {
            for entry in &catalogue {
                let is_self = *peer_name == self.local_peer_name;
                if is_self && !entry.props.allow_local_peer {
                    continue;
                }
                match entry.scope {
                    ModuleScope::Sys => {
                        self.create_instance(peer_name.clone(), None, entry)?;
                    }
                    ModuleScope::Usr => {
                        for user in &eligible_users {
                            self.create_instance(peer_name.clone(), Some(user.clone()), entry)?;
                        }
                    }
                }
            }
        }

        for id in self.instances.keys().cloned().collect::<Vec<_>>() {
            self.dispatch(id, Callback::OnInit, CallbackArgs::None, PendingOutcome::Init);
        }
        self.run_deferred();

        let local_info = self.get_local_info();
        self.on_peer_change(self.local_peer_name.clone(), local_info);
        Ok(())
    }

    fn eligible_users(&self) -> Vec<UserName> {
        let blacklist = self.collaborators.config.user_blacklist();
        self.collaborators
            .users
            .users()
            .into_iter()
            .filter(|u| !blacklist.contains(u))
            .collect()
    }

    /// Resolve `user`'s real uid/gid so an in-process host can drop to it
    /// for every callback (§4.B's user-identity adoption). `None` means
    /// the collaborator couldn't resolve a real account for this name, in
    /// which case the callback runs under the manager's own credentials.
    #[cfg(unix)]
    fn resolve_credentials(&self, user: &UserName) -> Option<DropCredentials> {
        self.collaborators
            .users
            .resolve_uid_gid(user)
            .map(|(uid, gid)| DropCredentials::new(uid, gid))
    }

    #[cfg(not(unix))]
    fn resolve_credentials(&self, _user: &UserName) -> Option<crate::host::in_process::DropCredentials> {
        None
    }

    fn create_instance(
        &mut self,
        peer_name: PeerName,
        user_name: Option<UserName>,
        entry: &crate::model::ModuleCatalogEntry,
    ) -> Result<(), ManagerError> {
        let id = InstanceId {
            peer_name,
            user_name,
            module_name: entry.module_name.clone(),
        };
        if self.instances.contains_key(&id) {
            return Err(ManagerError::DuplicateInstance(id));
        }
        let tmp_dir = self.tmp_root.path().join(instance_dir_name(&id));
        std::fs::create_dir_all(&tmp_dir).map_err(ManagerError::Workspace)?;

        let host: Box<dyn ModuleHost> = if entry.props.standalone {
            Box::new(
                self.collaborators
                    .standalone
                    .spawn(&id)
                    .map_err(ManagerError::StandaloneSpawn)?,
            )
        } else {
            let factory = self
                .collaborators
                .registry
                .factory_for(&entry.module_name)
                .ok_or_else(|| ManagerError::UnregisteredModuleClass(entry.module_name.clone()))?;
            let module = factory.spawn(&id);
            let credentials = id.user_name.as_ref().and_then(|user| self.resolve_credentials(user));
            Box::new(InProcessHost::new(module, id.clone(), tmp_dir.clone(), credentials))
        };

        self.instances
            .insert(id.clone(), ModuleInstance::new(id, host, tmp_dir));
        Ok(())
    }

    /// `dispose()`: force every self-peer instance to peer-removed, run the
    /// loop to quiescence, then assert every instance landed in `INACTIVE`
    /// or `EXCEPT` (I6). Callers must not invoke other methods afterwards;
    /// dropping the manager once this returns unconditionally removes the
    /// scoped workspace root (`tmp_root`'s `TempDir` `Drop` impl).
    pub fn dispose(&mut self) -> Result<(), ManagerError> {
        self.on_peer_remove(self.local_peer_name.clone());
        self.run_deferred();
        for instance in self.instances.values() {
            if !instance.state().is_dispose_safe() {
                return Err(ManagerError::DisposeInvariantViolated(
                    instance.identity().clone(),
                    instance.state(),
                ));
            }
        }
        self.disposed = true;
        Ok(())
    }

    /// This host's self-description: blacklist applied, user-scoped
    /// entries expanded per eligible user.
    pub fn get_local_info(&self) -> SysInfo {
        let users: HashSet<UserName> = self.eligible_users().into_iter().collect();
        let modules = self
            .collaborators
            .config
            .catalogue()
            .iter()
            .flat_map(|entry| -> Vec<(crate::model::ModuleName, Option<UserName>)> {
                match entry.scope {
                    ModuleScope::Sys => vec![(entry.module_name.clone(), None)],
                    ModuleScope::Usr => users
                        .iter()
                        .map(|u| (entry.module_name.clone(), Some(u.clone())))
                        .collect(),
                }
            })
            .collect();
        SysInfo { users, modules }
    }

    /// Aggregate work indicator: `WORKING` iff any instance reports
    /// `WORKING`.
    pub fn get_work_state(&self) -> WorkState {
        self.aggregate_work_state
    }

    /// Every owned instance's identity triple.
    pub fn get_module_keys(&self) -> Vec<InstanceId> {
        self.instances.keys().cloned().collect()
    }

    /// `(state, failMessage)` for one instance.
    pub fn get_module_state(&self, id: &InstanceId) -> Option<(MiState, Option<String>)> {
        self.instances
            .get(id)
            .map(|i| (i.state(), i.fail_message().map(str::to_owned)))
    }

    /// A peer's advertisement changed (including first contact).
    pub fn on_peer_change(&mut self, peer_name: PeerName, advertisement: SysInfo) {
        self.reconcile(&peer_name, &advertisement, false);
    }

    /// A peer left the federation.
    pub fn on_peer_remove(&mut self, peer_name: PeerName) {
        self.reconcile(&peer_name, &SysInfo::empty(), true);
    }

    fn reconcile(&mut self, peer_name: &PeerName, advertisement: &SysInfo, is_removal: bool) {
        let claims: HashSet<ModuleClaim> = reconciler::mapped_claims(advertisement);
        let ids: Vec<InstanceId> = self
            .instances
            .keys()
            .filter(|id| id.peer_name == *peer_name)
            .cloned()
            .collect();
        for id in ids {
            let matches = reconciler::instance_matches(&id, &claims);
            let state = self.instances[&id].state();
            if let Some(event) = reconciler::reconcile_one(state, matches, is_removal) {
                self.feed_event(id, event);
            }
        }
    }

    /// An inbound frame arrived from `peer_name`, originating from the
    /// peer's module `src_module_name` (already mapped to the local name
    /// per §3, by the caller — the transport boundary, not this method).
    pub fn on_peer_frame(
        &mut self,
        peer_name: PeerName,
        user_name: Option<UserName>,
        local_module_name: crate::model::ModuleName,
        frame: Frame,
    ) {
        let id = InstanceId {
            peer_name,
            user_name,
            module_name: local_module_name,
        };
        if !self.instances.contains_key(&id) {
            return;
        }
        self.feed_event(id, Event::Frame(frame));
    }

    /// Feed `event` to instance `id`: queue it if a callback is already in
    /// flight (rule 1), otherwise react immediately.
    fn feed_event(&mut self, id: InstanceId, event: Event) {
        let instance = match self.instances.get_mut(&id) {
            Some(i) => i,
            None => return,
        };
        if instance.pending().is_some() {
            instance.queue_event(event);
            return;
        }
        self.apply_event(id, event);
    }

    fn apply_event(&mut self, id: InstanceId, event: Event) {
        let state = match self.instances.get(&id) {
            Some(i) => i.state(),
            None => return,
        };
        match fsm::react(state, &event) {
            Reaction::Dispatch(callback, args, outcome) => {
                self.dispatch(id, callback, args, outcome);
            }
            Reaction::Transition(new_state) => {
                self.set_state(&id, new_state, None);
                self.drain_queue(id);
            }
            Reaction::Drop => {}
        }
    }

    fn dispatch(&mut self, id: InstanceId, callback: Callback, args: CallbackArgs, outcome: PendingOutcome) {
        if let Some(instance) = self.instances.get_mut(&id) {
            instance.set_pending(Some(callback));
        }
        self.pending_outcomes.insert(id.clone(), outcome);
        self.deferred.push_back(DeferredTask::Dispatch(id, callback, args));
    }

    /// Run the deferred queue (callback dispatches and loopback replays)
    /// to quiescence. Each task may enqueue more tasks (a completed
    /// callback may trigger another `onInactive`, or surface a loopback
    /// send); the loop continues until nothing is left.
    fn run_deferred(&mut self) {
        loop {
            self.drain_loopback();
            let task = match self.deferred.pop_front() {
                Some(t) => t,
                None => break,
            };
            match task {
                DeferredTask::Dispatch(id, callback, args) => self.run_callback(id, callback, args),
                DeferredTask::Loopback(message) => self.deliver(message),
            }
        }
    }

    fn drain_loopback(&mut self) {
        for message in self.loopback.drain() {
            self.deferred.push_back(DeferredTask::Loopback(message));
        }
    }

    fn run_callback(&mut self, id: InstanceId, callback: Callback, args: CallbackArgs) {
        let outcome = match self.pending_outcomes.remove(&id) {
            Some(o) => o,
            None => return,
        };
        let instance = match self.instances.get_mut(&id) {
            Some(i) => i,
            None => return,
        };
        let invoke_outcome = instance.host_mut().invoke(callback, args);
        let drained = instance.host_mut().drain_notifications();
        let terminal_from_drain = self.apply_side_effects(&id, drained);

        match invoke_outcome {
            InvokeOutcome::Completed(notification) => {
                self.settle(id, outcome, notification);
            }
            InvokeOutcome::Pending => match terminal_from_drain {
                // A subprocess host can race its own async reply ahead of
                // this drain (e.g. a near-instant child response); treat it
                // exactly as if `invoke` itself had returned `Completed`.
                Some(notification) => self.settle(id, outcome, notification),
                None => {
                    self.pending_outcomes.insert(id, outcome);
                }
            },
        }
    }

    /// Poll every instance whose host may have asynchronous notifications
    /// waiting (subprocess hosts). Call once per loop tick from the
    /// daemon's entry point.
    pub fn poll(&mut self) {
        let ids: Vec<InstanceId> = self.instances.keys().cloned().collect();
        for id in ids {
            let has_pending_callback = self.instances.get(&id).map_or(false, |i| i.pending().is_some());
            if !has_pending_callback {
                continue;
            }
            let notifications = match self.instances.get_mut(&id) {
                Some(i) => i.host_mut().drain_notifications(),
                None => continue,
            };
            if let Some(notification) = self.apply_side_effects(&id, notifications) {
                if let Some(outcome) = self.pending_outcomes.remove(&id) {
                    self.settle(id, outcome, notification);
                }
            }
        }
        self.run_deferred();
    }

    /// Route every queued `Send`/`WorkState` notification to its effect;
    /// return the first terminal (`Return`/`Reject`/`Except`) notification
    /// found, if any. A host contract-compliant drain carries at most one.
    fn apply_side_effects(&mut self, id: &InstanceId, notifications: Vec<HostNotification>) -> Option<HostNotification> {
        let mut terminal = None;
        for effect in notifications {
            match effect {
                HostNotification::Send(message) => self.send_or_loopback(message),
                HostNotification::WorkState(work_state) => self.set_work_state(id, work_state),
                terminal_notification => terminal = Some(terminal_notification),
            }
        }
        terminal
    }

    fn set_work_state(&mut self, id: &InstanceId, work_state: WorkState) {
        if let Some(instance) = self.instances.get_mut(id) {
            instance.set_work_state(work_state);
        }
        let aggregate = if self
            .instances
            .values()
            .any(|i| i.work_state() == WorkState::Working)
        {
            WorkState::Working
        } else {
            WorkState::Idle
        };
        if aggregate != self.aggregate_work_state {
            self.aggregate_work_state = aggregate;
            if let Some(observer) = self.work_state_observer.as_mut() {
                observer(aggregate);
            }
        }
    }

    /// Settle the instance's callback completion: may need to dispatch a
    /// further callback (`Completion::Continue`, e.g. `onInactive` after a
    /// cooperative reject) before landing in a new state. `notification`
    /// must be `Return`/`Reject`/`Except` — `Send`/`WorkState` are routed
    /// through `apply_side_effects` and never reach here.
    fn settle(&mut self, id: InstanceId, outcome: PendingOutcome, notification: HostNotification) {
        match fsm::complete(&outcome, notification) {
            Completion::Settled {
                new_state,
                fail_message,
                send,
            } => {
                self.set_state(&id, new_state, fail_message);
                if let Some(frame) = send {
                    self.send_or_loopback(PeerMessage {
                        peer_name: id.peer_name.clone(),
                        user_name: id.user_name.clone(),
                        module_name: id.module_name.clone(),
                        frame,
                    });
                }
                if let Some(instance) = self.instances.get_mut(&id) {
                    instance.set_pending(None);
                }
                self.drain_queue(id);
            }
            Completion::Continue(callback, args, outcome) => {
                self.dispatch(id, callback, args, outcome);
            }
        }
    }

    fn set_state(&mut self, id: &InstanceId, new_state: MiState, fail_message: Option<String>) {
        if let Some(instance) = self.instances.get_mut(id) {
            instance.set_state(new_state, fail_message);
            debug!("{:?} -> {:?}", instance.identity(), new_state);
        }
    }

    fn drain_queue(&mut self, id: InstanceId) {
        let queued = match self.instances.get_mut(&id) {
            Some(i) => i.drain_queued_events(),
            None => return,
        };
        for event in queued {
            if self.instances.get(&id).and_then(|i| i.pending()).is_some() {
                if let Some(instance) = self.instances.get_mut(&id) {
                    instance.queue_event(event);
                }
                continue;
            }
            self.apply_event(id.clone(), event);
        }
    }

    /// `sendData`: a module sent `payload` to its own peer counterpart.
    /// Routed via the transport, unless the destination is this same
    /// host, in which case it is deferred through the loopback queue
    /// (§4.F) rather than ever running synchronously.
    fn send_or_loopback(&mut self, message: PeerMessage) {
        if message.peer_name == self.local_peer_name {
            self.loopback.push(message);
        } else if let Err(e) = self.collaborators.transport.send(message) {
            error!("transport failed to deliver outbound frame: {}", e);
        }
    }

    fn deliver(&mut self, message: PeerMessage) {
        let mapped_module_name = match message.module_name.flip_role() {
            Ok(name) => name,
            Err(_) => return,
        };
        self.on_peer_frame(message.peer_name, message.user_name, mapped_module_name, message.frame);
    }
}

fn instance_dir_name(id: &InstanceId) -> String {
    match &id.user_name {
        Some(user) => format!("{}__{}__{}", id.peer_name.0, user.0, id.module_name.0),
        None => format!("{}__{}", id.peer_name.0, id.module_name.0),
    }
}
