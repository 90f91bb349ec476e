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

//! Black-box scenario tests (S1-S6) driving a real `LocalManager` against
//! in-memory fakes for every collaborator.

use maplit::hashset;
use overlayd_core::config::ConfigProvider;
use overlayd_core::host::in_process::InProcessHost;
use overlayd_core::host::subprocess::SubprocessHost;
use overlayd_core::host::{CallbackArgs, HostNotification, InvokeOutcome, ModuleHost};
use overlayd_core::instance::{Callback, InstanceId};
use overlayd_core::manager::{Collaborators, LocalManager, StandaloneLauncher};
use overlayd_core::model::{
    ModuleCatalogEntry, ModuleClaim, ModuleName, ModuleProps, ModuleRole, ModuleScope, PeerName,
    SysInfo, UserName,
};
use overlayd_core::module_trait::{Module, ModuleCtx, ModuleFactory, ModuleFailure, ModuleRegistry, RecvFailure};
use overlayd_core::state::{MiState, WorkState};
use overlayd_core::transport::{Frame, PeerMessage, PeerTransport};
use overlayd_core::users::StaticUserDirectory;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FakeConfig {
    local_peer_name: PeerName,
    peers: Vec<PeerName>,
    catalogue: Vec<ModuleCatalogEntry>,
    user_blacklist: HashSet<UserName>,
}

impl ConfigProvider for FakeConfig {
    fn local_peer_name(&self) -> &PeerName {
        &self.local_peer_name
    }
    fn peers(&self) -> &[PeerName] {
        &self.peers
    }
    fn catalogue(&self) -> &[ModuleCatalogEntry] {
        &self.catalogue
    }
    fn user_blacklist(&self) -> &HashSet<UserName> {
        &self.user_blacklist
    }
}

fn entry(name: &str, scope: ModuleScope, role: ModuleRole, props: ModuleProps) -> ModuleCatalogEntry {
    ModuleCatalogEntry {
        module_name: ModuleName(name.to_owned()),
        scope,
        role,
        id: "1".to_owned(),
        props,
    }
}

#[derive(Default)]
struct FakeTransport {
    sent: Mutex<Vec<PeerMessage>>,
}

impl PeerTransport for FakeTransport {
    fn send(&self, message: PeerMessage) -> Result<(), String> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Records every callback dispatched to it, keyed by instance identity, and
/// reacts to a handful of magic `on_recv` payloads so scenarios can drive
/// reject/work-state/self-send behaviour without a bespoke `Module` per test.
struct TrackingModule {
    id: InstanceId,
    log: Arc<Mutex<Vec<(InstanceId, &'static str)>>>,
}

impl Module for TrackingModule {
    fn on_init(&mut self, _ctx: &dyn ModuleCtx) -> Result<(), ModuleFailure> {
        self.log.lock().unwrap().push((self.id.clone(), "on_init"));
        Ok(())
    }

    fn on_active(&mut self, _ctx: &dyn ModuleCtx) -> Result<(), ModuleFailure> {
        self.log.lock().unwrap().push((self.id.clone(), "on_active"));
        Ok(())
    }

    fn on_inactive(&mut self, _ctx: &dyn ModuleCtx) -> Result<(), ModuleFailure> {
        self.log.lock().unwrap().push((self.id.clone(), "on_inactive"));
        Ok(())
    }

    fn on_recv(&mut self, ctx: &dyn ModuleCtx, payload: Vec<u8>) -> Result<(), RecvFailure> {
        self.log.lock().unwrap().push((self.id.clone(), "on_recv"));
        match payload.as_slice() {
            b"reject-bad" => Err(RecvFailure::Reject("bad".to_owned())),
            b"loopback" => {
                ctx.send_data(b"loopback-reply".to_vec());
                Ok(())
            }
            b"work" => {
                ctx.set_work_state(WorkState::Working);
                Ok(())
            }
            b"idle" => {
                ctx.set_work_state(WorkState::Idle);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

struct TrackingFactory {
    log: Arc<Mutex<Vec<(InstanceId, &'static str)>>>,
}

impl ModuleFactory for TrackingFactory {
    fn spawn(&self, id: &InstanceId) -> Box<dyn Module> {
        Box::new(TrackingModule {
            id: id.clone(),
            log: self.log.clone(),
        })
    }
}

struct NoStandalone;

impl StandaloneLauncher for NoStandalone {
    fn spawn(&self, _id: &InstanceId) -> std::io::Result<SubprocessHost> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "no standalone modules expected in this scenario",
        ))
    }
}

fn harness_tmp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("overlayd-scenario-{}-{}", name, std::process::id()))
}

fn build_manager(
    config: FakeConfig,
    users: HashSet<UserName>,
    log: Arc<Mutex<Vec<(InstanceId, &'static str)>>>,
    tmp_name: &str,
) -> (LocalManager, Arc<FakeTransport>) {
    let transport = Arc::new(FakeTransport::default());
    let mut registry = ModuleRegistry::new();
    registry.register("test", Box::new(TrackingFactory { log }));

    let collaborators = Collaborators {
        transport: Box::new(ArcTransport(transport.clone())),
        config: Box::new(config),
        users: Box::new(StaticUserDirectory::new(users)),
        registry,
        standalone: Box::new(NoStandalone),
    };
    let manager = LocalManager::new(collaborators, harness_tmp_dir(tmp_name)).expect("manager construction");
    (manager, transport)
}

/// `PeerTransport` requires `Send`; wraps a shared `Arc<FakeTransport>` so
/// the test can keep its own handle to inspect what was sent after the
/// manager (which owns the boxed trait object) is done with it.
struct ArcTransport(Arc<FakeTransport>);

impl PeerTransport for ArcTransport {
    fn send(&self, message: PeerMessage) -> Result<(), String> {
        self.0.send(message)
    }
}

fn alice_sys_info(module: &str, claimed_as: &str) -> SysInfo {
    let mut info = SysInfo::empty();
    info.users.insert(UserName::from("alice"));
    info.modules
        .insert((ModuleName(claimed_as.to_owned()), Some(UserName::from("alice"))));
    let _ = module;
    info
}

#[test]
fn s1_activation() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let config = FakeConfig {
        local_peer_name: PeerName::from("local"),
        peers: vec![PeerName::from("local"), PeerName::from("B")],
        catalogue: vec![entry(
            "test-server-1",
            ModuleScope::Usr,
            ModuleRole::Server,
            ModuleProps::default(),
        )],
        user_blacklist: HashSet::new(),
    };
    let (mut manager, _transport) = build_manager(config, hashset! { UserName::from("alice") }, log.clone(), "s1");
    manager.init().expect("init");

    let id = InstanceId {
        peer_name: PeerName::from("B"),
        user_name: Some(UserName::from("alice")),
        module_name: ModuleName("test-server-1".to_owned()),
    };
    assert_eq!(manager.get_module_state(&id).unwrap().0, MiState::Inactive);

    manager.on_peer_change(PeerName::from("B"), alice_sys_info("test-server-1", "test-client-1"));
    manager.poll();

    assert_eq!(manager.get_module_state(&id).unwrap().0, MiState::Active);
    let entries: Vec<&'static str> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|(i, _)| *i == id)
        .map(|(_, event)| *event)
        .collect();
    assert_eq!(entries, vec!["on_init", "on_active"]);
}

fn activated_manager(log: Arc<Mutex<Vec<(InstanceId, &'static str)>>>, tmp_name: &str) -> (LocalManager, Arc<FakeTransport>, InstanceId) {
    let config = FakeConfig {
        local_peer_name: PeerName::from("local"),
        peers: vec![PeerName::from("local"), PeerName::from("B")],
        catalogue: vec![entry(
            "test-server-1",
            ModuleScope::Usr,
            ModuleRole::Server,
            ModuleProps::default(),
        )],
        user_blacklist: HashSet::new(),
    };
    let (mut manager, transport) = build_manager(config, hashset! { UserName::from("alice") }, log, tmp_name);
    manager.init().expect("init");
    let id = InstanceId {
        peer_name: PeerName::from("B"),
        user_name: Some(UserName::from("alice")),
        module_name: ModuleName("test-server-1".to_owned()),
    };
    manager.on_peer_change(PeerName::from("B"), alice_sys_info("test-server-1", "test-client-1"));
    manager.poll();
    assert_eq!(manager.get_module_state(&id).unwrap().0, MiState::Active);
    (manager, transport, id)
}

#[test]
fn s2_cooperative_reject() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (mut manager, transport, id) = activated_manager(log.clone(), "s2");

    manager.on_peer_frame(
        id.peer_name.clone(),
        id.user_name.clone(),
        id.module_name.clone(),
        Frame::Data(b"reject-bad".to_vec()),
    );
    manager.poll();

    let (state, fail_message) = manager.get_module_state(&id).unwrap();
    assert_eq!(state, MiState::Reject);
    assert_eq!(fail_message.as_deref(), Some("bad"));

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].frame, Frame::Reject("bad".to_owned()));

    let events: Vec<&'static str> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|(i, _)| *i == id)
        .map(|(_, event)| *event)
        .collect();
    assert_eq!(events, vec!["on_init", "on_active", "on_recv", "on_inactive"]);
}

#[test]
fn s3_peer_originated_exception_then_removal_clears_it() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (mut manager, _transport, id) = activated_manager(log, "s3");

    manager.on_peer_frame(id.peer_name.clone(), id.user_name.clone(), id.module_name.clone(), Frame::Except);
    manager.poll();

    let (state, fail_message) = manager.get_module_state(&id).unwrap();
    assert_eq!(state, MiState::PeerExcept);
    assert_eq!(fail_message.as_deref(), Some("peer raised EXCEPT"));

    manager.on_peer_remove(id.peer_name.clone());

    let (state, fail_message) = manager.get_module_state(&id).unwrap();
    assert_eq!(state, MiState::Inactive);
    assert_eq!(fail_message, None);
}

struct CrashingStandalone;

impl StandaloneLauncher for CrashingStandalone {
    fn spawn(&self, _id: &InstanceId) -> std::io::Result<SubprocessHost> {
        let exe = env!("CARGO_BIN_EXE_overlayd-test-standalone-crash");
        SubprocessHost::spawn(exe, &[])
    }
}

#[test]
fn s4_subprocess_crash_surfaces_as_except() {
    let config = FakeConfig {
        local_peer_name: PeerName::from("local"),
        peers: vec![PeerName::from("local"), PeerName::from("B")],
        catalogue: vec![entry(
            "job-server-1",
            ModuleScope::Sys,
            ModuleRole::Server,
            ModuleProps {
                standalone: true,
                allow_local_peer: true,
            },
        )],
        user_blacklist: HashSet::new(),
    };
    let transport = Arc::new(FakeTransport::default());
    let mut registry = ModuleRegistry::new();
    registry.register("test", Box::new(TrackingFactory { log: Arc::new(Mutex::new(Vec::new())) }));
    let collaborators = Collaborators {
        transport: Box::new(ArcTransport(transport.clone())),
        config: Box::new(config),
        users: Box::new(StaticUserDirectory::new(HashSet::new())),
        registry,
        standalone: Box::new(CrashingStandalone),
    };
    let mut manager = LocalManager::new(collaborators, harness_tmp_dir("s4")).expect("manager construction");
    manager.init().expect("init");

    let id = InstanceId {
        peer_name: PeerName::from("B"),
        user_name: None,
        module_name: ModuleName("job-server-1".to_owned()),
    };

    let mut info = SysInfo::empty();
    info.modules.insert((ModuleName("job-client-1".to_owned()), None));
    manager.on_peer_change(PeerName::from("B"), info);
    manager.poll();
    assert_eq!(manager.get_module_state(&id).unwrap().0, MiState::Active);

    manager.on_peer_frame(id.peer_name.clone(), id.user_name.clone(), id.module_name.clone(), Frame::Data(vec![0]));

    let mut settled = false;
    for _ in 0..100 {
        manager.poll();
        if manager.get_module_state(&id).unwrap().0 == MiState::Except {
            settled = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(settled, "expected the crashed standalone module to settle into EXCEPT");

    let sent = transport.sent.lock().unwrap();
    assert!(sent.iter().any(|m| m.frame == Frame::Except));
}

#[test]
fn s5_self_loopback_is_deferred_not_reentrant() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let config = FakeConfig {
        local_peer_name: PeerName::from("local"),
        peers: vec![PeerName::from("local")],
        catalogue: vec![entry(
            "echo-peer-1",
            ModuleScope::Sys,
            ModuleRole::Peer,
            ModuleProps {
                standalone: false,
                allow_local_peer: true,
            },
        )],
        user_blacklist: HashSet::new(),
    };
    let (mut manager, _transport) = build_manager(config, HashSet::new(), log, "s5");
    manager.init().expect("init");

    let id = InstanceId {
        peer_name: PeerName::from("local"),
        user_name: None,
        module_name: ModuleName("echo-peer-1".to_owned()),
    };

    let mut info = SysInfo::empty();
    info.modules.insert((ModuleName("echo-peer-1".to_owned()), None));
    manager.on_peer_change(PeerName::from("local"), info);
    manager.poll();
    assert_eq!(manager.get_module_state(&id).unwrap().0, MiState::Active);

    manager.on_peer_frame(id.peer_name.clone(), id.user_name.clone(), id.module_name.clone(), Frame::Data(b"loopback".to_vec()));
    manager.poll();

    assert_eq!(manager.get_module_state(&id).unwrap().0, MiState::Active);
}

#[test]
fn s6_work_state_aggregates_and_notifies_once_per_transition() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let config = FakeConfig {
        local_peer_name: PeerName::from("local"),
        peers: vec![PeerName::from("local"), PeerName::from("B")],
        catalogue: vec![
            entry("test-server-1", ModuleScope::Sys, ModuleRole::Server, ModuleProps::default()),
            entry("test-server-2", ModuleScope::Sys, ModuleRole::Server, ModuleProps::default()),
        ],
        user_blacklist: HashSet::new(),
    };
    let (mut manager, _transport) = build_manager(config, HashSet::new(), log, "s6");
    manager.init().expect("init");

    let id_1 = InstanceId {
        peer_name: PeerName::from("B"),
        user_name: None,
        module_name: ModuleName("test-server-1".to_owned()),
    };
    let id_2 = InstanceId {
        peer_name: PeerName::from("B"),
        user_name: None,
        module_name: ModuleName("test-server-2".to_owned()),
    };

    let mut info = SysInfo::empty();
    info.modules.insert((ModuleName("test-client-1".to_owned()), None));
    info.modules.insert((ModuleName("test-client-2".to_owned()), None));
    manager.on_peer_change(PeerName::from("B"), info);
    manager.poll();
    assert_eq!(manager.get_module_state(&id_1).unwrap().0, MiState::Active);
    assert_eq!(manager.get_module_state(&id_2).unwrap().0, MiState::Active);
    assert_eq!(manager.get_work_state(), WorkState::Idle);

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let transitions_for_observer = transitions.clone();
    manager.set_work_state_observer(Box::new(move |state| {
        transitions_for_observer.lock().unwrap().push(state);
    }));

    manager.on_peer_frame(id_1.peer_name.clone(), id_1.user_name.clone(), id_1.module_name.clone(), Frame::Data(b"work".to_vec()));
    manager.poll();
    assert_eq!(manager.get_work_state(), WorkState::Working);

    manager.on_peer_frame(id_2.peer_name.clone(), id_2.user_name.clone(), id_2.module_name.clone(), Frame::Data(b"work".to_vec()));
    manager.poll();
    assert_eq!(manager.get_work_state(), WorkState::Working);

    manager.on_peer_frame(id_1.peer_name.clone(), id_1.user_name.clone(), id_1.module_name.clone(), Frame::Data(b"idle".to_vec()));
    manager.poll();
    assert_eq!(manager.get_work_state(), WorkState::Working);

    manager.on_peer_frame(id_2.peer_name.clone(), id_2.user_name.clone(), id_2.module_name.clone(), Frame::Data(b"idle".to_vec()));
    manager.poll();
    assert_eq!(manager.get_work_state(), WorkState::Idle);

    assert_eq!(*transitions.lock().unwrap(), vec![WorkState::Working, WorkState::Idle]);
}
