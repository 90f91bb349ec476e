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

//! Entry point for the `overlayd` binary.

#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

mod cli;

use cli::{CheckConfOpt, ListModulesOpt, OverlaydCliOpt, OverlaydSubCommand, StartOpt};
use log::{error, info, Level};
use overlayd_core::config::{default_profile_dir, ConfigProvider, EnvOverrides, TomlConfigProvider};
use overlayd_core::host::subprocess::SubprocessHost;
use overlayd_core::instance::InstanceId;
use overlayd_core::manager::{Collaborators, LocalManager, StandaloneLauncher};
use overlayd_core::module_trait::ModuleRegistry;
use overlayd_core::transport::{PeerMessage, PeerTransport};
#[cfg(unix)]
use overlayd_core::users::SystemUserDirectory;
#[cfg(not(unix))]
use overlayd_core::users::StaticUserDirectory;
use std::process;
use std::time::Duration;
use structopt::StructOpt;

/// Spawns a standalone module's child process as `<profile_dir>/modules/<id>`,
/// the simplest convention that needs nothing beyond the identity triple
/// already on hand.
#[derive(Debug)]
struct DirectoryStandaloneLauncher {
    modules_dir: std::path::PathBuf,
}

impl StandaloneLauncher for DirectoryStandaloneLauncher {
    fn spawn(&self, id: &InstanceId) -> std::io::Result<SubprocessHost> {
        let program = self.modules_dir.join(id.module_name.0.clone());
        SubprocessHost::spawn(program.to_string_lossy().as_ref(), &[])
    }
}

/// A `PeerTransport` with nowhere to actually send: the federation's real
/// socket fabric is out of this crate's scope (design note: the core only
/// ever sees already-decoded frames). Until that fabric is wired in, every
/// peer other than the local host is simply unreachable.
#[derive(Debug, Default)]
struct UnwiredTransport;

impl PeerTransport for UnwiredTransport {
    fn send(&self, message: PeerMessage) -> Result<(), String> {
        Err(format!(
            "no peer transport configured; dropped frame addressed to {}",
            message.peer_name
        ))
    }
}

#[cfg(unix)]
fn build_user_directory() -> Box<dyn overlayd_core::users::UserDirectory> {
    Box::new(SystemUserDirectory::default())
}

#[cfg(not(unix))]
fn build_user_directory() -> Box<dyn overlayd_core::users::UserDirectory> {
    Box::new(StaticUserDirectory::default())
}

fn build_collaborators(config: TomlConfigProvider, profile_dir: &std::path::Path) -> Collaborators {
    Collaborators {
        transport: Box::new(UnwiredTransport::default()),
        config: Box::new(config),
        users: build_user_directory(),
        registry: ModuleRegistry::new(),
        standalone: Box::new(DirectoryStandaloneLauncher {
            modules_dir: profile_dir.join("modules"),
        }),
    }
}

fn load_config(profile_dir: &std::path::Path) -> Result<TomlConfigProvider, String> {
    TomlConfigProvider::load(profile_dir).map_err(|e| e.to_string())
}

fn run_start(profile_dir: std::path::PathBuf, opt: StartOpt) -> Result<(), String> {
    let _ = opt;
    let config = load_config(&profile_dir)?;
    info!(
        "starting overlayd as peer '{}' with {} catalogue entries",
        config.local_peer_name(),
        config.catalogue().len()
    );
    let collaborators = build_collaborators(config, &profile_dir);
    let tmp_root = profile_dir.join("tmp");
    let mut manager = LocalManager::new(collaborators, tmp_root).map_err(|e| e.to_string())?;
    manager.init().map_err(|e| e.to_string())?;

    loop {
        manager.poll();
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn run_list_modules(profile_dir: std::path::PathBuf, opt: ListModulesOpt) -> Result<(), String> {
    let _ = opt;
    let config = load_config(&profile_dir)?;
    for entry in config.catalogue() {
        println!(
            "{}\t{:?}\t{:?}\tstandalone={}\tallow-local-peer={}",
            entry.module_name, entry.scope, entry.role, entry.props.standalone, entry.props.allow_local_peer
        );
    }
    Ok(())
}

fn run_check_conf(profile_dir: std::path::PathBuf, opt: CheckConfOpt) -> Result<(), String> {
    let _ = opt;
    let config = load_config(&profile_dir)?;
    println!(
        "configuration OK: local peer '{}', {} peers, {} catalogue entries",
        config.local_peer_name(),
        config.peers().len(),
        config.catalogue().len()
    );
    Ok(())
}

fn main() {
    let opt = OverlaydCliOpt::from_args();
    let profile_dir = opt
        .profiles_path
        .unwrap_or_else(|| default_profile_dir(opt.profile_name.as_deref()));

    let env_log_level = EnvOverrides::from_env()
        .unwrap_or_default()
        .log_level
        .and_then(|s| s.parse::<Level>().ok());
    let verbose = opt.logs_level.or(env_log_level).map_or(false, |l| l >= Level::Debug);
    if let Err(e) = overlayd_core::logger::init(&profile_dir, verbose) {
        eprintln!("failed to initialize logger: {}", e);
        process::exit(1);
    }

    let result = match opt.cmd {
        OverlaydSubCommand::Start(start_opt) => run_start(profile_dir, start_opt),
        OverlaydSubCommand::ListModules(list_opt) => run_list_modules(profile_dir, list_opt),
        OverlaydSubCommand::CheckConf(check_opt) => run_check_conf(profile_dir, check_opt),
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{}", e);
        process::exit(1);
    }
}
