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

//! Error hierarchy for the local module manager, split along the three
//! classes described by the error handling design: configuration errors
//! (fatal at `init`), manager-internal invariant violations (fatal,
//! indicate a supervisor bug), and per-callback module errors (caught at
//! the host boundary, never escape as Rust errors).

use crate::model::{InvalidModuleName, ModuleName};
use std::path::PathBuf;

/// Errors that can occur while loading or validating configuration.
/// Fatal: the manager does not attempt to run with a broken configuration.
#[derive(Debug, Fail)]
pub enum ConfigError {
    /// A module catalogue entry's name does not respect the
    /// `<class>-<role>-<tag>` convention.
    #[fail(display = "module catalogue error: {}", _0)]
    InvalidModuleName(#[cause] InvalidModuleName),
    /// The role embedded in the module name disagrees with the `role`
    /// field of the catalogue entry.
    #[fail(
        display = "module '{}' declares role {:?} but its name implies a different role",
        _0, _1
    )]
    RoleMismatch(ModuleName, crate::model::ModuleRole),
    /// The configuration file could not be read.
    #[fail(display = "failed to read configuration file {:?}: {}", _0, _1)]
    ReadFile(PathBuf, std::io::Error),
    /// The configuration file could not be parsed as TOML.
    #[fail(display = "failed to parse configuration file {:?}: {}", _0, _1)]
    ParseFile(PathBuf, toml::de::Error),
    /// The profile directory could not be created.
    #[fail(display = "failed to create profile directory {:?}: {}", _0, _1)]
    CreateProfileDir(PathBuf, std::io::Error),
    /// An `OVERLAYD_`-prefixed environment variable could not be parsed
    /// into the global override it names.
    #[fail(display = "failed to read environment configuration overrides: {}", _0)]
    EnvOverride(envy::Error),
}

/// Errors that can occur while the manager is running which indicate a
/// bug in the supervisor itself or a broken collaborator (transport).
/// Fatal: the manager asserts and exits.
#[derive(Debug, Fail)]
pub enum ManagerError {
    /// Configuration failed to load or validate.
    #[fail(display = "{}", _0)]
    Config(#[cause] ConfigError),
    /// A duplicate identity triple was about to be created (violates I1).
    #[fail(display = "duplicate module instance for identity {:?}", _0)]
    DuplicateInstance(crate::instance::InstanceId),
    /// `dispose()` found a module instance not in INACTIVE or EXCEPT
    /// (violates I6); this is a supervisor bug, never a module's fault.
    #[fail(
        display = "instance {:?} left in state {:?} after dispose(), expected INACTIVE or EXCEPT",
        _0, _1
    )]
    DisposeInvariantViolated(crate::instance::InstanceId, crate::state::MiState),
    /// The peer transport reported a fatal, unrecoverable error.
    #[fail(display = "peer transport failed: {}", _0)]
    TransportFailed(String),
    /// Failed to create or remove the per-process scoped workspace root.
    #[fail(display = "failed to manage scoped workspace root: {}", _0)]
    Workspace(std::io::Error),
    /// A catalogue entry named a module class with no registered factory.
    #[fail(display = "no factory registered for module class of '{}'", _0)]
    UnregisteredModuleClass(ModuleName),
    /// Spawning a `standalone` catalogue entry's child process failed.
    #[fail(display = "failed to spawn standalone module: {}", _0)]
    StandaloneSpawn(std::io::Error),
}

impl From<ConfigError> for ManagerError {
    fn from(e: ConfigError) -> Self {
        ManagerError::Config(e)
    }
}

/// Coarse classification of an `EXCEPT` failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptKind {
    /// The module callback returned an application-level error.
    ModuleError,
    /// The module callback panicked (in-process host only).
    Panicked,
    /// A standalone module's child process exited or its pipe closed
    /// unexpectedly.
    Crashed,
}
