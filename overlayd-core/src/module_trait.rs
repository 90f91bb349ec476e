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

//! The trait every concrete module implements, and the build-time
//! registry that replaces dynamic-by-name module loading (design note:
//! "Dynamic module loading"). A real module implementation lives outside
//! this crate and is out of scope; this module only defines the contract.

use crate::instance::InstanceId;
use crate::state::WorkState;
use std::path::Path;

/// A module failure that is not a cooperative reject: any uncaught
/// application error, or (for in-process hosts) a caught panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFailure {
    /// Coarse classification.
    pub kind: crate::errors::ExceptKind,
    /// Human-readable message, recorded verbatim in `failMessage`.
    pub message: String,
    /// Best-effort trace text.
    pub trace: Option<String>,
}

impl ModuleFailure {
    /// Construct a plain application-error failure with no trace.
    pub fn from_message(message: impl Into<String>) -> ModuleFailure {
        ModuleFailure {
            kind: crate::errors::ExceptKind::ModuleError,
            message: message.into(),
            trace: None,
        }
    }
}

/// What `on_recv` can fail with: a cooperative reject, distinguished from
/// any other failure (FSM rule 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvFailure {
    /// The module declines to continue; carries the message sent to the
    /// peer verbatim as `REJECT(message)`.
    Reject(String),
    /// Any other failure.
    Except(ModuleFailure),
}

/// Context handed to every module callback: identity, scoped workspace,
/// outbound send, and the work-state setter (§9, open question: modules
/// report their own work state through this setter; the manager never
/// infers it).
pub trait ModuleCtx {
    /// This instance's identity triple.
    fn identity(&self) -> &InstanceId;
    /// This instance's scoped workspace directory. Wiped after the
    /// callback returns, by the host, regardless of outcome.
    fn tmp_dir(&self) -> &Path;
    /// Send an opaque payload to this instance's peer counterpart
    /// (routed via the transport, or looped back if the peer is self).
    fn send_data(&self, payload: Vec<u8>);
    /// Report this instance's current aggregate work indicator.
    fn set_work_state(&self, work_state: WorkState);
}

/// All concrete modules implement this trait. Every method corresponds to
/// one edge of the FSM transition table; the manager is the only caller.
pub trait Module: Send {
    /// Called once, immediately after construction. Any failure here is
    /// always an `EXCEPT` (there is no reject semantics for `on_init`).
    fn on_init(&mut self, ctx: &dyn ModuleCtx) -> Result<(), ModuleFailure>;

    /// Called when a matching peer advertisement appears (`INACTIVE` →
    /// `ACTIVE`). Any failure here is always an `EXCEPT`.
    fn on_active(&mut self, ctx: &dyn ModuleCtx) -> Result<(), ModuleFailure>;

    /// Called whenever an `ACTIVE` instance is being torn down, for any
    /// reason (peer match gone, cooperative reject, peer reject/except, or
    /// being disposed). A failure here is always an `EXCEPT`, even when
    /// the teardown itself was triggered by a reject (FSM rule 4).
    fn on_inactive(&mut self, ctx: &dyn ModuleCtx) -> Result<(), ModuleFailure>;

    /// Called for each inbound `DATA` frame while `ACTIVE`. The only
    /// callback that may cooperatively reject.
    fn on_recv(&mut self, ctx: &dyn ModuleCtx, payload: Vec<u8>) -> Result<(), RecvFailure>;
}

/// A build-time-registered factory for one module class. Replaces
/// runtime by-name dynamic loading: the catalogue resolves a
/// `ModuleCatalogEntry`'s class to one of these without any
/// metaprogramming (design note: "Dynamic module loading").
pub trait ModuleFactory: Send + Sync {
    /// Construct a fresh module instance for the given identity. Called
    /// once per `ModuleInstance`, before `on_init`.
    fn spawn(&self, id: &InstanceId) -> Box<dyn Module>;
}

/// Maps a module's class (the first `-`-delimited token of its name) to
/// the factory that builds instances of it. Populated once at startup
/// from the binary's compiled-in module set; no reflection, no dynamic
/// library loading.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: std::collections::HashMap<String, Box<dyn ModuleFactory>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("classes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn new() -> ModuleRegistry {
        ModuleRegistry {
            factories: std::collections::HashMap::new(),
        }
    }

    /// Register the factory for module class `class`.
    pub fn register(&mut self, class: impl Into<String>, factory: Box<dyn ModuleFactory>) {
        self.factories.insert(class.into(), factory);
    }

    /// Look up the factory for `module_name`'s class.
    pub fn factory_for(&self, module_name: &crate::model::ModuleName) -> Option<&dyn ModuleFactory> {
        let class = module_name.0.split('-').next()?;
        self.factories.get(class).map(|b| b.as_ref())
    }
}
