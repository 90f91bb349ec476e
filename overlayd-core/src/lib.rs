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

//! Local Module Manager: a per-host supervisor that connects a static
//! federation of trusted peers into an overlay and drives pluggable
//! client/server/peer module instances through a fixed lifecycle.

#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod config;
pub mod errors;
pub mod fsm;
pub mod host;
pub mod instance;
pub mod loopback;
pub mod logger;
pub mod manager;
pub mod model;
pub mod module_trait;
pub mod reconciler;
pub mod state;
pub mod transport;
pub mod users;

pub use errors::ManagerError;
pub use manager::LocalManager;
