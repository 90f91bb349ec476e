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

//! Data model shared by every component of the local module manager: peer
//! names, module names, the `SysInfo` advertisement, the module catalogue
//! read from configuration, and the wire frame taxonomy.

use std::collections::HashSet;
use std::fmt;

/// Name of a peer host in the federation. Peer identities are static
/// configuration; there is no discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerName(pub String);

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'a> From<&'a str> for PeerName {
    fn from(s: &str) -> Self {
        PeerName(s.to_owned())
    }
}

/// Name of a real local user eligible to own user-scoped module instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserName(pub String);

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'a> From<&'a str> for UserName {
    fn from(s: &str) -> Self {
        UserName(s.to_owned())
    }
}

/// The role a module plays in its client/server/peer triple. Carried as
/// the second `-`-delimited token of the module name (`<class>-<role>-<tag>`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ModuleRole {
    /// Serves requests from a matching client on a peer.
    Server,
    /// Drives requests to a matching server on a peer.
    Client,
    /// Symmetric role: matches itself across the wire.
    Peer,
}

impl ModuleRole {
    /// Flip server and client; `Peer` maps to itself. This is the only
    /// protocol-level knowledge the core holds about module semantics
    /// (see the module-name mapping rule).
    pub fn flipped(self) -> ModuleRole {
        match self {
            ModuleRole::Server => ModuleRole::Client,
            ModuleRole::Client => ModuleRole::Server,
            ModuleRole::Peer => ModuleRole::Peer,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ModuleRole::Server => "server",
            ModuleRole::Client => "client",
            ModuleRole::Peer => "peer",
        }
    }

    fn parse(s: &str) -> Option<ModuleRole> {
        match s {
            "server" => Some(ModuleRole::Server),
            "client" => Some(ModuleRole::Client),
            "peer" => Some(ModuleRole::Peer),
            _ => None,
        }
    }
}

/// Name of a module, in the mandatory `<class>-<role>-<tag>` format. Parsed
/// once at configuration load time; malformed names are a config error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleName(pub String);

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a module name does not respect the
/// `<class>-<role>-<tag>` convention with role in `{server, client, peer}`.
#[derive(Debug, Fail, Clone, PartialEq, Eq)]
#[fail(display = "invalid module name '{}': expected <class>-<role>-<tag>", _0)]
pub struct InvalidModuleName(pub String);

impl ModuleName {
    /// Split the module name into its three dash-delimited parts.
    fn parts(&self) -> Option<(&str, &str, &str)> {
        let mut it = self.0.splitn(3, '-');
        let class = it.next()?;
        let role = it.next()?;
        let tag = it.next()?;
        if class.is_empty() || role.is_empty() || tag.is_empty() {
            return None;
        }
        Some((class, role, tag))
    }

    /// Parse the role out of this module name.
    pub fn role(&self) -> Result<ModuleRole, InvalidModuleName> {
        self.parts()
            .and_then(|(_, role, _)| ModuleRole::parse(role))
            .ok_or_else(|| InvalidModuleName(self.0.clone()))
    }

    /// Returns the name obtained by flipping this module's role
    /// (server↔client, peer unchanged); used to match a peer's
    /// advertised module name against our own catalogue.
    pub fn flip_role(&self) -> Result<ModuleName, InvalidModuleName> {
        let (class, role, tag) = self.parts().ok_or_else(|| InvalidModuleName(self.0.clone()))?;
        let role = ModuleRole::parse(role).ok_or_else(|| InvalidModuleName(self.0.clone()))?;
        Ok(ModuleName(format!("{}-{}-{}", class, role.flipped().as_str(), tag)))
    }
}

/// Scope of a module catalogue entry: instantiated once per host, or once
/// per eligible local user.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleScope {
    /// One instance for the whole host.
    Sys,
    /// One instance per eligible local user.
    Usr,
}

/// A single `(moduleName, userName?)` entry, either local (read from the
/// catalogue and expanded per-user) or advertised by a peer in its
/// `SysInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleClaim {
    /// Module name as advertised/configured.
    pub module_name: ModuleName,
    /// User this instance is scoped to, if any.
    pub user_name: Option<UserName>,
}

/// A host's self-description: which users it has, and which modules it
/// exposes (possibly per user). Equality is structural over both sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysInfo {
    /// Real users known on the advertising host.
    pub users: HashSet<UserName>,
    /// Modules the host exposes, each optionally bound to one of `users`.
    pub modules: HashSet<(ModuleName, Option<UserName>)>,
}

impl SysInfo {
    /// Build an empty advertisement (used to synthesise the effect of a
    /// peer removal: every claim becomes unmatched).
    pub fn empty() -> SysInfo {
        SysInfo::default()
    }

    /// Validate the scope invariant: `scope = sys` entries have no user,
    /// `scope = usr` entries name a user present in `users`. The catalogue
    /// does not carry `scope` directly here (that lives on
    /// `ModuleCatalogEntry`); this checks the already-expanded claim set.
    pub fn claims(&self) -> HashSet<ModuleClaim> {
        self.modules
            .iter()
            .map(|(module_name, user_name)| ModuleClaim {
                module_name: module_name.clone(),
                user_name: user_name.clone(),
            })
            .collect()
    }
}

/// A module catalogue entry as read from configuration. The core only ever
/// reads the `standalone` and `allow_local_peer` properties out of
/// `props`; everything else is opaque and handed to the module's factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleCatalogEntry {
    /// Module name, `<class>-<role>-<tag>`.
    pub module_name: ModuleName,
    /// System-wide or per-user.
    pub scope: ModuleScope,
    /// Role redundantly stored for quick access (must agree with
    /// `module_name`'s embedded role; checked at load time).
    pub role: ModuleRole,
    /// Opaque identifier distinguishing multiple entries of the same class.
    pub id: String,
    /// Opaque key/value properties. The core reads only the two keys
    /// documented above; anything else is passed through to the module.
    #[serde(default)]
    pub props: ModuleProps,
}

/// The subset of `propDict` the core itself interprets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleProps {
    /// Host this instance in a subprocess instead of in-process.
    #[serde(default)]
    pub standalone: bool,
    /// Allow this module to be instantiated against the local host acting
    /// as its own peer (self-peer loopback).
    #[serde(default = "default_true")]
    pub allow_local_peer: bool,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_from_name() {
        let name = ModuleName("chat-server-1".to_owned());
        assert_eq!(name.role().unwrap(), ModuleRole::Server);
    }

    #[test]
    fn role_rejects_malformed_name() {
        let name = ModuleName("chat".to_owned());
        assert!(name.role().is_err());
    }

    #[test]
    fn flip_role_swaps_server_and_client() {
        let server = ModuleName("chat-server-1".to_owned());
        assert_eq!(server.flip_role().unwrap().0, "chat-client-1");
        let client = ModuleName("chat-client-1".to_owned());
        assert_eq!(client.flip_role().unwrap().0, "chat-server-1");
    }

    #[test]
    fn flip_role_leaves_peer_role_unchanged() {
        let peer = ModuleName("gossip-peer-main".to_owned());
        assert_eq!(peer.flip_role().unwrap().0, "gossip-peer-main");
    }

    #[test]
    fn sys_info_equality_is_structural() {
        let mut a = SysInfo::empty();
        a.users.insert(UserName::from("alice"));
        let mut b = SysInfo::empty();
        b.users.insert(UserName::from("alice"));
        assert_eq!(a, b);
    }
}
