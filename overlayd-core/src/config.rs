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

//! Configuration: the `ConfigProvider` contract the manager reads at
//! `init()`, and a TOML-file-backed implementation under a profile
//! directory, generalizing the teacher's own profile/TOML loading.

use crate::errors::ConfigError;
use crate::model::{ModuleCatalogEntry, PeerName, UserName};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "overlayd.toml";
const PROFILES_DIR_ENV: &str = "OVERLAYD_PROFILES_DIR";
const DEFAULT_PROFILE_NAME: &str = "overlayd_default";
const ENV_PREFIX: &str = "OVERLAYD_";

/// The handful of global knobs that may be overridden by an
/// `OVERLAYD_`-prefixed environment variable instead of (or in addition
/// to) the CLI, merged over the TOML file the way the teacher's
/// `durs_conf::env` merges `DURS_`-prefixed variables over the file-backed
/// configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EnvOverrides {
    /// Overrides the stdout/file log level threshold.
    pub log_level: Option<String>,
}

impl EnvOverrides {
    /// Read whichever of the supported variables are set; absent ones
    /// leave the corresponding field `None`.
    pub fn from_env() -> Result<EnvOverrides, ConfigError> {
        envy::prefixed(ENV_PREFIX)
            .from_env::<EnvOverrides>()
            .map_err(ConfigError::EnvOverride)
    }
}

/// Everything the manager reads at startup: the static federation roster
/// (including the local host's own name), the module catalogue, and the
/// user blacklist.
pub trait ConfigProvider {
    /// This host's own name, as it appears in `peers()`.
    fn local_peer_name(&self) -> &PeerName;
    /// Every peer in the static federation, including the local host.
    fn peers(&self) -> &[PeerName];
    /// Module catalogue entries, already validated against the module-name
    /// convention.
    fn catalogue(&self) -> &[ModuleCatalogEntry];
    /// Local users excluded from every `usr`-scoped module and from
    /// `getLocalInfo()`'s advertised user set.
    fn user_blacklist(&self) -> &HashSet<UserName>;
}

/// Resolve the profile directory: `--profile`/`OVERLAYD_PROFILES_DIR` if
/// set, otherwise `dirs::config_dir()/overlayd/overlayd_default`. Mirrors
/// the teacher's own profile resolution; cannot log anything here, since
/// the logger is not initialized until after configuration is loaded.
pub fn default_profile_dir(profile_name: Option<&str>) -> PathBuf {
    let name = profile_name.unwrap_or(DEFAULT_PROFILE_NAME);
    if let Ok(override_dir) = std::env::var(PROFILES_DIR_ENV) {
        return PathBuf::from(override_dir).join(name);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("overlayd")
        .join(name)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FileConfig {
    local_peer: String,
    #[serde(default)]
    peers: Vec<String>,
    #[serde(default)]
    user_blacklist: Vec<String>,
    #[serde(default)]
    modules: Vec<ModuleCatalogEntry>,
}

/// A `ConfigProvider` loaded from `<profile_dir>/overlayd.toml`.
#[derive(Debug)]
pub struct TomlConfigProvider {
    local_peer_name: PeerName,
    peers: Vec<PeerName>,
    user_blacklist: HashSet<UserName>,
    catalogue: Vec<ModuleCatalogEntry>,
}

impl TomlConfigProvider {
    /// Load and validate configuration from `profile_dir`, creating the
    /// directory if it does not yet exist.
    pub fn load(profile_dir: &Path) -> Result<TomlConfigProvider, ConfigError> {
        std::fs::create_dir_all(profile_dir)
            .map_err(|e| ConfigError::CreateProfileDir(profile_dir.to_owned(), e))?;
        let path = profile_dir.join(CONFIG_FILE_NAME);
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::ReadFile(path.clone(), e))?;
        let file: FileConfig =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseFile(path.clone(), e))?;
        Self::from_file_config(file)
    }

    fn from_file_config(file: FileConfig) -> Result<TomlConfigProvider, ConfigError> {
        for entry in &file.modules {
            let role_from_name = entry
                .module_name
                .role()
                .map_err(ConfigError::InvalidModuleName)?;
            if role_from_name != entry.role {
                return Err(ConfigError::RoleMismatch(
                    entry.module_name.clone(),
                    entry.role,
                ));
            }
        }
        Ok(TomlConfigProvider {
            local_peer_name: PeerName(file.local_peer),
            peers: file.peers.into_iter().map(PeerName).collect(),
            user_blacklist: file.user_blacklist.into_iter().map(UserName).collect(),
            catalogue: file.modules,
        })
    }
}

impl ConfigProvider for TomlConfigProvider {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModuleProps, ModuleRole, ModuleScope, ModuleName};

    fn entry(name: &str, role: ModuleRole) -> ModuleCatalogEntry {
        ModuleCatalogEntry {
            module_name: ModuleName(name.to_owned()),
            scope: ModuleScope::Sys,
            role,
            id: "1".to_owned(),
            props: ModuleProps::default(),
        }
    }

    #[test]
    fn accepts_a_catalogue_whose_roles_agree_with_names() {
        let file = FileConfig {
            local_peer: "this-host".to_owned(),
            peers: vec!["this-host".to_owned(), "other-host".to_owned()],
            user_blacklist: vec![],
            modules: vec![entry("chat-server-1", ModuleRole::Server)],
        };
        let provider = TomlConfigProvider::from_file_config(file).unwrap();
        assert_eq!(provider.catalogue().len(), 1);
        assert_eq!(provider.peers().len(), 2);
    }

    #[test]
    fn rejects_a_role_mismatch() {
        let file = FileConfig {
            local_peer: "this-host".to_owned(),
            peers: vec!["this-host".to_owned()],
            user_blacklist: vec![],
            modules: vec![entry("chat-server-1", ModuleRole::Client)],
        };
        assert!(matches!(
            TomlConfigProvider::from_file_config(file),
            Err(ConfigError::RoleMismatch(_, ModuleRole::Client))
        ));
    }
}
