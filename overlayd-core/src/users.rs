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

//! `UserDirectory`: the set of real local users, consulted by the manager
//! to expand `usr`-scoped catalogue entries and by `getLocalInfo()`.

use crate::model::UserName;
use std::collections::HashSet;
use std::path::PathBuf;

/// External collaborator providing the set of real local users eligible to
/// own user-scoped module instances.
pub trait UserDirectory {
    /// All local users known to the host, blacklist not yet applied.
    fn users(&self) -> HashSet<UserName>;

    /// Resolve `user`'s real `(uid, gid)`, if this collaborator can name
    /// one. Used by the in-process host to drop effective privileges to
    /// the target user for the duration of each callback (§4.B); `None`
    /// leaves the callback running under the manager's own credentials.
    fn resolve_uid_gid(&self, user: &UserName) -> Option<(u32, u32)>;
}

/// Reads local users straight out of `/etc/passwd`. Only available on
/// Unix; other targets are expected to supply their own `UserDirectory`.
#[cfg(unix)]
#[derive(Debug)]
pub struct SystemUserDirectory {
    /// Only accounts with a uid at or above this threshold are considered
    /// real users (excludes system/service accounts), mirroring the usual
    /// `/etc/login.defs` `UID_MIN` convention.
    pub uid_min: u32,
    /// Path to the passwd database; overridable for tests.
    pub passwd_path: PathBuf,
}

#[cfg(unix)]
impl Default for SystemUserDirectory {
    fn default() -> SystemUserDirectory {
        SystemUserDirectory {
            uid_min: 1000,
            passwd_path: PathBuf::from("/etc/passwd"),
        }
    }
}

#[cfg(unix)]
impl UserDirectory for SystemUserDirectory {
    fn users(&self) -> HashSet<UserName> {
        let contents = match std::fs::read_to_string(&self.passwd_path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("failed to read {:?}: {}", self.passwd_path, e);
                return HashSet::new();
            }
        };
        contents
            .lines()
            .filter_map(|line| {
                let mut fields = line.split(':');
                let name = fields.next()?;
                let uid: u32 = fields.nth(2)?.parse().ok()?;
                if uid >= self.uid_min {
                    Some(UserName(name.to_owned()))
                } else {
                    None
                }
            })
            .collect()
    }

    fn resolve_uid_gid(&self, user: &UserName) -> Option<(u32, u32)> {
        let contents = std::fs::read_to_string(&self.passwd_path).ok()?;
        contents.lines().find_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if *fields.first()? != user.0 {
                return None;
            }
            let uid: u32 = fields.get(2)?.parse().ok()?;
            let gid: u32 = fields.get(3)?.parse().ok()?;
            Some((uid, gid))
        })
    }
}

/// A fixed, explicitly-provided set of users. Useful for tests and for
/// non-Unix targets.
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    users: HashSet<UserName>,
}

impl StaticUserDirectory {
    pub fn new(users: HashSet<UserName>) -> StaticUserDirectory {
        StaticUserDirectory { users }
    }
}

impl UserDirectory for StaticUserDirectory {
    fn users(&self) -> HashSet<UserName> {
        self.users.clone()
    }

    /// No real account backs a `StaticUserDirectory` entry, so there is
    /// nothing to drop privileges to; in-process hosts for these users run
    /// under the manager's own credentials.
    fn resolve_uid_gid(&self, _user: &UserName) -> Option<(u32, u32)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashset;

    #[test]
    fn static_directory_returns_its_fixed_set() {
        let directory = StaticUserDirectory::new(hashset! { UserName::from("alice") });
        assert_eq!(directory.users(), hashset! { UserName::from("alice") });
    }
}
