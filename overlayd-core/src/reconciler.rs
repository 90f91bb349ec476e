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

//! Roster Reconciler (component D): diffs a peer's advertised `SysInfo`
//! against the local instance table and produces the FSM events each owned
//! instance should receive.

use crate::fsm::Event;
use crate::instance::InstanceId;
use crate::model::{ModuleClaim, SysInfo};
use crate::state::MiState;
use std::collections::HashSet;

/// Build the set of claims a peer's advertisement makes, after applying the
/// module-name mapping of §3 (server↔client flip; `peer`-role names are
/// unchanged). A catalogue entry whose name fails to parse is dropped from
/// the claim set rather than propagated as an error: malformed peer
/// advertisements are the peer's problem, not a local fault.
pub fn mapped_claims(advertisement: &SysInfo) -> HashSet<ModuleClaim> {
    advertisement
        .claims()
        .into_iter()
        .filter_map(|claim| {
            let mapped_name = claim.module_name.flip_role().ok()?;
            Some(ModuleClaim {
                module_name: mapped_name,
                user_name: claim.user_name,
            })
        })
        .collect()
}

/// Decide the event, if any, that `instance`'s current state should receive
/// given whether its `(userName, moduleName)` pair is present in
/// `claims`. `is_removal` forces `matches = false` regardless of `claims`
/// (§4.D step 3), modelling a peer leaving the federation outright rather
/// than merely dropping one module from its advertisement.
pub fn reconcile_one(
    current_state: MiState,
    instance_matches: bool,
    is_removal: bool,
) -> Option<Event> {
    let matches = instance_matches && !is_removal;
    match (current_state, matches, is_removal) {
        (MiState::Inactive, true, _) => Some(Event::PeerMatchAppears),
        (MiState::Active, false, true) => Some(Event::PeerRemoved),
        (MiState::Active, false, false) => Some(Event::PeerMatchGone),
        (MiState::Reject, _, true)
        | (MiState::PeerReject, _, true)
        | (MiState::PeerExcept, _, true)
        | (MiState::Except, _, true) => Some(Event::PeerRemoved),
        // Already matching and ACTIVE, or already not matching and
        // INACTIVE/a failure state while the peer stays: idempotent, no
        // event (law L1).
        _ => None,
    }
}

/// Whether instance `id`'s `(userName, moduleName)` pair is claimed by the
/// peer, per the mapped claim set computed by `mapped_claims`.
pub fn instance_matches(id: &InstanceId, claims: &HashSet<ModuleClaim>) -> bool {
    claims.contains(&ModuleClaim {
        module_name: id.module_name.clone(),
        user_name: id.user_name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModuleName, UserName};
    use maplit::hashset;

    #[test]
    fn mapped_claims_flips_server_client_and_keeps_peer_role() {
        let mut advertisement = SysInfo::empty();
        advertisement.users.insert(UserName::from("alice"));
        advertisement.modules.insert((
            ModuleName("chat-client-1".to_owned()),
            Some(UserName::from("alice")),
        ));
        advertisement
            .modules
            .insert((ModuleName("gossip-peer-main".to_owned()), None));

        let claims = mapped_claims(&advertisement);
        assert_eq!(
            claims,
            hashset! {
                ModuleClaim {
                    module_name: ModuleName("chat-server-1".to_owned()),
                    user_name: Some(UserName::from("alice")),
                },
                ModuleClaim {
                    module_name: ModuleName("gossip-peer-main".to_owned()),
                    user_name: None,
                },
            }
        );
    }

    #[test]
    fn inactive_activates_when_matched() {
        assert_eq!(
            reconcile_one(MiState::Inactive, true, false),
            Some(Event::PeerMatchAppears)
        );
    }

    #[test]
    fn active_deactivates_when_unmatched_without_removal() {
        assert_eq!(
            reconcile_one(MiState::Active, false, false),
            Some(Event::PeerMatchGone)
        );
    }

    #[test]
    fn active_deactivates_on_removal() {
        assert_eq!(
            reconcile_one(MiState::Active, true, true),
            Some(Event::PeerRemoved)
        );
    }

    #[test]
    fn idempotent_when_already_settled() {
        assert_eq!(reconcile_one(MiState::Active, true, false), None);
        assert_eq!(reconcile_one(MiState::Inactive, false, false), None);
    }

    #[test]
    fn failure_states_resolve_only_on_removal() {
        assert_eq!(reconcile_one(MiState::PeerReject, false, false), None);
        assert_eq!(
            reconcile_one(MiState::PeerReject, false, true),
            Some(Event::PeerRemoved)
        );
    }
}
