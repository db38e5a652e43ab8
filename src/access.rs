//! Channel access resolution for ticket channels.
//!
//! [`resolve`] derives the full permission set from a ticket's current state
//! on every call; nothing is patched incrementally. [`diff`] turns the gap
//! between a channel's live overwrites and the resolved set into the minimal
//! list of platform calls.

use crate::models::permission::{Access, PermissionChange, PermissionSet, Principal};
use crate::models::ticket::Ticket;

/// Permission set a ticket channel should have right now.
///
/// Everyone is denied by default. The team role (when configured) keeps
/// access regardless of claim state; the claimer and added users are granted
/// explicitly; the creator is granted unless the ticket is closed.
#[must_use]
pub fn resolve(ticket: &Ticket, team_role_id: Option<&str>) -> PermissionSet {
    let mut set = PermissionSet::new();
    set.insert(Principal::Everyone, Access::DENIED);

    if ticket.is_open() {
        set.insert(Principal::Member(ticket.creator_id.clone()), Access::VIEW_SEND);
    }
    if let Some(role) = team_role_id {
        set.insert(Principal::Role(role.to_owned()), Access::VIEW_SEND);
    }
    for user in &ticket.added_users {
        set.insert(Principal::Member(user.clone()), Access::VIEW_SEND);
    }
    if let Some(claimer) = &ticket.claimer {
        set.insert(Principal::Member(claimer.clone()), Access::VIEW_SEND);
    }

    set
}

/// Changes that turn `live` into `desired`.
///
/// Overwrites present only in `live` are removed; differing or missing ones
/// are set. Identical entries produce no change.
#[must_use]
pub fn diff(live: &PermissionSet, desired: &PermissionSet) -> Vec<PermissionChange> {
    let removals = live
        .keys()
        .filter(|principal| !desired.contains_key(*principal))
        .map(|principal| PermissionChange {
            principal: principal.clone(),
            access: None,
        });

    let updates = desired
        .iter()
        .filter(|(principal, access)| live.get(*principal) != Some(*access))
        .map(|(principal, access)| PermissionChange {
            principal: principal.clone(),
            access: Some(*access),
        });

    removals.chain(updates).collect()
}

/// Principals that may read the channel under `set`.
pub fn granted(set: &PermissionSet) -> impl Iterator<Item = &Principal> {
    set.iter()
        .filter(|(_, access)| access.grants())
        .map(|(principal, _)| principal)
}
