use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::aggregate::{EventAggregate, ParticipantRole};

/// Membership status of a user within an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// The user was invited but has not joined yet.
    Invited,
    /// The user is an active member of the event.
    Joined,
    /// The user left the event and may join again.
    Left,
    /// The user was removed by an admin. Terminal.
    Kicked,
}

/// Actions that move a participant between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantAction {
    /// An admin (re-)invites the user.
    Invite,
    /// The user joins the event.
    Join,
    /// The user leaves or declines the event.
    Leave,
    /// An admin removes the user.
    Kick,
}

/// Capabilities granted to a viewer in a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permissions {
    /// Whether the full event (roster, notes, playlist) is visible.
    pub can_view_full_event: bool,
    /// Whether the live slides are visible.
    pub can_view_slides: bool,
    /// Whether a join control should be offered.
    pub can_join: bool,
    /// Whether a leave control should be offered.
    pub can_leave: bool,
}

/// Apply `action` to `status`.
///
/// Pairs without an entry in the table leave the status untouched.
pub fn transition(status: ParticipantStatus, action: ParticipantAction) -> ParticipantStatus {
    use ParticipantAction as A;
    use ParticipantStatus as S;

    match (status, action) {
        (S::Invited, A::Join) => S::Joined,
        (S::Invited, A::Leave) => S::Left,
        (S::Invited, A::Kick) => S::Kicked,
        (S::Joined, A::Leave) => S::Left,
        (S::Joined, A::Kick) => S::Kicked,
        (S::Left, A::Join) => S::Joined,
        (S::Left, A::Invite) => S::Invited,
        (S::Left, A::Kick) => S::Kicked,
        (unchanged, _) => unchanged,
    }
}

/// Look up the capability set for `status`.
pub fn permissions_for(status: ParticipantStatus) -> Permissions {
    match status {
        ParticipantStatus::Invited => Permissions {
            can_view_full_event: false,
            can_view_slides: false,
            can_join: true,
            can_leave: false,
        },
        ParticipantStatus::Joined => Permissions {
            can_view_full_event: true,
            can_view_slides: true,
            can_join: false,
            can_leave: true,
        },
        ParticipantStatus::Left => Permissions {
            can_view_full_event: false,
            can_view_slides: false,
            can_join: true,
            can_leave: false,
        },
        ParticipantStatus::Kicked => Permissions {
            can_view_full_event: false,
            can_view_slides: false,
            can_join: false,
            can_leave: false,
        },
    }
}

/// Resolve the effective status of `viewer` inside `aggregate`.
///
/// The owner is always joined. Anonymous viewers and users without a roster entry are
/// treated as invited so they can see the join flow.
pub fn derive_status(aggregate: &EventAggregate, viewer: Option<Uuid>) -> ParticipantStatus {
    let Some(viewer) = viewer else {
        return ParticipantStatus::Invited;
    };
    if viewer == aggregate.owner_id {
        return ParticipantStatus::Joined;
    }

    match aggregate.participants.get(&viewer) {
        None => ParticipantStatus::Invited,
        Some(entry) if entry.role == ParticipantRole::Kicked => ParticipantStatus::Kicked,
        Some(entry) => entry.status,
    }
}
