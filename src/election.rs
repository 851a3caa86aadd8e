use std::collections::BTreeSet;

use serde::Serialize;

/// Peer identifier, derived from the creation-time clock reading.
/// Doubles as the election sort key; not guaranteed globally unique.
pub type PeerId = u64;

/// Role a peer holds within the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Unset,
    Scheduler,
    Worker,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Unset => write!(f, "unset"),
            Role::Scheduler => write!(f, "scheduler"),
            Role::Worker => write!(f, "worker"),
        }
    }
}

/// Notification emitted when an election resolves to a different role than
/// the peer previously held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleChange {
    pub id: PeerId,
    pub from: Role,
    pub to: Role,
    /// Sorted membership the election resolved against.
    pub connected: Vec<PeerId>,
}

/// Role-election state machine.
///
/// Pure state: the owner (the peer node's event loop) arms the collection
/// window and calls `resolve` on expiry. The smallest observed PeerId wins
/// Scheduler; there is no secondary tie-break.
#[derive(Debug)]
pub struct Election {
    self_id: PeerId,
    role: Role,
    members: BTreeSet<PeerId>,
    in_progress: bool,
}

impl Election {
    pub fn new(self_id: PeerId) -> Self {
        Self {
            self_id,
            role: Role::Unset,
            members: BTreeSet::new(),
            in_progress: false,
        }
    }

    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    /// Open a collection window, unless one is already open.
    ///
    /// Returns `true` if a new window was opened (the caller arms the window
    /// timer). A `false` return is the idempotent guard against overlapping
    /// windows from rapid successive triggers.
    pub fn begin_or_continue(&mut self) -> bool {
        if self.in_progress {
            return false;
        }
        self.members.clear();
        self.members.insert(self.self_id);
        self.in_progress = true;
        true
    }

    /// Record that a peer announced itself or answered a roll call.
    ///
    /// Idempotent. Observations accumulate even when no window is open; the
    /// next window starts fresh from `{self}` anyway.
    pub fn observe_peer(&mut self, peer: PeerId) {
        self.members.insert(peer);
    }

    /// Resolve the current window: smallest member becomes Scheduler,
    /// everyone else Worker.
    ///
    /// Commits the new role and closes the window. Returns a `RoleChange`
    /// only when the resolved role differs from the previous one.
    pub fn resolve(&mut self) -> Option<RoleChange> {
        let previous = self.role;
        let new_role = match self.members.first() {
            Some(&min) if min == self.self_id => Role::Scheduler,
            Some(_) => Role::Worker,
            // Window never opened; nothing observed, not even self.
            None => return None,
        };

        self.role = new_role;
        self.in_progress = false;

        if previous != new_role {
            Some(RoleChange {
                id: self.self_id,
                from: previous,
                to: new_role,
                connected: self.members(),
            })
        } else {
            None
        }
    }

    /// Membership collected so far, sorted ascending.
    pub fn members(&self) -> Vec<PeerId> {
        self.members.iter().copied().collect()
    }
}
