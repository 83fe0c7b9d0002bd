//! Room directory and access control gate.
//!
//! Rooms are created implicitly on first join and destroyed when the last
//! member leaves, which also drops their secret, approvals and pending
//! requests. Room names are used verbatim as map keys; callers trim.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::registry::ConnId;

/// Errors raised while handling client events. Join failures are reported
/// back over the wire with these exact reason strings; the rest only cause
/// the offending event to be dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Password required")]
    PasswordRequired,
    #[error("Incorrect password")]
    IncorrectPassword,
    #[error("connection has no room bound")]
    NotInRoom,
    #[error("approver is not a member of the target room")]
    UnauthorizedApproval,
}

/// Explicit result of a join attempt, so room creation is visible to the
/// caller instead of hiding inside a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Created,
    JoinedPublic,
    JoinedPrivate,
    Rejected(EventError),
}

impl JoinOutcome {
    pub fn admitted(&self) -> bool {
        !matches!(self, JoinOutcome::Rejected(_))
    }
}

#[derive(Default)]
struct RoomMeta {
    /// A room with a secret is private; one without admits anyone.
    secret: Option<String>,
    /// Display names granted one-time entry without the secret.
    approved: HashSet<String>,
    /// Pending join requests: requester connection -> requested name.
    pending: HashMap<ConnId, String>,
}

#[derive(Default)]
pub struct RoomDirectory {
    rooms: HashMap<String, RoomMeta>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_private(&self, room: &str) -> bool {
        self.rooms
            .get(room)
            .map(|meta| meta.secret.is_some())
            .unwrap_or(false)
    }

    /// Run the access decision for a join attempt. Mutates the directory:
    /// creates absent rooms and consumes approvals. An empty-string secret
    /// counts as no secret supplied.
    pub fn evaluate_join(&mut self, name: &str, room: &str, secret: Option<&str>) -> JoinOutcome {
        let secret = secret.filter(|s| !s.is_empty());
        match self.rooms.get_mut(room) {
            None => {
                self.rooms.insert(
                    room.to_string(),
                    RoomMeta {
                        secret: secret.map(str::to_string),
                        ..RoomMeta::default()
                    },
                );
                JoinOutcome::Created
            }
            Some(meta) => match &meta.secret {
                None => JoinOutcome::JoinedPublic,
                Some(stored) => {
                    if meta.approved.remove(name) {
                        JoinOutcome::JoinedPrivate
                    } else if secret == Some(stored.as_str()) {
                        JoinOutcome::JoinedPrivate
                    } else if secret.is_some() {
                        JoinOutcome::Rejected(EventError::IncorrectPassword)
                    } else {
                        JoinOutcome::Rejected(EventError::PasswordRequired)
                    }
                }
            },
        }
    }

    /// Record a pending join request for a private room.
    pub fn record_request(&mut self, room: &str, requester: ConnId, name: String) {
        if let Some(meta) = self.rooms.get_mut(room) {
            meta.pending.insert(requester, name);
        }
    }

    /// Resolve a pending request, discarding it regardless of outcome.
    /// Approval moves the requested name into the one-time approved set.
    /// Returns the requested name, or `None` if no such request was pending.
    pub fn resolve_request(
        &mut self,
        room: &str,
        requester: ConnId,
        approve: bool,
    ) -> Option<String> {
        let meta = self.rooms.get_mut(room)?;
        let name = meta.pending.remove(&requester)?;
        if approve {
            meta.approved.insert(name.clone());
        }
        Some(name)
    }

    /// Drop a room's metadata once it has no members left.
    pub fn remove(&mut self, room: &str) {
        self.rooms.remove(room);
    }
}
