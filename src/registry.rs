//! Connection registry: the single owner of live client connections.
//!
//! Every connected socket gets an entry here at upgrade time and loses it on
//! disconnect. Room membership is derived from this state, never stored
//! elsewhere. All outbound traffic flows through the per-connection channel
//! senders kept in the sessions, so handlers never await on the network.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::protocol::ServerEvent;

pub type ConnId = Uuid;

pub struct Session {
    pub name: Option<String>,
    pub room: Option<String>,
    tx: UnboundedSender<ServerEvent>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<ConnId, Session>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conn: ConnId, tx: UnboundedSender<ServerEvent>) {
        self.sessions.insert(
            conn,
            Session {
                name: None,
                room: None,
                tx,
            },
        );
    }

    pub fn remove(&mut self, conn: ConnId) -> Option<Session> {
        self.sessions.remove(&conn)
    }

    /// Bind a display name and room to a connection. The name sticks for the
    /// rest of the session: later joins keep the first one.
    pub fn set_identity(&mut self, conn: ConnId, name: String, room: String) {
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.name.get_or_insert(name);
            session.room = Some(room);
        }
    }

    /// Unbind the connection from its room, returning the name and the room
    /// it was in. The name stays attached to the session.
    pub fn clear_room(&mut self, conn: ConnId) -> Option<(String, String)> {
        let session = self.sessions.get_mut(&conn)?;
        let room = session.room.take()?;
        let name = session.name.clone()?;
        Some((name, room))
    }

    pub fn current_room(&self, conn: ConnId) -> Option<&str> {
        self.sessions.get(&conn)?.room.as_deref()
    }

    pub fn name_of(&self, conn: ConnId) -> Option<&str> {
        self.sessions.get(&conn)?.name.as_deref()
    }

    pub fn is_member(&self, conn: ConnId, room: &str) -> bool {
        self.current_room(conn) == Some(room)
    }

    pub fn members_of(&self, room: &str) -> Vec<ConnId> {
        self.sessions
            .iter()
            .filter(|(_, s)| s.room.as_deref() == Some(room))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Display names of everyone in a room, sorted for stable output.
    pub fn names_in(&self, room: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.room.as_deref() == Some(room))
            .filter_map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Occupancy per room, for the global directory broadcast.
    pub fn room_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for session in self.sessions.values() {
            if let Some(room) = &session.room {
                *counts.entry(room.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Push an event to one connection. A closed receiver just means the
    /// socket is going away; the disconnect path will clean it up.
    pub fn send(&self, conn: ConnId, event: ServerEvent) {
        if let Some(session) = self.sessions.get(&conn) {
            let _ = session.tx.send(event);
        }
    }

    pub fn broadcast_room(&self, room: &str, exclude: Option<ConnId>, event: ServerEvent) {
        for (id, session) in &self.sessions {
            if session.room.as_deref() == Some(room) && Some(*id) != exclude {
                let _ = session.tx.send(event.clone());
            }
        }
    }

    pub fn broadcast_all(&self, event: ServerEvent) {
        for session in self.sessions.values() {
            let _ = session.tx.send(event.clone());
        }
    }
}
