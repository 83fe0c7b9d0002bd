//! Bounded per-room message history, replayed to new joiners.

use std::collections::{HashMap, VecDeque};

use crate::model::Message;

/// Messages kept per room; the oldest entry is evicted beyond this.
pub const HISTORY_CAPACITY: usize = 50;

#[derive(Default)]
pub struct HistoryBuffer {
    logs: HashMap<String, VecDeque<Message>>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, room: &str, message: Message) {
        let log = self.logs.entry(room.to_string()).or_default();
        log.push_back(message);
        if log.len() > HISTORY_CAPACITY {
            log.pop_front();
        }
    }

    /// Chronological snapshot of a room's log, used only at join time.
    pub fn snapshot(&self, room: &str) -> Vec<Message> {
        self.logs
            .get(room)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Toggle `name` under `emoji` on the message with `message_id`. The
    /// stored entry is mutated in place; ids are found by scan and the first
    /// match wins. Returns false when no such message exists in the room.
    pub fn toggle_reaction(
        &mut self,
        room: &str,
        message_id: &str,
        emoji: &str,
        name: &str,
    ) -> bool {
        let Some(log) = self.logs.get_mut(room) else {
            return false;
        };
        let Some(message) = log
            .iter_mut()
            .find(|m| m.id.as_deref() == Some(message_id))
        else {
            return false;
        };
        let reactors = message.reactions.entry(emoji.to_string()).or_default();
        if let Some(pos) = reactors.iter().position(|n| n == name) {
            reactors.remove(pos);
            if reactors.is_empty() {
                message.reactions.remove(emoji);
            }
        } else {
            reactors.push(name.to_string());
        }
        true
    }

    pub fn remove_room(&mut self, room: &str) {
        self.logs.remove(room);
    }
}
