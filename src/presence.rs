//! Presence recomputation and the debounced room-directory broadcast.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;

use crate::model::RoomInfo;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomDirectory;

/// Delay before the global room list goes out, coalescing join/leave bursts.
pub const ROOM_LIST_DEBOUNCE: Duration = Duration::from_millis(100);

/// Full recomputation of the room directory snapshot. Rooms are derived from
/// current occupancy, so an emptied room disappears on the next broadcast.
pub fn room_list(registry: &ConnectionRegistry, rooms: &RoomDirectory) -> Vec<RoomInfo> {
    registry
        .room_counts()
        .into_iter()
        .map(|(name, user_count)| RoomInfo {
            is_private: rooms.is_private(&name),
            name,
            user_count,
        })
        .collect()
}

/// Coalescing one-shot scheduler for the room-list broadcast. Any mutation
/// may call [`schedule`](Self::schedule); only the first call in a debounce
/// window spawns a timer, and every later call piggybacks on it. The fire
/// closure recomputes from live state, so piggybacked triggers lose nothing.
#[derive(Clone, Default)]
pub struct BroadcastScheduler {
    pending: Arc<Mutex<bool>>,
}

impl BroadcastScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, debounce: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut pending = self.pending.lock();
            if *pending {
                return;
            }
            *pending = true;
        }
        let pending = self.pending.clone();
        tokio::spawn(async move {
            sleep(debounce).await;
            *pending.lock() = false;
            fire();
        });
    }
}
