//! Stateless pass-through of per-room traffic: WebRTC negotiation payloads,
//! typing indicators, chat messages and reaction toggles. Everything is
//! keyed off the sender's current room; a sender with no room is dropped.

use serde_json::Value;

use crate::history::HistoryBuffer;
use crate::model::Message;
use crate::protocol::ServerEvent;
use crate::registry::{ConnId, ConnectionRegistry};
use crate::rooms::EventError;

#[derive(Debug, Clone, Copy)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    fn wrap(self, payload: Value) -> ServerEvent {
        match self {
            SignalKind::Offer => ServerEvent::Offer(payload),
            SignalKind::Answer => ServerEvent::Answer(payload),
            SignalKind::IceCandidate => ServerEvent::IceCandidate(payload),
        }
    }
}

fn sender_context(
    registry: &ConnectionRegistry,
    from: ConnId,
) -> Result<(String, String), EventError> {
    let room = registry
        .current_room(from)
        .ok_or(EventError::NotInRoom)?
        .to_string();
    let name = registry
        .name_of(from)
        .ok_or(EventError::NotInRoom)?
        .to_string();
    Ok((name, room))
}

/// Forward an SDP or ICE payload verbatim to everyone else in the sender's
/// room. The payload is never inspected.
pub fn relay_signal(
    registry: &ConnectionRegistry,
    from: ConnId,
    kind: SignalKind,
    payload: Value,
) -> Result<(), EventError> {
    let (_, room) = sender_context(registry, from)?;
    registry.broadcast_room(&room, Some(from), kind.wrap(payload));
    Ok(())
}

/// Relay a typing indicator, tagged with the sender's name. Nothing is
/// stored, so a disconnect mid-typing leaves no dangling indicator.
pub fn relay_typing(
    registry: &ConnectionRegistry,
    from: ConnId,
    stopped: bool,
) -> Result<(), EventError> {
    let (name, room) = sender_context(registry, from)?;
    let event = if stopped {
        ServerEvent::StopTyping { name }
    } else {
        ServerEvent::Typing { name }
    };
    registry.broadcast_room(&room, Some(from), event);
    Ok(())
}

/// Append a chat message to the room history and broadcast it to the whole
/// room, sender included.
pub fn relay_message(
    registry: &ConnectionRegistry,
    history: &mut HistoryBuffer,
    from: ConnId,
    message: Message,
) -> Result<(), EventError> {
    let (_, room) = sender_context(registry, from)?;
    history.append(&room, message.clone());
    registry.broadcast_room(&room, None, ServerEvent::Message(message));
    Ok(())
}

/// Toggle a reaction on a stored message and broadcast the delta to the
/// whole room, sender included, so every client applies the same idempotent
/// toggle. Unknown message ids still broadcast; only the store is skipped.
pub fn apply_reaction(
    registry: &ConnectionRegistry,
    history: &mut HistoryBuffer,
    from: ConnId,
    message_id: String,
    emoji: String,
    name: String,
) -> Result<(), EventError> {
    let (_, room) = sender_context(registry, from)?;
    history.toggle_reaction(&room, &message_id, &emoji, &name);
    registry.broadcast_room(
        &room,
        None,
        ServerEvent::ReactionUpdate {
            message_id,
            emoji,
            name,
        },
    );
    Ok(())
}
