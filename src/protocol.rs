//! Wire protocol for the single multiplexed WebSocket per client.
//!
//! Frames are JSON objects `{"event": ..., "data": ...}` with kebab-case
//! event names. SDP offers/answers and ICE candidates stay opaque
//! `serde_json::Value`s; the server never inspects them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{Message, RoomInfo};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Join {
        name: String,
        room: String,
        #[serde(default)]
        secret: Option<String>,
    },
    JoinRequest {
        name: String,
        room: String,
    },
    ApproveRequest {
        requester: Uuid,
        room: String,
    },
    DenyRequest {
        requester: Uuid,
        room: String,
    },
    GetRooms,
    Message(Message),
    Offer(Value),
    Answer(Value),
    IceCandidate(Value),
    Typing,
    StopTyping,
    Reaction {
        message_id: String,
        emoji: String,
        name: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Message(Message),
    /// Full history snapshot, sent once to a connection right after it joins.
    MessageHistory(Vec<Message>),
    RoomList(Vec<RoomInfo>),
    RoomUsers(Vec<String>),
    PeerJoined {
        name: String,
    },
    JoinError {
        reason: String,
    },
    JoinRequestReceived {
        name: String,
        requester: Uuid,
    },
    JoinRequestPending,
    RequestApproved {
        room: String,
    },
    ReactionUpdate {
        message_id: String,
        emoji: String,
        name: String,
    },
    Typing {
        name: String,
    },
    StopTyping {
        name: String,
    },
    Offer(Value),
    Answer(Value),
    IceCandidate(Value),
}
