use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Gif,
}

/// Reference to the message a reply points at. Carries a preview of the
/// original text so clients can render the quote without a lookup.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ReplyRef {
    pub id: String,
    pub user: String,
    pub text: String,
}

/// A chat message as exchanged on the wire and stored in room history.
///
/// Ids are client-generated and assumed unique; server-generated system
/// notices carry no id and are never stored. Binary payloads (images, audio
/// clips) arrive inline-encoded and are passed through opaquely.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gif: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyRef>,
    /// emoji -> display names that currently hold the reaction.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: BTreeMap<String, Vec<String>>,
}

impl Message {
    /// Build a server-generated notice such as a join or leave announcement.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            id: None,
            user: "System".into(),
            kind: Some(MessageKind::Text),
            text: Some(text.into()),
            image: None,
            audio: None,
            gif: None,
            is_system: true,
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
            reply_to: None,
            reactions: BTreeMap::new(),
        }
    }
}

/// One entry of the global room directory broadcast to every connection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub name: String,
    pub user_count: usize,
    pub is_private: bool,
}
