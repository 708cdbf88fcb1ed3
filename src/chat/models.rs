//! Core models for a relayed conversation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gemini::Role;

/// Author of a turn as it appears on the wire. Clients only ever send
/// `user` or `bot`; anything else lands on the catch-all variant so an
/// unrecognized role degrades instead of failing deserialization.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
    #[serde(other)]
    Unknown,
}

impl Sender {
    /// Map the sender to the role the model expects. Only the
    /// assistant's own turns map to `model`; unrecognized senders fall
    /// back to `user`.
    pub fn upstream_role(&self) -> Role {
        match self {
            Sender::Bot => Role::Model,
            Sender::User | Sender::Unknown => Role::User,
        }
    }
}

/// A source the model cited for part of its reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub uri: String,
    #[serde(default)]
    pub title: String,
}

/// One exchange unit in a conversation. Assistant turns accumulate
/// text while a reply streams; every other turn is written once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
}

impl Turn {
    pub fn new(sender: Sender, text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            sender,
            sources: Vec::new(),
        }
    }
}

/// The final frame of a relayed reply: the citation list, serialized
/// after the last text fragment.
#[derive(Debug, Serialize, Deserialize)]
pub struct Trailer {
    pub sources: Vec<Source>,
}
