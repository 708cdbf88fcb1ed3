//! Public types for the chat API
use serde::{Deserialize, Serialize};

use crate::chat::Turn;

/// One relayed exchange: the conversation so far plus the new user
/// message. The relay rebuilds everything from this payload; nothing
/// is held between requests.
#[derive(Serialize, Deserialize)]
pub struct ChatRequest {
    pub history: Vec<Turn>,
    pub message: String,
}
