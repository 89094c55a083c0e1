//! Client → Server messages

use serde::{Deserialize, Serialize};

/// Intents sent from a control-room client to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    // Actions
    #[serde(rename = "chat.send")]
    ChatSend {
        content: String,
        session_key: String,
        channel: String,
        chat_id: String,
    },
    #[serde(rename = "chat.cancel")]
    ChatCancel { run_id: String },

    // Subscriptions
    #[serde(rename = "session.subscribe")]
    SessionSubscribe { session_key: String },

    // Liveness (server answers with an untyped `pong`)
    #[serde(rename = "ping")]
    Ping,
}
