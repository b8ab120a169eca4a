//! Typed records carried by the chat event stream.

use serde::Deserialize;

/// One decoded event of a streaming chat response.
///
/// The wire form is a JSON object tagged by `type`, e.g.
/// `{"type":"content","chunk":"Hel"}`. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// An incremental piece of the assistant reply.
    Content { chunk: String },
    /// Normal end of the reply; carries the id of the persisted message.
    Done { message_id: String },
    /// The backend aborted the reply.
    Error { message: String },
    /// Echo of the user's own message, acknowledged by the backend.
    UserMessage {
        #[serde(default)]
        message_id: Option<String>,
    },
}
