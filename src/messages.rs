use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Reserved recipient that addresses everyone in the room.
pub const BROADCAST: &str = "Todos";

pub const ENTERED_TEXT: &str = "entered the room";
pub const LEFT_TEXT: &str = "left the room";

/// Names are compared after trimming, wherever they come from.
pub(crate) fn normalize_name(raw: &str) -> &str {
    raw.trim()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub name: String,
    /// Wall-clock epoch milliseconds of the last join or heartbeat.
    pub last_seen: i64,
}

impl Participant {
    pub fn new(name: impl Into<String>, last_seen: i64) -> Self {
        Participant {
            name: name.into(),
            last_seen,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "message")]
    Message,
    #[serde(rename = "private_message")]
    PrivateMessage,
}

impl MessageKind {
    /// Parses a kind a client may post. `status` is reserved for the server.
    pub fn from_client(raw: &str) -> Option<Self> {
        match raw {
            "message" => Some(MessageKind::Message),
            "private_message" => Some(MessageKind::PrivateMessage),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub to: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub time: String,
}

impl Message {
    pub fn new(from: impl Into<String>, content: MessageContent) -> Self {
        Message {
            from: from.into(),
            to: content.to,
            text: content.text,
            kind: content.kind,
            time: clock_time(),
        }
    }

    pub fn status(from: impl Into<String>, text: &str) -> Self {
        Message {
            from: from.into(),
            to: BROADCAST.to_string(),
            text: text.to_string(),
            kind: MessageKind::Status,
            time: clock_time(),
        }
    }

    /// Broadcasts, public chat, and anything the viewer sent or received.
    pub fn is_visible_to(&self, viewer: &str) -> bool {
        self.to == BROADCAST
            || self.from == viewer
            || self.to == viewer
            || self.kind == MessageKind::Message
    }
}

/// Message fields as submitted by a client for a post or an edit.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MessageBody {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A validated [`MessageBody`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageContent {
    pub to: String,
    pub text: String,
    pub kind: MessageKind,
}

impl MessageBody {
    pub fn new(to: &str, text: &str, kind: &str) -> Self {
        MessageBody {
            to: to.to_string(),
            text: text.to_string(),
            kind: kind.to_string(),
        }
    }

    pub fn validate(&self) -> Result<MessageContent, ChatError> {
        let to = self.to.trim();
        if to.is_empty() {
            return Err(ChatError::InvalidArgument("'to' must not be empty".to_string()));
        }
        let text = self.text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidArgument("'text' must not be empty".to_string()));
        }
        let kind = MessageKind::from_client(self.kind.trim()).ok_or_else(|| {
            ChatError::InvalidArgument(format!(
                "'type' must be 'message' or 'private_message', got '{}'",
                self.kind
            ))
        })?;

        Ok(MessageContent {
            to: to.to_string(),
            text: text.to_string(),
            kind,
        })
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn clock_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
