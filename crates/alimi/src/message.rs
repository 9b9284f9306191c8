use std::fmt;

use chrono::Local;
use serde::Serialize;

use crate::attachment::EncodedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry of the conversation. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Local time `HH:MM`, fixed at creation.
    pub timestamp: String,
    /// Image attached by the student (user messages only).
    pub image: Option<EncodedImage>,
    /// Images returned by the assistant, as URLs or data URLs.
    pub images: Vec<String>,
}

impl Message {
    pub(crate) fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp: display_time(),
            image: None,
            images: Vec::new(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.role != Role::System
    }
}

fn display_time() -> String {
    Local::now().format("%H:%M").to_string()
}

/// The `{role, content}` projection sent to a chat service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiMessage {
    pub role: Role,
    pub content: String,
    /// Set only when image forwarding is enabled.
    pub image: Option<EncodedImage>,
}

impl From<&Message> for ApiMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            image: None,
        }
    }
}
