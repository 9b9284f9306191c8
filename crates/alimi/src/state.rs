use crate::attachment::{EncodedImage, FileCandidate};
use crate::message::{ApiMessage, Message, MessageId, Role};

/// A file selected but not sent yet. `preview` stays None until decoding
/// finishes.
#[derive(Debug, Clone)]
pub struct PendingAttachment {
    pub file: FileCandidate,
    pub preview: Option<EncodedImage>,
}

/// Everything the controller mutates. Lives behind a single mutex.
#[derive(Debug)]
pub(crate) struct SessionState {
    /// Append-only. The system prompt is always first.
    pub messages: Vec<Message>,
    pub pending: Option<PendingAttachment>,
    /// True while a request is outstanding; further submissions are ignored.
    pub is_loading: bool,
    pub error: Option<String>,
    /// Bumped on every selection, clear and send. Decode tasks compare
    /// against it before writing their result.
    pub attachment_generation: u64,
    next_id: u64,
}

impl SessionState {
    pub fn new(system_prompt: &str, greeting: &str) -> Self {
        let mut state = Self {
            messages: Vec::new(),
            pending: None,
            is_loading: false,
            error: None,
            attachment_generation: 0,
            next_id: 1,
        };
        state.push(Role::System, system_prompt);
        state.push(Role::Assistant, greeting);
        state
    }

    pub fn next_id(&mut self) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn push(&mut self, role: Role, content: &str) -> &mut Message {
        let id = self.next_id();
        self.messages.push(Message::new(id, role, content));
        let last = self.messages.len() - 1;
        &mut self.messages[last]
    }

    pub fn visible(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_visible())
    }

    /// Every stored message, system prompt included, as `{role, content}`.
    pub fn outbound(&self) -> Vec<ApiMessage> {
        self.messages.iter().map(ApiMessage::from).collect()
    }
}
