use std::future::Future;

use crate::error::ServiceError;
use crate::message::ApiMessage;

/// What a chat service answers: plain text, or text with images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatReply {
    Text(String),
    Structured { text: String, images: Vec<String> },
}

/// The remote assistant. One call per submission, no streaming.
pub trait ChatService: Send + Sync {
    fn get_chat_response(
        &self,
        messages: Vec<ApiMessage>,
    ) -> impl Future<Output = Result<ChatReply, ServiceError>> + Send;
}
