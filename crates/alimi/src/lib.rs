//! ChatAlimi: a writing assistant chat for students.
//!
//! [`ChatSession`] owns the conversation and talks to a [`ChatService`];
//! [`format_message`] renders the assistant's light markup for display.

pub mod api;
pub mod attachment;
pub mod capability;
pub mod config;
pub mod error;
pub mod format;
pub mod message;
pub mod service;
pub mod session;
mod state;
pub mod transcript;

pub use api::OpenAiChatService;
pub use attachment::{EncodedImage, FileCandidate, FileSource};
pub use capability::{detect, BrowserInfo, Capabilities, EnvironmentProbe};
pub use config::Config;
pub use error::{AttachmentError, ConfigError, ServiceError};
pub use format::format_message;
pub use message::{ApiMessage, Message, MessageId, Role};
pub use service::{ChatReply, ChatService};
pub use session::{
    AttachmentStatus, ChatSession, MessageView, Phase, SessionOptions, SessionSnapshot,
    SubmitOutcome,
};
pub use state::PendingAttachment;
pub use transcript::Transcript;
