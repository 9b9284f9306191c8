use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::attachment::{self, FileCandidate};
use crate::capability::{self, Capabilities, EnvironmentProbe};
use crate::config::Config;
use crate::error::AttachmentError;
use crate::format::format_message;
use crate::message::{ApiMessage, Message, MessageId, Role};
use crate::service::{ChatReply, ChatService};
use crate::state::{PendingAttachment, SessionState};
use crate::transcript::Transcript;

/// Appended to the outbound text of a message that carried an image.
pub const IMAGE_NOTE: &str = "\n\n[L'utilisateur a joint une image à ce message]";

const ERROR_PREFIX: &str = "Désolé, ";
const DEFAULT_SERVICE_ERROR: &str =
    "Une erreur s'est produite lors de la communication avec l'IA";
const UPLOAD_UNAVAILABLE: &str = "L'upload d'images n'est pas disponible sur ce navigateur. \
     Si cette fonctionnalité est importante, essayez d'utiliser Chrome, Firefox ou Edge.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingResponse,
    /// Idle with an advisory error shown. Submitting is still allowed.
    IdleWithError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing to send, or a request is already in flight.
    Ignored,
    Answered(MessageId),
    /// The service failed; carries the advisory text now stored as the error.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentStatus {
    Ready,
    /// A newer selection, clear or send happened while decoding.
    Superseded,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub system_prompt: String,
    pub greeting: String,
    pub forward_images: bool,
    pub max_bytes: u64,
    pub max_width: u32,
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            system_prompt: config.chat.system_prompt.clone(),
            greeting: config.chat.greeting.clone(),
            forward_images: config.chat.forward_images,
            max_bytes: config.attachment.max_bytes,
            max_width: config.attachment.max_width,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// A message as the display layer needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageView {
    pub id: MessageId,
    pub role: Role,
    pub timestamp: String,
    /// Raw content, kept for plain-text front-ends.
    pub content: String,
    /// `content` rendered by the formatter.
    pub markup: String,
    /// Data URL of the student's image.
    pub image: Option<String>,
    pub images: Vec<String>,
}

impl From<&Message> for MessageView {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id,
            role: msg.role,
            timestamp: msg.timestamp.clone(),
            content: msg.content.clone(),
            markup: format_message(&msg.content),
            image: msg.image.as_ref().map(|img| img.data_url()),
            images: msg.images.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub messages: Vec<MessageView>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub pending_preview: Option<String>,
    pub attachments_enabled: bool,
}

/// One conversation with the assistant.
///
/// State sits behind a mutex that is never held across an await, so the
/// session can be shared (`Arc<ChatSession<_>>`) between the input loop and
/// whatever renders it.
pub struct ChatSession<S> {
    state: Mutex<SessionState>,
    service: S,
    capabilities: Capabilities,
    options: SessionOptions,
    transcript: Option<Transcript>,
}

impl<S: ChatService> ChatSession<S> {
    /// Start a session. Capabilities are probed here, once.
    pub fn new(service: S, probe: &EnvironmentProbe, options: SessionOptions) -> Self {
        let capabilities = capability::detect(probe);
        let mut state = SessionState::new(&options.system_prompt, &options.greeting);
        if !capabilities.attachments_supported {
            warn!("Image upload unavailable in {}", capabilities.browser.name);
            state.error = Some(UPLOAD_UNAVAILABLE.to_string());
        }

        Self {
            state: Mutex::new(state),
            service,
            capabilities,
            options,
            transcript: None,
        }
    }

    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn transcript(&self) -> Option<&Transcript> {
        self.transcript.as_ref()
    }

    pub fn phase(&self) -> Phase {
        let state = self.state.lock();
        if state.is_loading {
            Phase::AwaitingResponse
        } else if state.error.is_some() {
            Phase::IdleWithError
        } else {
            Phase::Idle
        }
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().is_loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn dismiss_error(&self) {
        self.state.lock().error = None;
    }

    pub fn has_pending_attachment(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Data URL of the decoded pending attachment, once available.
    pub fn pending_preview(&self) -> Option<String> {
        self.state
            .lock()
            .pending
            .as_ref()
            .and_then(|p| p.preview.as_ref())
            .map(|img| img.data_url())
    }

    /// The full conversation, system prompt included.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn visible_messages(&self) -> Vec<Message> {
        self.state.lock().visible().cloned().collect()
    }

    pub fn outbound_messages(&self) -> Vec<ApiMessage> {
        self.state.lock().outbound()
    }

    pub fn views(&self) -> Vec<MessageView> {
        self.state.lock().visible().map(MessageView::from).collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            messages: state.visible().map(MessageView::from).collect(),
            is_loading: state.is_loading,
            error: state.error.clone(),
            pending_preview: state
                .pending
                .as_ref()
                .and_then(|p| p.preview.as_ref())
                .map(|img| img.data_url()),
            attachments_enabled: self.capabilities.attachments_supported,
        }
    }

    /// Validate and decode a selected file into the pending attachment.
    ///
    /// Rejections are also stored as the advisory error. Only the latest
    /// selection's decode result is kept.
    pub async fn select_attachment(
        &self,
        candidate: FileCandidate,
    ) -> Result<AttachmentStatus, AttachmentError> {
        if let Err(e) = attachment::validate(&candidate, &self.capabilities, self.options.max_bytes) {
            self.state.lock().error = Some(e.to_string());
            return Err(e);
        }

        let generation = {
            let mut state = self.state.lock();
            state.attachment_generation += 1;
            state.pending = Some(PendingAttachment {
                file: candidate.clone(),
                preview: None,
            });
            state.attachment_generation
        };

        info!("Decoding attachment {} ({})", candidate.name, candidate.media_type);
        let result = attachment::decode(candidate, self.options.max_width).await;

        let mut state = self.state.lock();
        if state.attachment_generation != generation {
            debug!("Discarding superseded attachment decode (generation {generation})");
            return Ok(AttachmentStatus::Superseded);
        }

        match result {
            Ok(image) => {
                if let Some(pending) = state.pending.as_mut() {
                    pending.preview = Some(image);
                }
                Ok(AttachmentStatus::Ready)
            }
            Err(e) => {
                state.pending = None;
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn clear_attachment(&self) {
        let mut state = self.state.lock();
        state.pending = None;
        state.attachment_generation += 1;
    }

    /// Send the student's text (and pending attachment) and wait for the
    /// assistant.
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        let text = text.trim();

        let (request, user_text) = {
            let mut state = self.state.lock();
            if state.is_loading {
                debug!("Submit ignored: request already in flight");
                return SubmitOutcome::Ignored;
            }
            let image_ready = state
                .pending
                .as_ref()
                .is_some_and(|p| p.preview.is_some());
            if text.is_empty() && !image_ready {
                return SubmitOutcome::Ignored;
            }

            // An attachment still decoding stays pending for the next send.
            let image = if image_ready {
                state.attachment_generation += 1;
                state.pending.take().and_then(|p| p.preview)
            } else {
                if let Some(pending) = &state.pending {
                    warn!("Sending without {}: still decoding", pending.file.name);
                }
                None
            };

            let mut request = state.outbound();
            let message = state.push(Role::User, text);
            message.image = image.clone();
            state.is_loading = true;
            state.error = None;

            let mut content = text.to_string();
            if image.is_some() {
                content.push_str(IMAGE_NOTE);
            }
            request.push(ApiMessage {
                role: Role::User,
                content,
                image: image.filter(|_| self.options.forward_images),
            });
            (request, text.to_string())
        };

        info!("Sending {} messages to chat service", request.len());
        let result = self.service.get_chat_response(request).await;

        let mut state = self.state.lock();
        state.is_loading = false;
        match result {
            Ok(reply) => {
                let (content, images) = match reply {
                    ChatReply::Text(text) => (text, Vec::new()),
                    ChatReply::Structured { text, images } => (text, images),
                };
                let message = state.push(Role::Assistant, &content);
                message.images = images;
                let id = message.id;
                drop(state);

                if let Some(transcript) = &self.transcript {
                    transcript.log_exchange(&user_text, &content);
                }
                SubmitOutcome::Answered(id)
            }
            Err(err) => {
                warn!("Chat service failed: {err:?}");
                let reason = err
                    .message()
                    .unwrap_or_else(|| DEFAULT_SERVICE_ERROR.to_string());
                let advisory = format!("{ERROR_PREFIX}{reason}");
                state.error = Some(advisory.clone());
                SubmitOutcome::Failed(advisory)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::attachment::tests::png_bytes;
    use crate::attachment::EncodedImage;
    use crate::error::ServiceError;
    use crate::service::testing::ScriptedService;

    fn probe() -> EnvironmentProbe {
        EnvironmentProbe {
            file: true,
            file_reader: true,
            file_list: true,
            blob: true,
            user_agent: Some("Mozilla/5.0 Firefox/128.0".into()),
        }
    }

    fn session(service: ScriptedService) -> ChatSession<ScriptedService> {
        ChatSession::new(service, &probe(), SessionOptions::default())
    }

    /// Big enough that decoding is still running when a concurrent submit
    /// is polled.
    fn large_png() -> FileCandidate {
        FileCandidate::from_bytes("grande.png", "image/png", png_bytes(2400, 1600))
    }

    fn png(name: &str, width: u32) -> FileCandidate {
        FileCandidate::from_bytes(name, "image/png", png_bytes(width, 2))
    }

    #[test]
    fn starts_with_hidden_system_message() {
        let session = session(ScriptedService::new());
        assert_eq!(session.messages().len(), 2);
        let visible = session.visible_messages();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].role, Role::Assistant);
        assert_eq!(session.outbound_messages()[0].role, Role::System);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn unsupported_environment_starts_with_advisory() {
        let session = ChatSession::new(
            ScriptedService::new(),
            &EnvironmentProbe::default(),
            SessionOptions::default(),
        );
        assert!(!session.capabilities().attachments_supported);
        assert_eq!(session.phase(), Phase::IdleWithError);
        assert!(session.error().unwrap().contains("upload d'images"));
    }

    #[tokio::test]
    async fn empty_submission_is_ignored() {
        let session = session(ScriptedService::new());
        assert_eq!(session.submit("").await, SubmitOutcome::Ignored);
        assert_eq!(session.submit("   \n").await, SubmitOutcome::Ignored);
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.error(), None);
    }

    #[tokio::test]
    async fn plain_reply_is_appended() {
        let service = ScriptedService::new().reply(Ok(ChatReply::Text("hi".into())));
        let session = session(service);

        let outcome = session.submit("  hello ").await;
        assert!(matches!(outcome, SubmitOutcome::Answered(MessageId(4))));

        let messages = session.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, Role::User);
        assert_eq!(messages[2].content, "hello");
        assert_eq!(messages[3].role, Role::Assistant);
        assert_eq!(messages[3].content, "hi");
        assert!(messages[3].images.is_empty());
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn request_carries_history_and_new_message() {
        let service = ScriptedService::new()
            .reply(Ok(ChatReply::Text("un".into())))
            .reply(Ok(ChatReply::Text("deux".into())));
        let session = session(service);
        session.submit("premier").await;
        session.submit("second").await;

        let request = session.service.last_request().unwrap();
        let roles: Vec<_> = request.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            [Role::System, Role::Assistant, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(request[4].content, "second");
        assert_eq!(request[3].content, "un");
        assert!(request.iter().all(|m| m.image.is_none()));
    }

    #[tokio::test]
    async fn structured_reply_keeps_images() {
        let service = ScriptedService::new().reply(Ok(ChatReply::Structured {
            text: "hi".into(),
            images: vec!["u1".into()],
        }));
        let session = session(service);
        session.submit("dessine").await;

        let last = session.messages().pop().unwrap();
        assert_eq!(last.content, "hi");
        assert_eq!(last.images, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn failure_sets_error_without_assistant_message() {
        let service = ScriptedService::new().reply(Err(ServiceError::Other("quota dépassé".into())));
        let session = session(service);

        let outcome = session.submit("hello").await;
        assert_eq!(outcome, SubmitOutcome::Failed("Désolé, quota dépassé".into()));
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.messages()[2].role, Role::User);
        assert_eq!(session.error().as_deref(), Some("Désolé, quota dépassé"));
        assert_eq!(session.phase(), Phase::IdleWithError);
    }

    #[tokio::test]
    async fn unknown_failure_uses_default_text() {
        let service = ScriptedService::new().reply(Err(ServiceError::Unknown));
        let session = session(service);
        session.submit("hello").await;
        assert_eq!(
            session.error().unwrap(),
            "Désolé, Une erreur s'est produite lors de la communication avec l'IA"
        );
    }

    #[tokio::test]
    async fn session_recovers_after_failure() {
        let service = ScriptedService::new()
            .reply(Err(ServiceError::Timeout))
            .reply(Ok(ChatReply::Text("ok".into())));
        let session = session(service);
        session.submit("a").await;
        assert!(session.error().is_some());

        session.submit("b").await;
        assert_eq!(session.error(), None);
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.messages().last().unwrap().content, "ok");
    }

    #[tokio::test]
    async fn second_submit_while_awaiting_is_ignored() {
        let (service, gate) = ScriptedService::gated();
        let session = Arc::new(session(service.reply(Ok(ChatReply::Text("fini".into())))));

        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.submit("un").await })
        };
        while !session.is_loading() {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.phase(), Phase::AwaitingResponse);

        assert_eq!(session.submit("deux").await, SubmitOutcome::Ignored);
        assert_eq!(session.messages().len(), 3);

        gate.notify_one();
        assert!(matches!(first.await.unwrap(), SubmitOutcome::Answered(_)));
        assert_eq!(session.messages().len(), 4);
        assert_eq!(session.service.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn end_to_end_greeting_exchange() {
        let (service, gate) = ScriptedService::gated();
        let session = Arc::new(session(service.reply(Ok(ChatReply::Text("Salut !".into())))));
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.views().len(), 1);

        let pending = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.submit("Bonjour").await })
        };
        while !session.is_loading() {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.views().len(), 2);

        gate.notify_one();
        pending.await.unwrap();

        let views = session.views();
        assert_eq!(views.len(), 3);
        let last = views.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Salut !");
    }

    #[tokio::test]
    async fn image_only_submission_sends_note() {
        let service = ScriptedService::new().reply(Ok(ChatReply::Text("Belle écriture".into())));
        let session = session(service);

        let status = session.select_attachment(png("copie.png", 4)).await.unwrap();
        assert_eq!(status, AttachmentStatus::Ready);
        assert!(session.pending_preview().unwrap().starts_with("data:image/png;base64,"));

        session.submit("").await;
        let messages = session.messages();
        let user = &messages[2];
        assert_eq!(user.content, "");
        assert!(user.image.is_some());
        assert!(!session.has_pending_attachment());

        let request = session.service.last_request().unwrap();
        let last = request.last().unwrap();
        assert_eq!(last.content, IMAGE_NOTE);
        assert!(last.image.is_none());
    }

    #[tokio::test]
    async fn forwarding_sends_image_bytes() {
        let service = ScriptedService::new().reply(Ok(ChatReply::Text("vu".into())));
        let options = SessionOptions {
            forward_images: true,
            ..SessionOptions::default()
        };
        let session = ChatSession::new(service, &probe(), options);
        session.select_attachment(png("copie.png", 4)).await.unwrap();
        session.submit("Regarde").await;

        let request = session.service.last_request().unwrap();
        let last = request.last().unwrap();
        assert_eq!(last.content, format!("Regarde{IMAGE_NOTE}"));
        let image: &EncodedImage = last.image.as_ref().unwrap();
        assert_eq!(image.media_type, "image/png");
    }

    #[tokio::test]
    async fn rejected_attachment_is_advisory() {
        let session = session(ScriptedService::new());
        let candidate = FileCandidate::from_bytes("notes.txt", "text/plain", b"bonjour".to_vec());

        let err = session.select_attachment(candidate).await.unwrap_err();
        assert!(matches!(err, AttachmentError::UnsupportedType { .. }));
        assert!(session.error().unwrap().contains("text/plain"));
        assert!(!session.has_pending_attachment());
        assert_eq!(session.phase(), Phase::IdleWithError);

        session.dismiss_error();
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn decode_failure_clears_pending() {
        let session = session(ScriptedService::new());
        let candidate = FileCandidate::from_bytes("faux.png", "image/png", b"garbage".to_vec());
        let err = session.select_attachment(candidate).await.unwrap_err();
        assert!(matches!(err, AttachmentError::DecodeFailed { .. }));
        assert!(!session.has_pending_attachment());
        assert!(session.error().unwrap().contains("faux.png"));
    }

    #[tokio::test]
    async fn latest_selection_wins() {
        let session = session(ScriptedService::new());
        let bytes = png_bytes(7, 2);
        let expected = EncodedImage::from_bytes("image/png", &bytes);
        let second = FileCandidate::from_bytes("second.png", "image/png", bytes);

        let (a, b) = tokio::join!(
            session.select_attachment(png("first.png", 3)),
            session.select_attachment(second)
        );
        assert!(a.is_ok());
        assert_eq!(b.unwrap(), AttachmentStatus::Ready);
        assert_eq!(session.pending_preview(), Some(expected.data_url()));
    }

    #[tokio::test]
    async fn empty_submit_waits_for_decoding_image() {
        let service = ScriptedService::new().reply(Ok(ChatReply::Text("Merci".into())));
        let session = session(service);

        let (selected, outcome) = tokio::join!(
            session.select_attachment(large_png()),
            session.submit("")
        );
        assert_eq!(selected.unwrap(), AttachmentStatus::Ready);
        assert_eq!(outcome, SubmitOutcome::Ignored);
        assert_eq!(session.messages().len(), 2);
        assert!(session.pending_preview().is_some());

        session.submit("").await;
        let messages = session.messages();
        assert_eq!(messages.len(), 4);
        assert!(messages[2].image.is_some());
        assert!(!session.has_pending_attachment());
    }

    #[tokio::test]
    async fn text_submit_keeps_decoding_image_pending() {
        let service = ScriptedService::new().reply(Ok(ChatReply::Text("Bonjour".into())));
        let session = session(service);

        let (selected, outcome) = tokio::join!(
            session.select_attachment(large_png()),
            session.submit("Bonjour")
        );
        assert_eq!(selected.unwrap(), AttachmentStatus::Ready);
        assert!(matches!(outcome, SubmitOutcome::Answered(_)));

        let user = &session.messages()[2];
        assert_eq!(user.content, "Bonjour");
        assert!(user.image.is_none());
        let request = session.service.last_request().unwrap();
        assert_eq!(request.last().unwrap().content, "Bonjour");
        assert!(session.pending_preview().is_some());
    }

    #[tokio::test]
    async fn clear_discards_pending() {
        let session = session(ScriptedService::new());
        session.select_attachment(png("a.png", 2)).await.unwrap();
        session.clear_attachment();
        assert!(!session.has_pending_attachment());
        assert_eq!(session.pending_preview(), None);
        assert_eq!(session.submit("  ").await, SubmitOutcome::Ignored);
    }

    #[tokio::test]
    async fn views_render_markup() {
        let service = ScriptedService::new()
            .reply(Ok(ChatReply::Text("**Bravo**\nConseil : relis-toi".into())));
        let session = session(service);
        session.submit("Voici mon texte").await;

        let snapshot = session.snapshot();
        assert!(snapshot.attachments_enabled);
        assert!(!snapshot.is_loading);
        let last = snapshot.messages.last().unwrap();
        assert_eq!(
            last.markup,
            r#"<strong>Bravo</strong><br/><span class="text-success">Conseil : relis-toi</span>"#
        );
        assert!(snapshot.messages[0].markup.contains("<strong>ChatAlimi</strong>"));
    }

    #[tokio::test]
    async fn transcript_records_exchanges() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Transcript::create(dir.path(), "test").unwrap();
        let service = ScriptedService::new()
            .reply(Ok(ChatReply::Text("Salut !".into())))
            .reply(Err(ServiceError::Timeout));
        let session = session(service).with_transcript(transcript);

        session.submit("Bonjour").await;
        session.submit("Encore").await;

        let path = session.transcript().unwrap().path();
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("Bonjour"));
        assert!(contents.contains("Salut !"));
        assert!(!contents.contains("Encore"));
    }
}
