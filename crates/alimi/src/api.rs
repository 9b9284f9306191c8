use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::ServiceError;
use crate::message::ApiMessage;
use crate::service::{ChatReply, ChatService};

/// Client for an OpenAI-compatible `/v1/chat/completions` endpoint
/// (OpenAI, OpenRouter, Ollama, LM Studio).
pub struct OpenAiChatService {
    client: reqwest::Client,
    endpoint: String,
    key: String,
    model: String,
    max_tokens: u32,
}

// --- Request structs ---

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: OaiContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OaiContent {
    Text(String),
    Parts(Vec<OaiContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum OaiContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize, Deserialize)]
struct ImageUrl {
    url: String,
}

// --- Response structs ---

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    /// Generated images, as returned by OpenRouter image-capable models.
    #[serde(default)]
    images: Vec<ResponseImage>,
}

#[derive(Deserialize)]
struct ResponseImage {
    image_url: ImageUrl,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

impl OpenAiChatService {
    pub fn new(config: &ApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: config.endpoint.clone(),
            key: config.key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    fn build_request(&self, messages: Vec<ApiMessage>) -> ChatCompletionRequest<'_> {
        let messages = messages
            .into_iter()
            .map(|msg| {
                let content = match msg.image {
                    Some(image) => OaiContent::Parts(vec![
                        OaiContentPart::Text { text: msg.content },
                        OaiContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: image.data_url(),
                            },
                        },
                    ]),
                    None => OaiContent::Text(msg.content),
                };
                OaiMessage {
                    role: msg.role.as_str(),
                    content,
                }
            })
            .collect();

        ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            stream: false,
        }
    }
}

impl ChatService for OpenAiChatService {
    async fn get_chat_response(&self, messages: Vec<ApiMessage>) -> Result<ChatReply, ServiceError> {
        let request = self.build_request(messages);

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json");
        if !self.key.is_empty() {
            builder = builder.bearer_auth(&self.key);
        }

        let response = builder.json(&request).send().await.map_err(|e| {
            if e.is_timeout() {
                ServiceError::Timeout
            } else if e.is_connect() {
                ServiceError::Connect {
                    endpoint: self.endpoint.clone(),
                }
            } else {
                ServiceError::Other(format!("erreur réseau : {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Chat service returned HTTP {status}");
            return Err(status_error(status.as_u16(), &body));
        }

        let body = response.text().await.map_err(|_| ServiceError::InvalidResponse)?;
        debug!("Chat service replied with {} bytes", body.len());
        parse_reply(&body)
    }
}

fn status_error(code: u16, body: &str) -> ServiceError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error.message)
        .filter(|m| !m.trim().is_empty());

    let message = match code {
        400 => "requête invalide. Essaie un message plus court.".to_string(),
        401 | 403 => "clé API invalide. Vérifie config.toml.".to_string(),
        429 => "trop de requêtes. Réessaie dans un instant.".to_string(),
        500 | 502 | 503 => "le serveur de l'IA est indisponible. Réessaie.".to_string(),
        code => match detail {
            Some(detail) => format!("erreur de l'API (HTTP {code}) : {detail}"),
            None => format!("erreur de l'API (HTTP {code})."),
        },
    };
    ServiceError::Http { status: code, message }
}

fn parse_reply(body: &str) -> Result<ChatReply, ServiceError> {
    let response: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|_| ServiceError::InvalidResponse)?;

    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or(ServiceError::EmptyResponse)?;

    let text = message.content.unwrap_or_default();
    let images: Vec<String> = message.images.into_iter().map(|i| i.image_url.url).collect();

    if !images.is_empty() {
        Ok(ChatReply::Structured { text, images })
    } else if text.is_empty() {
        Err(ServiceError::EmptyResponse)
    } else {
        Ok(ChatReply::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::EncodedImage;
    use crate::message::Role;

    fn service() -> OpenAiChatService {
        OpenAiChatService::new(&ApiConfig::default())
    }

    #[test]
    fn request_uses_plain_text_without_image() {
        let service = service();
        let request = service.build_request(vec![
            ApiMessage {
                role: Role::System,
                content: "sys".into(),
                image: None,
            },
            ApiMessage {
                role: Role::User,
                content: "Bonjour".into(),
                image: None,
            },
        ]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Bonjour");
    }

    #[test]
    fn request_adds_image_part_when_forwarded() {
        let service = service();
        let request = service.build_request(vec![ApiMessage {
            role: Role::User,
            content: "Regarde".into(),
            image: Some(EncodedImage {
                media_type: "image/png".into(),
                data: "AAAA".into(),
            }),
        }]);
        let json = serde_json::to_value(&request).unwrap();
        let parts = &json["messages"][0]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "Regarde");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn parses_plain_reply() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Salut !"}}]}"#;
        assert_eq!(parse_reply(body).unwrap(), ChatReply::Text("Salut !".into()));
    }

    #[test]
    fn parses_reply_with_images() {
        let body = r#"{"choices":[{"message":{"content":"Voici","images":[
            {"type":"image_url","image_url":{"url":"data:image/png;base64,QQ=="}}]}}]}"#;
        assert_eq!(
            parse_reply(body).unwrap(),
            ChatReply::Structured {
                text: "Voici".into(),
                images: vec!["data:image/png;base64,QQ==".into()],
            }
        );
    }

    #[test]
    fn empty_or_malformed_replies_fail() {
        assert_eq!(parse_reply(r#"{"choices":[]}"#), Err(ServiceError::EmptyResponse));
        assert_eq!(
            parse_reply(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(ServiceError::EmptyResponse)
        );
        assert_eq!(parse_reply("<html>"), Err(ServiceError::InvalidResponse));
    }

    #[test]
    fn status_codes_map_to_messages() {
        let err = status_error(401, "");
        assert_eq!(err.message().unwrap(), "clé API invalide. Vérifie config.toml.");

        let err = status_error(418, r#"{"error":{"message":"teapot"}}"#);
        assert_eq!(err.message().unwrap(), "erreur de l'API (HTTP 418) : teapot");

        let err = status_error(404, "not json");
        assert_eq!(err.message().unwrap(), "erreur de l'API (HTTP 404).");
    }
}
