use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;

/// Environment variable that supplies the API key when the file has none.
pub const API_KEY_ENV: &str = "ALIMI_API_KEY";

/// Default file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub attachment: AttachmentConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Also send the attached image to the service as an `image_url` part.
    /// Off by default: only a textual note about the attachment is sent.
    #[serde(default)]
    pub forward_images: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AttachmentConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// Wider images are downscaled to this width and re-encoded as PNG.
    #[serde(default = "default_max_width")]
    pub max_width: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,
    /// Override the log directory. Default: "logs/" in the working directory.
    pub directory: Option<String>,
}

fn default_endpoint() -> String { "https://api.openai.com/v1/chat/completions".into() }
fn default_model() -> String { "gpt-4o-mini".into() }
fn default_max_tokens() -> u32 { 1024 }
fn default_timeout_secs() -> u64 { 60 }
fn default_max_bytes() -> u64 { 5 * 1024 * 1024 }
fn default_max_width() -> u32 { 1920 }
fn default_logging_enabled() -> bool { true }

fn default_system_prompt() -> String {
    "You are ChatAlimi, an educational assistant helping students improve their written \
     productions. Reply in French and be supportive. Use formatting such as **bold** for \
     important points, *italics* for emphasis, and _underlined_ for corrections. Start \
     guidance with 'Conseil :' and warnings with 'Attention :'. When appropriate, you can \
     send images to illustrate your explanations. You can analyze images sent by the user \
     and provide feedback on them."
        .into()
}

fn default_greeting() -> String {
    "Bonjour ! Je suis **ChatAlimi**, ton assistant pour t'aider avec tes productions \
     écrites. Comment puis-je t'aider aujourd'hui ?"
        .into()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            greeting: default_greeting(),
            forward_images: false,
        }
    }
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            max_width: default_max_width(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            directory: None,
        }
    }
}

impl LoggingConfig {
    pub fn log_directory(&self) -> PathBuf {
        match self.directory {
            Some(ref custom) => PathBuf::from(custom),
            None => PathBuf::from("logs"),
        }
    }
}

impl Config {
    /// Strict parse, for callers that want to report a broken file.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load the config, falling back to defaults when the file is missing or
    /// broken. `ALIMI_API_KEY` fills in an empty `api.key`.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

        let mut config = match Self::read(&path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(ConfigError::Read { .. }) => {
                warn!("{} not found, using defaults", path.display());
                Config::default()
            }
            Err(e) => {
                warn!("Failed to parse {}: {e}", path.display());
                Config::default()
            }
        };

        if config.api.key.is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                config.api.key = key;
            }
        }
        config
    }
}
