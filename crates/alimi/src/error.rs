use thiserror::Error;

pub(crate) const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Reasons an image attachment is refused. The `Display` text is what the
/// student sees in the advisory banner.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttachmentError {
    #[error(
        "Le fichier sélectionné ({media_type}) n'est pas une image. Types acceptés: jpg, png, gif, webp."
    )]
    UnsupportedType { media_type: String },

    #[error(
        "L'image est trop volumineuse ({:.2} Mo). Maximum {:.0} Mo.",
        mib(.size_bytes),
        mib(.max_bytes)
    )]
    TooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("Impossible de lire le fichier image ({name}). Erreur: {}", reason_text(.reason))]
    DecodeFailed { name: String, reason: Option<String> },

    #[error(
        "Votre navigateur ({browser}) ne prend pas en charge l'upload d'images. Veuillez utiliser un navigateur plus récent comme Chrome, Firefox ou Edge."
    )]
    CapabilityUnavailable { browser: String },
}

pub(crate) fn mib(bytes: &u64) -> f64 {
    *bytes as f64 / BYTES_PER_MIB
}

fn reason_text(reason: &Option<String>) -> &str {
    reason.as_deref().unwrap_or("inconnue")
}

/// Failures reported by a chat service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("la requête a expiré. Réessaie.")]
    Timeout,

    #[error("impossible de joindre le service de chat ({endpoint}).")]
    Connect { endpoint: String },

    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("réponse inattendue du service de chat.")]
    InvalidResponse,

    #[error("réponse vide du service de chat.")]
    EmptyResponse,

    #[error("{0}")]
    Other(String),

    /// A failure that carried no message at all.
    #[error("erreur inconnue")]
    Unknown,
}

impl ServiceError {
    /// Human-readable message, if the failure carried one.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Unknown => None,
            Self::Other(msg) if msg.trim().is_empty() => None,
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_reports_mib_with_two_decimals() {
        let err = AttachmentError::TooLarge {
            size_bytes: 6_291_456,
            max_bytes: 5_242_880,
        };
        let msg = err.to_string();
        assert!(msg.contains("6.00"), "{msg}");
        assert!(msg.contains("Maximum 5 Mo"), "{msg}");
    }

    #[test]
    fn unsupported_type_names_the_type() {
        let err = AttachmentError::UnsupportedType {
            media_type: "text/plain".into(),
        };
        assert!(err.to_string().contains("text/plain"));
    }

    #[test]
    fn decode_failure_defaults_reason() {
        let err = AttachmentError::DecodeFailed {
            name: "a.png".into(),
            reason: None,
        };
        assert!(err.to_string().ends_with("Erreur: inconnue"));
    }

    #[test]
    fn service_message_absent_for_unknown() {
        assert_eq!(ServiceError::Unknown.message(), None);
        assert_eq!(ServiceError::Other("  ".into()).message(), None);
        assert_eq!(
            ServiceError::Other("quota dépassé".into()).message().as_deref(),
            Some("quota dépassé")
        );
    }
}
