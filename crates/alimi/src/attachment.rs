use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use image::ImageFormat;
use tracing::{debug, info, warn};

use crate::capability::Capabilities;
use crate::error::{mib, AttachmentError};

/// Where the bytes of a selected file live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// A file the student picked, described by what it declares about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    pub name: String,
    pub media_type: String,
    pub size_bytes: u64,
    pub source: FileSource,
}

impl FileCandidate {
    /// Describe a file on disk. The media type is guessed from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let media_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            name,
            media_type,
            size_bytes: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            size_bytes: bytes.len() as u64,
            source: FileSource::Bytes(bytes),
        }
    }
}

/// An image carried inline as base64, ready to embed as a data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub media_type: String,
    pub data: String,
}

impl EncodedImage {
    pub fn from_bytes(media_type: &str, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// Check a candidate against the session capabilities, its declared type and
/// the size limit, in that order.
pub fn validate(
    candidate: &FileCandidate,
    capabilities: &Capabilities,
    max_bytes: u64,
) -> Result<(), AttachmentError> {
    if !capabilities.attachments_supported {
        return Err(AttachmentError::CapabilityUnavailable {
            browser: capabilities.browser.name.clone(),
        });
    }

    if !candidate.media_type.starts_with("image/") {
        info!("Rejected attachment {}: type {}", candidate.name, candidate.media_type);
        return Err(AttachmentError::UnsupportedType {
            media_type: candidate.media_type.clone(),
        });
    }

    if candidate.size_bytes > max_bytes {
        info!(
            "Rejected attachment {}: {:.2} MiB",
            candidate.name,
            mib(&candidate.size_bytes)
        );
        return Err(AttachmentError::TooLarge {
            size_bytes: candidate.size_bytes,
            max_bytes,
        });
    }

    Ok(())
}

/// Read and decode the candidate off the async runtime. Images wider than
/// `max_width` are downscaled and re-encoded as PNG; others keep their bytes.
/// Types the image crate cannot read are passed through undecoded.
pub async fn decode(candidate: FileCandidate, max_width: u32) -> Result<EncodedImage, AttachmentError> {
    let name = candidate.name.clone();
    match tokio::task::spawn_blocking(move || decode_blocking(&candidate, max_width)).await {
        Ok(result) => result,
        Err(e) => Err(AttachmentError::DecodeFailed {
            name,
            reason: Some(e.to_string()),
        }),
    }
}

fn decode_blocking(candidate: &FileCandidate, max_width: u32) -> Result<EncodedImage, AttachmentError> {
    let failed = |reason: String| AttachmentError::DecodeFailed {
        name: candidate.name.clone(),
        reason: Some(reason),
    };

    let owned;
    let bytes: &[u8] = match candidate.source {
        FileSource::Path(ref path) => {
            owned = std::fs::read(path).map_err(|e| failed(e.to_string()))?;
            &owned
        }
        FileSource::Bytes(ref bytes) => bytes,
    };

    // Formats the image crate cannot read (SVG, HEIC, ...) are embedded as-is.
    let readable = ImageFormat::from_mime_type(&candidate.media_type)
        .is_some_and(|format| format.reading_enabled());
    if !readable {
        debug!("Embedding {} ({}) without decoding", candidate.name, candidate.media_type);
        return Ok(EncodedImage::from_bytes(&candidate.media_type, bytes));
    }

    let img = image::load_from_memory(bytes).map_err(|e| {
        warn!("Could not decode {}: {e}", candidate.name);
        failed(e.to_string())
    })?;

    let (width, height) = (img.width(), img.height());
    if max_width == 0 || width <= max_width {
        debug!("Decoded {} ({width}x{height})", candidate.name);
        return Ok(EncodedImage::from_bytes(&candidate.media_type, bytes));
    }

    let new_height = ((height as f64 * max_width as f64 / width as f64) as u32).max(1);
    let resized = img.resize_exact(max_width, new_height, FilterType::Triangle);

    let mut png_buf = Cursor::new(Vec::new());
    resized
        .write_to(&mut png_buf, ImageFormat::Png)
        .map_err(|e| failed(e.to_string()))?;

    info!(
        "Downscaled {} from {width}x{height} to {max_width}x{new_height}",
        candidate.name
    );
    Ok(EncodedImage::from_bytes("image/png", &png_buf.into_inner()))
}
