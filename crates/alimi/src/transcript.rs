use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

/// Plain-text log of one chat session, one file per session.
#[derive(Debug, Clone)]
pub struct Transcript {
    path: PathBuf,
}

impl Transcript {
    /// Create `<label>_<timestamp>.txt` in `dir` and write its header.
    /// Returns None if the file cannot be created; logging never blocks chat.
    pub fn create(dir: &Path, label: &str) -> Option<Self> {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("Cannot create transcript directory {}: {e}", dir.display());
            return None;
        }

        let slug = label
            .replace(' ', "-")
            .replace(|c: char| !c.is_alphanumeric() && c != '-', "");
        let slug = if slug.is_empty() { "Session".to_string() } else { slug };

        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let path = dir.join(format!("{slug}_{timestamp}.txt"));

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)
            .ok()?;

        let header = format!(
            "=== ChatAlimi - Journal de session ===\nSession: {label}\nDate: {}\n======================================\n\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        file.write_all(header.as_bytes()).ok()?;

        info!("Transcript: {}", path.display());
        Some(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a student/assistant pair. Failures are ignored.
    pub fn log_exchange(&self, user_msg: &str, assistant_msg: &str) {
        let Ok(mut file) = OpenOptions::new().append(true).open(&self.path) else {
            return;
        };

        let now = Local::now().format("%H:%M:%S");
        let entry = format!("[{now}] Élève:\n{user_msg}\n\n[{now}] ChatAlimi:\n{assistant_msg}\n\n");
        let _ = file.write_all(entry.as_bytes());
    }
}
