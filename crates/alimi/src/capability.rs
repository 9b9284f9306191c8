use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

/// Environment variable that overrides the reported user agent.
pub const USER_AGENT_ENV: &str = "ALIMI_USER_AGENT";

const UNKNOWN_BROWSER: &str = "Autre navigateur";
const UNKNOWN_VERSION: &str = "Non détecté";

/// Ordered browser families. The first matching pattern wins, so a Chromium
/// based Edge user agent reports "Chrome".
static BROWSERS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)chrome|chromium|crios", "Chrome"),
        (r"(?i)firefox|fxios", "Firefox"),
        (r"(?i)safari", "Safari"),
        (r"(?i)edg", "Edge"),
    ]
    .into_iter()
    .map(|(pattern, name)| (Regex::new(pattern).unwrap(), name))
    .collect()
});

/// Raw feature flags reported by the host environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentProbe {
    pub file: bool,
    pub file_reader: bool,
    pub file_list: bool,
    pub blob: bool,
    pub user_agent: Option<String>,
}

impl EnvironmentProbe {
    /// Probe the running process. Local file access stands in for the file
    /// and blob APIs; the user agent comes from `ALIMI_USER_AGENT`, then the
    /// configured value, then `alimi/<version> (<os>)`.
    pub fn from_process(configured_user_agent: Option<&str>) -> Self {
        let files = match std::env::current_dir() {
            Ok(dir) => dir.metadata().is_ok(),
            Err(e) => {
                warn!("Current directory is not accessible: {e}");
                false
            }
        };

        let user_agent = std::env::var(USER_AGENT_ENV)
            .ok()
            .filter(|ua| !ua.trim().is_empty())
            .or_else(|| configured_user_agent.map(str::to_string))
            .unwrap_or_else(|| {
                format!(
                    "alimi/{} ({})",
                    env!("CARGO_PKG_VERSION"),
                    std::env::consts::OS
                )
            });

        Self {
            file: files,
            file_reader: files,
            file_list: files,
            blob: files,
            user_agent: Some(user_agent),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserInfo {
    pub name: String,
    pub version: String,
}

/// What the session may offer, resolved once at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub attachments_supported: bool,
    pub browser: BrowserInfo,
}

/// Derive session capabilities from a probe. Never fails: missing features
/// only turn attachments off.
pub fn detect(probe: &EnvironmentProbe) -> Capabilities {
    let attachments_supported = probe.file && probe.file_reader && probe.file_list && probe.blob;
    let name = probe
        .user_agent
        .as_deref()
        .map(browser_name)
        .unwrap_or(UNKNOWN_BROWSER);

    let caps = Capabilities {
        attachments_supported,
        browser: BrowserInfo {
            name: name.to_string(),
            version: UNKNOWN_VERSION.to_string(),
        },
    };
    info!(
        "Capabilities: attachments={}, browser={}",
        caps.attachments_supported, caps.browser.name
    );
    caps
}

fn browser_name(user_agent: &str) -> &'static str {
    BROWSERS
        .iter()
        .find(|(re, _)| re.is_match(user_agent))
        .map(|(_, name)| *name)
        .unwrap_or(UNKNOWN_BROWSER)
}
