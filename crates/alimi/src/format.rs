//! Lightweight markup used by the assistant, rendered to HTML fragments.
//!
//! The rules are applied in a fixed order. Bold runs before italic so that
//! `**` is never consumed as two single `*` markers. The input is trusted:
//! HTML already present in the text passes through untouched.

use once_cell::sync::Lazy;
use regex::Regex;

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").unwrap());
static UNDERLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_(.*?)_").unwrap());
static ADVICE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(Conseil :.*)").unwrap());
static WARNING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(Attention :.*)").unwrap());

/// Convert message text into an HTML fragment.
///
/// `**x**` becomes bold, `*x*` italic, `_x_` underlined. Everything from a
/// `Conseil :` or `Attention :` marker to the end of its line is wrapped in
/// an advice or warning span, and newlines become `<br/>`.
pub fn format_message(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let html = BOLD.replace_all(text, "<strong>${1}</strong>");
    let html = ITALIC.replace_all(&html, "<em>${1}</em>");
    let html = UNDERLINE.replace_all(&html, "<u>${1}</u>");
    let html = ADVICE.replace_all(&html, r#"<span class="text-success">${1}</span>"#);
    let html = WARNING.replace_all(&html, r#"<span class="text-warning">${1}</span>"#);

    html.replace('\n', "<br/>")
}
