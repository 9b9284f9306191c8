use std::fmt::Write;
use std::path::Path;

use alimi::{MessageView, Role, SessionSnapshot};

/// Render the visible conversation as a standalone HTML page.
pub fn render_page(snapshot: &SessionSnapshot) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html lang=\"fr\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>ChatAlimi</title>\n<style>\n\
         body { font-family: sans-serif; max-width: 850px; margin: 2em auto; }\n\
         .message { padding: 0.8em; border-radius: 0.5em; margin: 0.6em 0; max-width: 80%; }\n\
         .user { background: #0d6efd; color: #fff; margin-left: auto; }\n\
         .assistant { background: #f8f9fa; border: 1px solid #dee2e6; }\n\
         .message-image img { max-height: 200px; border-radius: 0.3em; }\n\
         .message-time { font-size: 0.8em; opacity: 0.7; margin-top: 0.3em; }\n\
         .text-success { color: #198754; }\n.text-warning { color: #b58100; }\n\
         .alert { background: #f8d7da; color: #842029; padding: 0.8em; border-radius: 0.5em; }\n\
         </style>\n</head>\n<body>\n<h1>ChatAlimi</h1>\n",
    );

    for view in &snapshot.messages {
        render_message(&mut html, view);
    }

    if let Some(ref error) = snapshot.error {
        let _ = writeln!(html, "<div class=\"alert\" role=\"alert\">{}</div>", escape(error));
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// Render and save the page. Errors are returned to the caller, which keeps
/// the session running.
pub fn write_page(path: &Path, snapshot: &SessionSnapshot) -> std::io::Result<()> {
    std::fs::write(path, render_page(snapshot))
}

fn render_message(html: &mut String, view: &MessageView) {
    let class = match view.role {
        Role::User => "user",
        _ => "assistant",
    };
    let _ = writeln!(html, "<div class=\"message {class}\" id=\"msg-{}\">", view.id);

    if let Some(ref image) = view.image {
        let _ = writeln!(
            html,
            "<div class=\"message-image\"><img src=\"{}\" alt=\"Image partagée par l'utilisateur\"></div>",
            escape(image)
        );
    }
    for (index, url) in view.images.iter().enumerate() {
        let _ = writeln!(
            html,
            "<div class=\"message-image\"><img src=\"{}\" alt=\"Image {} partagée par l'assistant\"></div>",
            escape(url),
            index + 1
        );
    }

    let _ = writeln!(html, "<div class=\"message-text\">{}</div>", view.markup);
    let _ = writeln!(html, "<div class=\"message-time\">{}</div>", escape(&view.timestamp));
    html.push_str("</div>\n");
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Cut long data URLs for terminal display.
pub fn shorten(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}
