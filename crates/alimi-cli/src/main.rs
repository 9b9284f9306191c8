mod export;

use std::path::{Path, PathBuf};

use alimi::{
    AttachmentStatus, ChatSession, Config, EnvironmentProbe, FileCandidate, MessageId,
    MessageView, OpenAiChatService, Role, SessionOptions, SubmitOutcome, Transcript,
};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "alimi", about = "ChatAlimi -- assistant IA pour les productions écrites")]
struct Cli {
    /// Path to config.toml (defaults to config.toml in the working directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the chat completions endpoint
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Override the model name
    #[arg(short, long)]
    model: Option<String>,

    /// Directory for alimi.log and session transcripts
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Label used to name the session transcript
    #[arg(long, default_value = "Session")]
    label: String,
}

/// Write tracing output to alimi.log in the log directory.
fn init_tracing(dir: &Path) {
    if std::fs::create_dir_all(dir).is_err() {
        return;
    }
    let file_appender = tracing_appender::rolling::never(dir, "alimi.log");
    let subscriber = tracing_subscriber::fmt()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

const HELP: &str = "Commandes : /image <fichier>, /clear-image, /dismiss, /export <fichier.html>, /quit";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref());
    if let Some(endpoint) = cli.endpoint {
        config.api.endpoint = endpoint;
    }
    if let Some(model) = cli.model {
        config.api.model = model;
    }
    if let Some(dir) = cli.log_dir {
        config.logging.directory = Some(dir.display().to_string());
    }

    let log_dir = config.logging.log_directory();
    if config.logging.enabled {
        init_tracing(&log_dir);
    }
    info!("Starting ChatAlimi with model {}", config.api.model);

    let probe = EnvironmentProbe::from_process(config.client.user_agent.as_deref());
    let mut session = ChatSession::new(
        OpenAiChatService::new(&config.api),
        &probe,
        SessionOptions::from(&config),
    );
    if config.logging.enabled {
        if let Some(transcript) = Transcript::create(&log_dir, &cli.label) {
            session = session.with_transcript(transcript);
        }
    }

    println!("{HELP}");
    let mut last_shown = print_new(&session.views(), MessageId(0));
    print_error(session.error());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        let (command, arg) = match line.split_once(' ') {
            Some((command, arg)) => (command, arg.trim()),
            None => (line, ""),
        };

        match command {
            "" if !session.has_pending_attachment() => continue,
            "/quit" | "/exit" => break,
            "/help" => println!("{HELP}"),
            "/image" => attach(&session, arg).await,
            "/clear-image" => {
                session.clear_attachment();
                println!("Image retirée.");
            }
            "/dismiss" => session.dismiss_error(),
            "/export" => {
                let path = if arg.is_empty() { "conversation.html" } else { arg };
                match export::write_page(Path::new(path), &session.snapshot()) {
                    Ok(()) => println!("Conversation exportée vers {path}"),
                    Err(e) => {
                        warn!("Failed to write {path}: {e}");
                        println!("Erreur : impossible d'écrire {path} ({e})");
                    }
                }
            }
            _ => {
                println!("ChatAlimi écrit...");
                if let SubmitOutcome::Failed(_) = session.submit(line).await {
                    print_error(session.error());
                }
                last_shown = print_new(&session.views(), last_shown);
            }
        }
    }

    if let Some(transcript) = session.transcript() {
        println!("Journal : {}", transcript.path().display());
    }
    Ok(())
}

async fn attach(session: &ChatSession<OpenAiChatService>, arg: &str) {
    if arg.is_empty() {
        println!("Usage : /image <fichier>");
        return;
    }
    let candidate = match FileCandidate::from_path(Path::new(arg)) {
        Ok(candidate) => candidate,
        Err(e) => {
            println!("Impossible d'ouvrir {arg} : {e}");
            return;
        }
    };
    match session.select_attachment(candidate).await {
        Ok(AttachmentStatus::Ready) => println!("Image jointe. Elle sera envoyée avec ton prochain message."),
        Ok(AttachmentStatus::Superseded) => {}
        Err(_) => print_error(session.error()),
    }
}

/// Print messages newer than `after` and return the last id shown.
fn print_new(views: &[MessageView], after: MessageId) -> MessageId {
    let mut last = after;
    for view in views.iter().filter(|v| v.id > after) {
        let label = match view.role {
            Role::User => "Toi",
            _ => "ChatAlimi",
        };
        println!("[{}] {label}: {}", view.timestamp, view.content);
        if view.image.is_some() {
            println!("    (image jointe)");
        }
        for url in &view.images {
            println!("    [image] {}", export::shorten(url, 80));
        }
        last = view.id;
    }
    last
}

fn print_error(error: Option<String>) {
    if let Some(err) = error {
        println!("Erreur : {err}");
    }
}
