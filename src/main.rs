use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docchat::{
    format_timestamp, ApiClient, AssemblyState, ChatMessage, Config, Conversation, Credentials,
    DocumentType, LocalMediaPlayer, MediaPlayer, TimestampPlaybackBridge,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docchat", about = "Ask questions about uploaded documents")]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/docchat")]
    config: String,

    /// Bearer token for the API
    #[arg(long, env = "DOCCHAT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Override the API base URL from the config
    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and print a token for DOCCHAT_TOKEN
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "DOCCHAT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Show the user the token belongs to
    Whoami,
    /// Upload a pdf, audio or video file
    Upload {
        path: PathBuf,

        /// Document type (pdf, audio, video); guessed from the extension if omitted
        #[arg(long = "type", value_parser = parse_document_type)]
        document_type: Option<DocumentType>,

        /// Wait until the server has processed the upload
        #[arg(long)]
        wait: bool,
    },
    /// Delete a document and its conversation
    Delete { document_id: String },
    /// Ask a question and stream the answer
    Ask {
        document_id: String,
        question: String,

        /// Show the stored conversation before asking
        #[arg(long)]
        history: bool,

        /// Local WAV copy of the document's audio, for timestamp seeking
        #[arg(long)]
        media: Option<String>,

        /// Seek the media to the answer's first timestamp
        #[arg(long)]
        seek: bool,
    },
    /// Print the stored conversation for a document
    History { document_id: String },
    /// List documents
    Documents {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        page_size: u32,
    },
    /// Wait until a document has finished processing
    Wait { document_id: String },
    /// Summarize a document
    Summarize {
        document_id: String,
        #[arg(long)]
        max_length: Option<u32>,
    },
    /// Find moments in an audio/video document related to a query
    Timestamps { document_id: String, query: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docchat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut cfg = Config::load(&cli.config)?;
    if let Some(base_url) = cli.base_url {
        cfg.api.base_url = base_url;
    }
    info!("API: {}", cfg.api.base_url);
    let client = ApiClient::from_config(&cfg.api)?;

    if let Command::Login { email, password } = &cli.command {
        let credentials = client.login(email, password).await?;
        println!("{}", credentials.token());
        return Ok(());
    }

    let token = cli
        .token
        .context("No API token: pass --token or set DOCCHAT_TOKEN")?;
    let credentials = Credentials::bearer(token);

    match cli.command {
        Command::Login { .. } => Ok(()),
        Command::Whoami => {
            let user = client.current_user(&credentials).await?;
            println!("{} <{}>", user.name, user.email);
            Ok(())
        }
        Command::Upload {
            path,
            document_type,
            wait,
        } => {
            let document_type = document_type
                .or_else(|| DocumentType::from_path(&path))
                .with_context(|| format!("Unsupported file type: {}", path.display()))?;
            let doc = client
                .upload_document(&path, document_type, &credentials)
                .await
                .with_context(|| format!("Failed to upload {}", path.display()))?;
            println!("{}: {:?}", doc.id, doc.status);

            if wait {
                let doc = self::wait(&cfg, &client, &doc.id, &credentials).await?;
                println!("{}: {:?}", doc.id, doc.status);
            }
            Ok(())
        }
        Command::Delete { document_id } => {
            client.delete_document(&document_id, &credentials).await?;
            println!("Deleted {}", document_id);
            Ok(())
        }
        Command::Ask {
            document_id,
            question,
            history,
            media,
            seek,
        } => {
            let media = media.or_else(|| cfg.media.file.clone());
            ask(&cfg, client, credentials, &document_id, &question, history, media, seek).await
        }
        Command::History { document_id } => {
            let history = client.chat_history(&document_id, &credentials).await?;
            for message in history.messages {
                print_message(&ChatMessage::from(message));
            }
            Ok(())
        }
        Command::Documents { page, page_size } => {
            let list = client.list_documents(page, page_size, &credentials).await?;
            println!("{} documents (page {})", list.total, list.page);
            for doc in list.documents {
                println!(
                    "{}  {:<10?} {:<6?} {}",
                    doc.id, doc.status, doc.document_type, doc.original_filename
                );
            }
            Ok(())
        }
        Command::Wait { document_id } => {
            let doc = wait(&cfg, &client, &document_id, &credentials).await?;
            println!("{}: {:?}", doc.id, doc.status);
            Ok(())
        }
        Command::Summarize {
            document_id,
            max_length,
        } => {
            let max_length = max_length.unwrap_or(cfg.api.summary_max_length);
            let summary = client
                .summarize(&document_id, max_length, &credentials)
                .await?;
            println!("{}\n\n({} words)", summary.summary, summary.word_count);
            Ok(())
        }
        Command::Timestamps { document_id, query } => {
            let matches = client
                .find_timestamps(&document_id, &query, &credentials)
                .await?;
            for ts in matches.timestamps {
                println!("[{}] {}", format_timestamp(ts.start), ts.text);
            }
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn ask(
    cfg: &Config,
    client: ApiClient,
    credentials: Credentials,
    document_id: &str,
    question: &str,
    show_history: bool,
    media: Option<String>,
    seek: bool,
) -> Result<()> {
    if question.trim().is_empty() {
        anyhow::bail!("Question is empty");
    }

    let client = Arc::new(client);
    let conversation = Conversation::new(
        document_id,
        client.clone(),
        credentials.clone(),
        cfg.chat.clone(),
    );

    if show_history {
        let history = client.chat_history(document_id, &credentials).await?;
        conversation.load_history(history.messages.into_iter().map(ChatMessage::from))?;
        for message in conversation.messages() {
            print_message(&message);
        }
    }

    let bridge = TimestampPlaybackBridge::new();
    if let Some(path) = media {
        let player = LocalMediaPlayer::open_wav(&path)?;
        bridge.attach(Arc::new(player));
    }

    let mut answer = conversation.begin(question)?;

    // Ctrl-C stops the answer where it is
    let cancel = answer.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut printed = 0;
    let mut stdout = std::io::stdout();
    let mut failure = None;
    while let Some(update) = answer.next().await {
        match update {
            Ok(update) => {
                // Deltas only ever append, so print the new tail
                if let Some(tail) = update.content.get(printed..) {
                    print!("{}", tail);
                    stdout.flush().ok();
                }
                printed = update.content.len();
            }
            Err(e) => failure = Some(e),
        }
    }
    interrupt.abort();
    println!();

    let message = conversation
        .message(&answer.message_id())
        .context("Answer missing from transcript")?;

    match answer.state() {
        AssemblyState::Failed => {
            println!("{}", message.content);
            if let Some(e) = failure {
                if e.is_auth() {
                    anyhow::bail!("Authentication failed, get a new token");
                }
                warn!("Answer failed: {}", e);
            }
        }
        AssemblyState::Cancelled => println!("(stopped)"),
        _ => {}
    }

    if !message.timestamps.is_empty() {
        println!("Related timestamps:");
        for ts in &message.timestamps {
            println!("  [{}] {}", format_timestamp(ts.start), ts.text);
        }
    }

    if seek {
        if let Some(first) = message.timestamps.first() {
            bridge.seek(first).await;
            if let Some(player) = bridge.detach() {
                println!(
                    "{} at {}",
                    player.name(),
                    format_timestamp(player.current_time())
                );
            }
        }
    }

    Ok(())
}

async fn wait(
    cfg: &Config,
    client: &ApiClient,
    document_id: &str,
    credentials: &Credentials,
) -> Result<docchat::Document> {
    let doc = client
        .wait_until_processed(
            document_id,
            credentials,
            Duration::from_secs(cfg.api.poll_interval_secs),
            Duration::from_secs(cfg.api.wait_timeout_secs),
        )
        .await?;
    Ok(doc)
}

fn parse_document_type(value: &str) -> Result<DocumentType, String> {
    match value.to_ascii_lowercase().as_str() {
        "pdf" => Ok(DocumentType::Pdf),
        "audio" => Ok(DocumentType::Audio),
        "video" => Ok(DocumentType::Video),
        other => Err(format!("unknown document type '{}' (pdf, audio, video)", other)),
    }
}

fn print_message(message: &ChatMessage) {
    println!("{:?}> {}", message.role, message.content);
}
