//! # Legal RAG CLI (`legal`)
//!
//! The `legal` binary runs the API server and doubles as its terminal
//! client.
//!
//! ## Usage
//!
//! ```bash
//! legal --config ./config/legal.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `legal init` | Create the SQLite database and run schema migrations |
//! | `legal serve` | Start the HTTP API |
//! | `legal login` | Log in and store the session token |
//! | `legal logout` | Drop the stored session |
//! | `legal whoami` | Show the current session |
//! | `legal docs list\|upload\|get\|delete` | Manage documents |
//! | `legal ask "<question>"` | Ask one question |
//! | `legal chat` | Interactive question loop |
//! | `legal status` | Usage, limits, and readiness |
//! | `legal completions <shell>` | Print shell completions |

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use legal_rag::app::{AppContext, Screen, UploadOutcome};
use legal_rag::chat::{ChatMessage, Transcript};
use legal_rag::config::{self, Config};
use legal_rag::{migrate, render, server, status};

/// Legal RAG: grounded question answering over your legal PDFs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/legal.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "legal",
    about = "Legal RAG: grounded question answering over uploaded legal PDFs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/legal.toml`. Client commands fall back to
    /// built-in defaults and environment variables when it is missing.
    #[arg(long, global = true, default_value = "./config/legal.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Log in with the shared application password.
    Login {
        /// Password; prompted for when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Notify the server and drop the stored session.
    Logout,

    /// Show whether a valid session is stored.
    Whoami,

    /// Manage uploaded documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Ask a single question.
    Ask {
        question: String,

        /// Restrict retrieval to these document IDs.
        #[arg(long = "doc")]
        document_ids: Vec<String>,
    },

    /// Interactive chat. Ctrl-C cancels the pending question.
    Chat,

    /// Show today's usage, limits, and backend readiness.
    Status,

    /// Print shell completions.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum DocsAction {
    /// List your documents.
    List,
    /// Upload a PDF.
    Upload {
        path: PathBuf,
        /// Title shown in citations; defaults to the file name.
        #[arg(long)]
        title: Option<String>,
    },
    /// Show a document's chunks and sections.
    Get { id: String },
    /// Delete a document and its chunks.
    Delete { id: String },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "legal_rag=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Returns a logged-in context, or `None` after telling the user to log in.
async fn require_login(cfg: &Config) -> Result<Option<AppContext>> {
    let app = AppContext::from_config(cfg)?;
    match app.start().await {
        Screen::Main => Ok(Some(app)),
        Screen::Login => {
            println!("Not logged in. Run `legal login` first.");
            Ok(None)
        }
    }
}

async fn run_docs(cfg: &Config, action: DocsAction) -> Result<()> {
    let Some(app) = require_login(cfg).await? else {
        return Ok(());
    };
    let cancel = CancellationToken::new();

    match action {
        DocsAction::List => {
            let list = app.documents(&cancel).await?;
            let max = app
                .cache
                .system_info(&cancel)
                .await
                .ok()
                .map(|i| i.limits.max_documents);
            print!("{}", render::render_document_list(&list, max));
        }
        DocsAction::Upload { path, title } => {
            match app.upload(&path, title.as_deref(), &cancel).await? {
                UploadOutcome::Ignored => {
                    println!("Ignored {}: only PDF files can be uploaded.", path.display());
                }
                UploadOutcome::LimitReached { total } => {
                    println!(
                        "Document limit reached ({} stored). Delete a document first.",
                        total
                    );
                }
                UploadOutcome::Uploaded(resp) => {
                    println!("{}", resp.message);
                    println!(
                        "  id: {}\n  title: {}\n  pages: {} · chunks: {} · {} ms",
                        resp.id,
                        resp.title,
                        resp.page_count,
                        resp.chunk_count,
                        resp.processing_time_ms
                    );
                    if !resp.sections_detected.is_empty() {
                        println!("  sections: {}", resp.sections_detected.join("; "));
                    }
                }
            }
        }
        DocsAction::Get { id } => {
            let doc = app.document(&id, &cancel).await?;
            print!("{}", render::render_document_detail(&doc));
        }
        DocsAction::Delete { id } => {
            let resp = app.delete(&id, &cancel).await?;
            println!("{} ({} chunks removed)", resp.message, resp.chunks_removed);
        }
    }
    Ok(())
}

async fn ask_once(
    app: &AppContext,
    transcript: &mut Transcript,
    question: &str,
    ids: Option<Vec<String>>,
) {
    let cancel = CancellationToken::new();
    let result = {
        let ask = app.ask(transcript, question, ids, &cancel);
        tokio::pin!(ask);
        tokio::select! {
            r = &mut ask => r,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                ask.await
            }
        }
    };

    match result {
        Ok(()) => {
            if let Some(reply) = transcript.last() {
                println!("{}", render::render_message(reply));
            }
        }
        Err(e) => println!("{}", e),
    }
}

async fn run_chat(cfg: &Config) -> Result<()> {
    let Some(app) = require_login(cfg).await? else {
        return Ok(());
    };

    let cancel = CancellationToken::new();
    let (poller, mut snapshots) = status::spawn_status_poller(app.cache.clone(), cancel.clone());

    println!("Ask about your documents. Empty line or Ctrl-D to quit.");
    let mut transcript = Transcript::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if snapshots.has_changed().unwrap_or(false) {
            println!("{}", status::status_line(&snapshots.borrow_and_update()));
        }
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            break;
        }

        ask_once(&app, &mut transcript, question, None).await;

        if !app.is_logged_in() {
            println!("Session expired. Run `legal login` to continue.");
            break;
        }
    }

    cancel.cancel();
    let _ = poller.await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_logging();
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "legal", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = match cli.command {
        Commands::Init | Commands::Serve => config::load_config(&cli.config)?,
        _ => config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal()),
    };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Login { password } => {
            let password = match password {
                Some(p) => p,
                None => prompt("Password: ")?,
            };
            let app = AppContext::from_config(&cfg)?;
            match app.login(&password, &CancellationToken::new()).await {
                Ok(outcome) => {
                    println!("{}", outcome.message);
                    if let Some(id) = outcome.user_id {
                        println!("  user: {}", id);
                    }
                }
                Err(e) => println!("Login failed: {}", e),
            }
        }
        Commands::Logout => {
            let app = AppContext::from_config(&cfg)?;
            if app.start().await == Screen::Main {
                app.logout().await;
            }
            println!("Logged out.");
        }
        Commands::Whoami => {
            let app = AppContext::from_config(&cfg)?;
            match app.start().await {
                Screen::Main => println!(
                    "Logged in to {} as {}",
                    app.client.base_url(),
                    app.session.user_id().as_deref().unwrap_or("(unknown user)")
                ),
                Screen::Login => println!("Not logged in."),
            }
        }
        Commands::Docs { action } => run_docs(&cfg, action).await?,
        Commands::Ask {
            question,
            document_ids,
        } => {
            if let Some(app) = require_login(&cfg).await? {
                let ids = (!document_ids.is_empty()).then_some(document_ids);
                let mut transcript = Transcript::new();
                ask_once(&app, &mut transcript, &question, ids).await;
                if matches!(transcript.last(), Some(ChatMessage::Error { .. })) {
                    std::process::exit(1);
                }
            }
        }
        Commands::Chat => run_chat(&cfg).await?,
        Commands::Status => {
            let app = AppContext::from_config(&cfg)?;
            app.start().await;
            let snapshot = app.status(&CancellationToken::new()).await;
            println!("{}", status::status_line(&snapshot));
            if let Some(r) = snapshot.readiness {
                println!(
                    "  vector store: {} · embeddings: {} · llm: {}",
                    r.components.vector_store, r.components.embedding_model, r.components.llm_api
                );
            }
            if let Some(i) = snapshot.info {
                println!(
                    "  limits: {} documents · {} pages · {} MB · {} queries/day",
                    i.limits.max_documents,
                    i.limits.max_pages_per_document,
                    i.limits.max_file_size_mb,
                    i.limits.max_daily_queries
                );
                println!("  version {} ({})", i.version, i.environment);
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
