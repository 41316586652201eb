//! # ClauseRAG CLI
//!
//! Usage:
//!   clauserag serve                      # Start the HTTP gateway (default port 5000)
//!   clauserag ingest --data-dir ./docs   # Rebuild the knowledge base from a folder
//!   clauserag ask "Is knee surgery covered?" --mode policy
//!   clauserag init                       # Write a default config file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clauserag_assistant::{ChatRequest, Conversation, Decision, Mode};
use clauserag_core::config::{ClauseConfig, expand_path};
use clauserag_gateway::Backend;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "clauserag",
    version,
    about = "📑 ClauseRAG: answers grounded in your policy documents and textbooks"
)]
struct Cli {
    /// Config file (defaults to $CLAUSERAG_CONFIG or ~/.clauserag/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Load PDF and text documents into the knowledge base
    Ingest {
        /// Folder to scan (defaults to [knowledge].data_dir)
        #[arg(short, long)]
        data_dir: Option<String>,
        /// Keep existing documents instead of rebuilding
        #[arg(long)]
        append: bool,
    },
    /// Ask a single question
    Ask {
        query: String,
        /// PNG or JPEG to attach
        #[arg(long)]
        image: Option<PathBuf>,
        /// Response language code (e.g. hi, ta, en)
        #[arg(short, long)]
        language: Option<String>,
        /// policy or education
        #[arg(short, long)]
        mode: Option<String>,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// List supported LLM providers
    Providers,
    /// Show knowledge base statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "clauserag=debug,clauserag_gateway=debug,clauserag_knowledge=debug,clauserag_assistant=debug,tower_http=debug"
    } else {
        "clauserag=info,clauserag_gateway=info,clauserag_knowledge=info,clauserag_assistant=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config_path = ClauseConfig::resolve_path(cli.config.as_deref());

    if let Command::Init { force } = cli.command {
        return init(&config_path, force);
    }

    let mut config = if config_path.exists() {
        ClauseConfig::load_from(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        tracing::debug!("No config at {}, using defaults", config_path.display());
        ClauseConfig::default()
    };

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            println!("📑 ClauseRAG gateway on http://{}:{}", config.gateway.host, config.gateway.port);
            clauserag_gateway::start(config, config_path).await?;
        }
        Command::Ingest { data_dir, append } => {
            let dir = expand_path(data_dir.as_deref().unwrap_or(&config.knowledge.data_dir));
            if !dir.is_dir() {
                anyhow::bail!("Data directory not found: {}", dir.display());
            }
            let backend = Backend::from_config(&config)?;
            println!("📥 Ingesting {} ({})", dir.display(), if append { "append" } else { "rebuild" });
            let report = backend.ingestor.ingest_directory(&dir, !append).await?;
            println!(
                "✅ {} documents, {} pages, {} chunks ({} unchanged skipped)",
                report.documents, report.pages, report.chunks, report.skipped
            );
        }
        Command::Ask { query, image, language, mode, json } => {
            let backend = Backend::from_config(&config)?;
            let assistant = backend
                .assistant
                .context("No chat provider available; check [llm] in the config or the API key env var")?;

            let image = match image {
                Some(path) => {
                    let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
                    Some(clauserag_assistant::image::image_from_bytes(&bytes)?.data_base64)
                }
                None => None,
            };
            let mode = mode.as_deref().map(str::parse::<Mode>).transpose()?;

            let mut conversation = Conversation::new("cli");
            let response = assistant
                .chat(&mut conversation, ChatRequest { query, image, language, mode })
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }

            println!("{}\n", response.answer);
            if !response.sources.is_empty() {
                println!("📚 Sources:");
                for s in &response.sources {
                    println!("   {} (page {})", s.source, s.page_label());
                }
            }
            if let Some(d) = &response.decision {
                let label = match d.decision {
                    Decision::Approved => "✅ approved",
                    Decision::Rejected => "❌ rejected",
                    Decision::Conditional => "⚠️  conditional",
                    Decision::Undetermined => "❔ undetermined",
                };
                match d.amount {
                    Some(amount) => println!("\nDecision: {label} (amount {amount})"),
                    None => println!("\nDecision: {label}"),
                }
            }
            if response.not_found_hint {
                println!("\n💡 Nothing relevant was found. Try rephrasing or ingesting more documents.");
            }
        }
        Command::Providers => {
            println!("🔌 Providers:");
            for name in clauserag_providers::available_providers() {
                match clauserag_providers::provider_registry::get_provider_config(name) {
                    Some(p) => {
                        let default_model = p.default_models.first().map(|m| m.id).unwrap_or("-");
                        let local = if p.is_local() { " (local)" } else { "" };
                        println!("   {name:<12} {default_model}{local}");
                    }
                    None => println!("   {name:<12} (provider = \"custom:https://host/v1\", or \"custom\" with [llm].endpoint)"),
                }
            }
        }
        Command::Stats => {
            let db_path = expand_path(&config.knowledge.db_path);
            let store = clauserag_knowledge::KnowledgeStore::open(&db_path)?;
            let (docs, chunks) = store.stats();
            println!("📚 {}: {docs} documents, {chunks} chunks", db_path.display());
            for d in store.list_documents()? {
                println!("   [{}] {} ({} pages, {} chunks)", d.id, d.name, d.pages, d.chunks);
            }
        }
        Command::Init { .. } => {}
    }

    Ok(())
}

fn init(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    ClauseConfig::default().save_to(path)?;
    println!("✅ Config written to {}", path.display());
    println!("   Set GEMINI_API_KEY (or edit [llm]) and run `clauserag ingest`.");
    Ok(())
}
