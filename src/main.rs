//! Parley conversational-AI engine CLI.
//!
//! Usage:
//!   parley send --message "..."   Process one inbound message
//!   parley chat                   Interactive conversation on stdin
//!   parley check                  Lint the intention catalog
//!   parley status                 Show chat store counters

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

use parley::auth::StaticTokenProvider;
use parley::catalog::IntentionCatalog;
use parley::compose::{ComposerConfig, ResponseComposer};
use parley::config::{self, ParleyConfig};
use parley::engine::{Engine, EngineSettings};
use parley::http::ReqwestTransport;
use parley::intent::{Executor, LocalHandler};
use parley::llm::OpenAiChatClient;
use parley::speech::NoopSynthesizer;
use parley::state::ChatStore;
use parley::timezone;
use parley::types::*;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version = "0.1.0")]
#[command(about = "Multi-tenant conversational-AI engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to parley home directory.
    #[arg(long, default_value = "~/.parley")]
    home: String,

    /// Log level (debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process one inbound message and print the reply.
    Send {
        /// The inbound message text.
        #[arg(long)]
        message: String,

        /// Contact phone the message came from.
        #[arg(long, default_value = "+0000000000")]
        phone: String,

        /// Contact display name.
        #[arg(long, default_value = "Visitor")]
        name: String,
    },

    /// Interactive conversation on stdin.
    Chat {
        #[arg(long, default_value = "+0000000000")]
        phone: String,

        #[arg(long, default_value = "Visitor")]
        name: String,
    },

    /// Lint the intention catalog.
    Check,

    /// Show chat store counters.
    Status,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    // Resolve home directory
    let home_dir = PathBuf::from(shellexpand::tilde(&cli.home).into_owned());

    match cli.command {
        Commands::Send {
            message,
            phone,
            name,
        } => cmd_send(&home_dir, &message, &phone, &name).await,
        Commands::Chat { phone, name } => cmd_chat(&home_dir, &phone, &name).await,
        Commands::Check => cmd_check(&home_dir),
        Commands::Status => cmd_status(&home_dir),
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

async fn cmd_send(home_dir: &Path, message: &str, phone: &str, name: &str) -> Result<()> {
    let (cfg, store) = bootstrap(home_dir)?;
    let engine = build_engine(&cfg)?;

    let reply = process_turn(&engine, &store, &cfg, message, phone, name).await?;
    for segment in &reply.segments {
        println!("{} {}", ">>>".green().bold(), segment);
    }
    if let Some(pending) = &reply.pending {
        let needed: Vec<&str> = pending.missing.iter().map(|f| f.name.as_str()).collect();
        println!(
            "{} waiting on: {}",
            "...".yellow().bold(),
            needed.join(", ")
        );
    }
    Ok(())
}

async fn cmd_chat(home_dir: &Path, phone: &str, name: &str) -> Result<()> {
    let (cfg, store) = bootstrap(home_dir)?;
    let engine = build_engine(&cfg)?;

    println!(
        "{} Chatting with '{}' as {} ({}). Empty line exits.",
        ">>>".green().bold(),
        cfg.agent_name,
        name,
        phone,
    );

    let stdin = std::io::stdin();
    loop {
        print!("{} ", "you:".bold());
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim();
        if message.is_empty() {
            break;
        }

        let reply = process_turn(&engine, &store, &cfg, message, phone, name).await?;
        for segment in &reply.segments {
            println!("{} {}", cfg.agent_name.green().bold(), segment);
        }
    }

    Ok(())
}

fn cmd_check(home_dir: &Path) -> Result<()> {
    let cfg = load_cfg(home_dir)?;
    let catalog = IntentionCatalog::load(Path::new(&cfg.resolved_catalog_path()))?;

    let problems = catalog.lint(&["human_handoff"]);
    if problems.is_empty() {
        println!(
            "{} {} intentions, no problems found",
            "OK".green().bold(),
            catalog.len()
        );
        return Ok(());
    }

    for problem in &problems {
        println!("{} {}", "!!".red().bold(), problem);
    }
    eprintln!(
        "{} {} problem(s) in {}",
        "Error:".red().bold(),
        problems.len(),
        cfg.catalog_path
    );
    std::process::exit(1);
}

fn cmd_status(home_dir: &Path) -> Result<()> {
    let (cfg, store) = bootstrap(home_dir)?;
    let catalog = IntentionCatalog::load(Path::new(&cfg.resolved_catalog_path()))?;

    println!();
    println!("{}", "=== Parley Status ===".bold());
    println!();
    println!("  {}:       {}", "Agent".bold(), cfg.agent_name);
    println!("  {}:       {}", "Model".bold(), cfg.model);
    println!("  {}:    {}", "Timezone".bold(), cfg.timezone_label);
    println!("  {}:  {}", "Intentions".bold(), catalog.len());
    println!();
    println!("  {}:       {}", "Chats".bold(), store.chat_count()?);
    println!("  {}:    {}", "Messages".bold(), store.message_count()?);
    println!("  {}: {}", "Interactions".bold(), store.interaction_count()?);
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Turn processing (the chat layer around the engine)
// ---------------------------------------------------------------------------

async fn process_turn(
    engine: &Engine,
    store: &ChatStore,
    cfg: &ParleyConfig,
    message: &str,
    phone: &str,
    name: &str,
) -> Result<EngineReply> {
    let chat = store.create_or_get_chat(phone, name)?;
    let history = store.recent_history(&chat.id, cfg.history_window)?;
    store.append_message(&chat.id, MessageDirection::Inbound, message)?;

    let input = TurnInput {
        chat: chat.clone(),
        history,
        message: message.to_string(),
    };

    // Raw engine errors never reach the user as-is.
    let reply = match engine.handle_turn(&input).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("Turn failed: {:#}", e);
            let text = "Sorry, something went wrong on my side. Please try again.".to_string();
            EngineReply {
                segments: vec![text.clone()],
                text,
                pending: None,
                executed: None,
                audio: None,
            }
        }
    };

    store.append_message(&chat.id, MessageDirection::Outbound, &reply.text)?;

    match &reply.pending {
        Some(pending) => store.set_pending(&chat.id, pending)?,
        None => store.clear_pending(&chat.id)?,
    }

    if let Some(executed) = &reply.executed {
        store.save_interaction(&InteractionRecord {
            id: ulid::Ulid::new().to_string(),
            chat_id: chat.id.clone(),
            tool_name: executed.tool_name.clone(),
            fields: Value::Object(executed.fields.clone()),
            succeeded: executed.succeeded,
            reply: reply.text.clone(),
            created_at: chrono::Utc::now(),
        })?;
    }

    Ok(reply)
}

// ---------------------------------------------------------------------------
// Local handlers
// ---------------------------------------------------------------------------

/// Human-handoff: flags the conversation for a person to pick up. The
/// transfer itself happens asynchronously outside this process.
struct HumanHandoffHandler;

#[async_trait]
impl LocalHandler for HumanHandoffHandler {
    async fn call(&self, fields: &FieldMap) -> Result<Value> {
        Ok(json!({
            "transferred": true,
            "reason": fields.get("reason").cloned().unwrap_or(Value::Null),
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_cfg(home_dir: &Path) -> Result<ParleyConfig> {
    let config_path = home_dir.join("parley.toml");
    if !config_path.exists() {
        eprintln!(
            "{} No config found at {:?}. Create one first.",
            "Error:".red().bold(),
            config_path
        );
        std::process::exit(1);
    }
    config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))
}

/// Bootstrap the runtime: load config and open the chat store.
fn bootstrap(home_dir: &Path) -> Result<(ParleyConfig, ChatStore)> {
    if !home_dir.exists() {
        std::fs::create_dir_all(home_dir).with_context(|| {
            format!("Failed to create home directory: {}", home_dir.display())
        })?;
    }

    let cfg = load_cfg(home_dir)?;

    let db_path = cfg.resolved_db_path();
    let store = ChatStore::open(Path::new(&db_path))
        .with_context(|| format!("Failed to open chat store at {}", db_path))?;

    Ok((cfg, store))
}

/// Wire the engine from tenant config.
fn build_engine(cfg: &ParleyConfig) -> Result<Engine> {
    let tz = match timezone::zone_for_label(&cfg.timezone_label, &cfg.timezone_overrides) {
        Some(tz) => tz,
        None => {
            warn!(
                "Unknown timezone label '{}', falling back to UTC",
                cfg.timezone_label
            );
            chrono_tz::UTC
        }
    };

    let catalog = Arc::new(IntentionCatalog::load(Path::new(
        &cfg.resolved_catalog_path(),
    ))?);

    let llm = Arc::new(OpenAiChatClient::new(
        &cfg.llm_api_url,
        &cfg.llm_api_key,
        cfg.max_tokens,
        cfg.http_timeout_secs,
    )?);

    let transport = Arc::new(
        ReqwestTransport::new(cfg.http_timeout_secs)
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP transport: {}", e))?,
    );
    let tokens = Arc::new(StaticTokenProvider::new(&cfg.access_token));

    let mut executor = Executor::new(
        transport,
        tokens,
        catalog.clone(),
        cfg.availability.clone(),
    );
    executor.register_handler("human_handoff", Arc::new(HumanHandoffHandler));

    let composer = ResponseComposer::new(
        llm.clone(),
        ComposerConfig {
            agent_name: cfg.agent_name.clone(),
            persona: cfg.persona.clone(),
            style_guide: cfg.style_guide.clone(),
            goal_guide: cfg.goal_guide.clone(),
            model: cfg.model.clone(),
            split_responses: cfg.split_responses,
            split_delimiter: cfg.split_delimiter.clone(),
        },
    );

    Ok(Engine::new(
        catalog,
        llm,
        executor,
        composer,
        Arc::new(NoopSynthesizer),
        EngineSettings {
            model: cfg.model.clone(),
            agent_id: cfg.agent_id.clone(),
            timezone_label: cfg.timezone_label.clone(),
            tz,
            audio_replies: cfg.audio_replies,
        },
    ))
}
