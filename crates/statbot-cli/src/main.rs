//! Statbot CLI
//!
//! Command-line interface for the chat statistics bot

mod logging;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use statbot_bridge::BridgeAdapter;
use statbot_config::Config;
use statbot_core::commands::{format_local, DEFAULT_TOP_LIMIT};
use statbot_core::StatbotRuntime;
use statbot_storage::{uptime_label, JsonFileStore, RankScope, SnapshotStore, StatsStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "statbot")]
#[command(about = "Message statistics bot for group and direct chats", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (overrides core.log_level)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot in the foreground until interrupted
    Start,

    /// Print statistics from the saved snapshot
    Stats {
        /// Show a single conversation instead of the global view
        #[arg(long)]
        conversation: Option<String>,

        /// Number of ranked participants
        #[arg(long, default_value_t = DEFAULT_TOP_LIMIT)]
        top: usize,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Log file management
    Logs {
        #[command(subcommand)]
        action: LogCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show current configuration
    Show,
    /// Validate configuration
    Validate,
}

#[derive(Subcommand)]
enum LogCommands {
    /// List log files
    List,
    /// Delete old log files
    Clean {
        /// Keep files modified within this many days
        #[arg(short, long, default_value_t = logging::LOG_RETENTION_DAYS)]
        days: u64,
    },
    /// Print the end of the newest log file
    Tail {
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = load_config(cli.config)?;
            let log_level = cli
                .log_level
                .unwrap_or_else(|| config.log_level().to_string());
            let _logging_guard =
                logging::init_logging(&config.data_dir().join("logs"), &log_level)?;
            run_bot(config).await?;
        }

        Commands::Stats {
            conversation,
            top,
            json,
        } => {
            let config = load_config_or_default(cli.config)?;
            print_stats(&config, conversation.as_deref(), top, json)?;
        }

        Commands::Config { action } => match action {
            ConfigCommands::Init { force } => init_config(cli.config, force)?,
            ConfigCommands::Show => match load_config(cli.config) {
                Ok(config) => {
                    println!("Current configuration:");
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&redacted_config(&config)?)?
                    );
                }
                Err(e) => eprintln!("Error loading config: {:#}", e),
            },
            ConfigCommands::Validate => match load_config(cli.config) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => eprintln!("Configuration is invalid: {:#}", e),
            },
        },

        Commands::Logs { action } => {
            let config = load_config_or_default(cli.config)?;
            let manager = logging::LogManager::new(config.data_dir().join("logs"));
            match action {
                LogCommands::List => {
                    let files = manager.log_files()?;
                    println!(
                        "Log files ({} total):\n",
                        logging::LogManager::format_size(manager.total_size()?)
                    );
                    for file in files {
                        let metadata = std::fs::metadata(&file)?;
                        let modified: chrono::DateTime<chrono::Local> =
                            metadata.modified()?.into();
                        println!(
                            "  {} ({}, modified {})",
                            file.file_name()
                                .map(|n| n.to_string_lossy().to_string())
                                .unwrap_or_default(),
                            logging::LogManager::format_size(metadata.len()),
                            modified.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                LogCommands::Clean { days } => {
                    let deleted = manager.cleanup_older_than(days)?;
                    println!("Cleaned {} old log file(s)", deleted);
                }
                LogCommands::Tail { lines } => match manager.latest_log()? {
                    Some(path) => {
                        for line in logging::tail_lines(&path, lines)? {
                            println!("{}", line);
                        }
                    }
                    None => println!("No log files found"),
                },
            }
        }

        Commands::Version => {
            println!("statbot {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn run_bot(config: Config) -> Result<()> {
    let bridge_config = config
        .bridge
        .as_ref()
        .context("No [bridge] section configured; set bridge.base_url or STATBOT_BRIDGE_URL")?;
    let bridge = Arc::new(BridgeAdapter::new(bridge_config)?);
    let snapshots = Box::new(JsonFileStore::new(config.persist_path()));

    info!(
        "Starting {} (prefix '{}', auto-reply {})",
        config.bot.bot_name,
        config.bot.command_prefix,
        if config.bot.auto_reply { "on" } else { "off" }
    );
    let mut runtime = StatbotRuntime::new(&config, snapshots, bridge.clone(), bridge);
    runtime.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_stats(config: &Config, conversation: Option<&str>, top: usize, as_json: bool) -> Result<()> {
    let path = config.persist_path();
    let Some(snapshot) = JsonFileStore::new(&path).load()? else {
        println!("No statistics saved at {}", path.display());
        return Ok(());
    };
    let saved = snapshot.global.clone();
    let store = StatsStore::from_snapshot(snapshot, Utc::now());

    if let Some(conversation_id) = conversation {
        let Some(summary) = store.conversation_summary(conversation_id) else {
            println!("No statistics for conversation {}", conversation_id);
            return Ok(());
        };
        let ranking = store.top_participants(RankScope::Conversation(conversation_id), top);
        if as_json {
            let value = json!({ "conversationId": conversation_id, "summary": summary, "top": ranking });
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }
        println!("Conversation {}", conversation_id);
        println!("========================");
        println!("Kind: {}", if summary.is_group { "group" } else { "direct" });
        println!("Messages: {}", summary.total_messages);
        println!("Members: {}", summary.member_count);
        println!("Last activity: {}", format_local(summary.last_activity));
        print_ranking(&ranking);
        return Ok(());
    }

    let global = store.global_summary();
    let ranking = store.top_participants(RankScope::Global, top);
    if as_json {
        let value = json!({
            "totalMessages": global.total_messages,
            "totalUsers": global.total_users,
            "totalGroups": global.total_groups,
            "lastStartTime": saved.start_time,
            "lastUptimeMs": saved.uptime,
            "top": ranking,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    println!("Statbot Statistics");
    println!("==================");
    println!("Snapshot: {}", path.display());
    println!("Messages: {}", global.total_messages);
    println!("Users: {}", global.total_users);
    println!("Groups: {}", global.total_groups);
    println!("Last run started: {}", format_local(saved.start_time));
    println!(
        "Last recorded uptime: {}",
        uptime_label(chrono::Duration::milliseconds(saved.uptime as i64))
    );
    print_ranking(&ranking);
    Ok(())
}

fn print_ranking(ranking: &[statbot_storage::ParticipantRank]) {
    if ranking.is_empty() {
        return;
    }
    println!("\nTop {}:", ranking.len());
    for (index, row) in ranking.iter().enumerate() {
        println!(
            "  {}. {} ({}) - {} messages",
            index + 1,
            row.display_name,
            row.participant_id,
            row.count
        );
    }
}

fn config_path(config_path: Option<String>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(PathBuf::from(path)),
        None => Config::default_path().context("Cannot determine config directory"),
    }
}

fn load_config(config_path_arg: Option<String>) -> Result<Config> {
    let path = config_path(config_path_arg)?;
    Config::load(&path).with_context(|| format!("loading {}", path.display()))
}

/// Falls back to defaults (plus env overrides) when no config file exists.
fn load_config_or_default(config_path_arg: Option<String>) -> Result<Config> {
    let path = config_path(config_path_arg)?;
    if path.exists() {
        return Config::load(&path).with_context(|| format!("loading {}", path.display()));
    }
    let mut config = Config::default();
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn init_config(config_path_arg: Option<String>, force: bool) -> Result<()> {
    let path = config_path(config_path_arg)?;
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, Config::template())?;
    println!("Configuration created at: {}", path.display());
    println!("\nEdit bridge.base_url and bot.admin_ids, then run:");
    println!("  statbot config validate");
    println!("  statbot start");
    Ok(())
}

fn redacted_config(config: &Config) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(config)?;
    if let Some(token) = value
        .get_mut("bridge")
        .and_then(|b| b.get_mut("auth_token"))
        .filter(|t| !t.is_null())
    {
        *token = json!("***REDACTED***");
    }
    Ok(value)
}
