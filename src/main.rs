#![forbid(unsafe_code)]

//! `ticket-warden`: inspect ticket data, validate or watch the configuration,
//! and replay action scripts against the in-memory chat platform.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use ticket_warden::config::GlobalConfig;
use ticket_warden::config_watcher::{ConfigHandle, ConfigWatcher};
use ticket_warden::persistence::TicketStore;
use ticket_warden::replay;
use ticket_warden::{AppError, Result};

/// How often `watch` looks for a swapped configuration.
const WATCH_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "ticket-warden", about = "Support ticket lifecycle engine", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the tickets of a community.
    List {
        /// Community identifier.
        #[arg(long)]
        community: String,
        /// Only show open tickets.
        #[arg(long)]
        open: bool,
    },
    /// Print one ticket record as JSON.
    Show {
        /// Community identifier.
        #[arg(long)]
        community: String,
        /// Ticket number.
        #[arg(long)]
        id: u64,
    },
    /// Validate the configuration and summarize it.
    CheckConfig,
    /// Run a JSON-lines action script against an in-memory platform.
    Replay {
        /// Script file.
        #[arg(long)]
        script: PathBuf,
        /// Keep tickets, transcripts and the audit log here instead of a
        /// temporary directory.
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
    /// Watch the configuration file and print a summary after every
    /// accepted change until interrupted.
    Watch,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let config = GlobalConfig::load_from_path(&args.config)?;
    info!(path = %args.config.display(), "configuration loaded");

    match args.command {
        Command::List { community, open } => list(&config, &community, open),
        Command::Show { community, id } => show(&config, &community, id),
        Command::CheckConfig => {
            check_config(&config);
            Ok(())
        }
        Command::Replay { script, work_dir } => {
            runtime()?.block_on(run_replay(&config, &script, work_dir.as_deref()))
        }
        Command::Watch => runtime()?.block_on(watch(&args.config)),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
}

fn list(config: &GlobalConfig, community: &str, open_only: bool) -> Result<()> {
    config.community(community)?;
    let store = TicketStore::open(&config.data_dir)?;
    for ticket in store.load(community)? {
        if open_only && !ticket.is_open() {
            continue;
        }
        println!(
            "#{:<5} {:<11} {:<6} {:<12} claimer={} channel={}",
            ticket.id,
            ticket.status.as_str(),
            ticket.priority.label(),
            ticket.topic,
            ticket.claimer.as_deref().unwrap_or("-"),
            ticket.channel_id,
        );
    }
    Ok(())
}

fn show(config: &GlobalConfig, community: &str, id: u64) -> Result<()> {
    config.community(community)?;
    let store = TicketStore::open(&config.data_dir)?;
    let ticket = store
        .find_by_id(community, id)?
        .ok_or_else(|| AppError::NotFound(format!("ticket #{id} in {community}")))?;
    println!("{}", serde_json::to_string_pretty(&ticket)?);
    Ok(())
}

fn check_config(config: &GlobalConfig) {
    println!("data_dir: {}", config.data_dir.display());
    println!("transcript_dir: {}", config.transcript_dir().display());
    for community in &config.communities {
        println!(
            "community {}: {} topics, team role {}, log channels {}, max {} open per user",
            community.id,
            community.topics.len(),
            community.team_role_id.as_deref().unwrap_or("-"),
            if community.log_channel_ids.is_empty() {
                "-".to_owned()
            } else {
                community.log_channel_ids.join(",")
            },
            community.max_tickets_per_user,
        );
        for topic in &community.topics {
            let fields = community.form_fields_for_topic(&topic.value);
            println!("  {} ({}): {} form fields", topic.value, topic.label, fields.len());
        }
    }
}

async fn run_replay(config: &GlobalConfig, script: &Path, work_dir: Option<&Path>) -> Result<()> {
    let body = std::fs::read_to_string(script).map_err(|err| {
        AppError::Config(format!("cannot read script {}: {err}", script.display()))
    })?;
    let scratch = tempfile::tempdir()?;
    let work_dir = work_dir.unwrap_or(scratch.path());
    for line in replay::run(config, &body, work_dir).await? {
        println!("{line}");
    }
    Ok(())
}

async fn watch(path: &Path) -> Result<()> {
    let handle = ConfigHandle::from_path(path)?;
    let _watcher = ConfigWatcher::spawn(&handle)?;
    let mut shown = handle.current();
    check_config(&shown);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut tick = tokio::time::interval(WATCH_POLL);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("watch stopped");
                return Ok(());
            }
            _ = tick.tick() => {
                let current = handle.current();
                if !Arc::ptr_eq(&current, &shown) {
                    println!("-- configuration reloaded --");
                    check_config(&current);
                    shown = current;
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            warn!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
