//! Scripted runs of the engine against the in-memory platform.
//!
//! A script is JSON lines, one step per line; blank lines and lines starting
//! with `#` are skipped:
//!
//! ```text
//! {"action":"member","community":"g1","user":"100000000000000001","roles":["team"]}
//! {"action":"create","community":"g1","user":"200000000000000002","topic":"billing"}
//! {"action":"press","community":"g1","user":"100000000000000001","ticket":1,"control":"claim"}
//! ```
//!
//! Tickets are addressed by number because channel ids are generated.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::audit::{AuditLogger, JsonlAuditWriter};
use crate::config::GlobalConfig;
use crate::config_watcher::ConfigHandle;
use crate::engine::{ActionRequest, CreateTicketRequest, EngineDeps, TicketEngine};
use crate::notify::ChannelNotifier;
use crate::persistence::TicketStore;
use crate::platform::memory::InMemoryPlatform;
use crate::rename_limiter::{RenameLimiter, RenameTimings};
use crate::transcript::{HtmlTranscriptGenerator, TranscriptArchive};
use crate::{AppError, Result};

/// One scripted step.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScriptStep {
    /// Register a community member.
    Member {
        /// Community id.
        community: String,
        /// User id.
        user: String,
        /// Role ids.
        #[serde(default)]
        roles: Vec<String>,
    },
    /// Open a ticket.
    Create {
        /// Community id.
        community: String,
        /// Opening user.
        user: String,
        /// Topic value.
        topic: String,
        /// Form answers.
        #[serde(default)]
        form: BTreeMap<String, String>,
    },
    /// Press a ticket control.
    Press {
        /// Community id.
        community: String,
        /// Pressing user.
        user: String,
        /// Ticket number.
        ticket: u64,
        /// Control id, e.g. `claim`.
        control: String,
    },
    /// Submit the add-user prompt.
    AddUser {
        /// Community id.
        community: String,
        /// Acting user.
        user: String,
        /// Ticket number.
        ticket: u64,
        /// Mention or id of the member to add.
        target: String,
    },
    /// Submit the close-denial prompt.
    Deny {
        /// Community id.
        community: String,
        /// Acting user.
        user: String,
        /// Ticket number.
        ticket: u64,
        /// Optional reason.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Post a message into a ticket channel.
    Message {
        /// Community id.
        community: String,
        /// Author.
        user: String,
        /// Ticket number.
        ticket: u64,
        /// Text.
        content: String,
    },
    /// Let background work run.
    Wait {
        /// Milliseconds to wait.
        ms: u64,
    },
}

/// Parse a script into steps.
///
/// # Errors
///
/// Returns `AppError::Validation` naming the first malformed line.
pub fn parse_script(script: &str) -> Result<Vec<ScriptStep>> {
    script
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|err| {
                AppError::Validation(format!("script line {}: {err}", index + 1))
            })
        })
        .collect()
}

/// Run `script` with `config`, keeping all files under `work_dir`.
///
/// Tickets go to `<work_dir>/data` and transcripts to
/// `<work_dir>/transcripts`. When the configuration enables the audit log,
/// it is written to `<work_dir>/audit`.
///
/// Returns one output line per step followed by a summary line per ticket.
///
/// # Errors
///
/// Returns an error if the script cannot be parsed or the work directory
/// or audit log cannot be prepared. Rejected actions are reported as output lines.
pub async fn run(config: &GlobalConfig, script: &str, work_dir: &Path) -> Result<Vec<String>> {
    let steps = parse_script(script)?;

    let mut config = config.clone();
    config.data_dir = work_dir.join("data");
    config.transcript_dir = Some(work_dir.join("transcripts"));
    config.audit_log_dir = config
        .audit_log_dir
        .as_ref()
        .map(|_| work_dir.join("audit"));
    let audit: Option<Arc<dyn AuditLogger>> = match &config.audit_log_dir {
        Some(dir) => Some(Arc::new(JsonlAuditWriter::new(dir.clone())?)),
        None => None,
    };
    let communities: Vec<String> = config.communities.iter().map(|c| c.id.clone()).collect();
    let handle = ConfigHandle::fixed(config.clone());

    let platform = Arc::new(InMemoryPlatform::new());
    let store = TicketStore::open(&config.data_dir)?;
    let engine = TicketEngine::new(EngineDeps {
        config: handle.clone(),
        store: store.clone(),
        platform: platform.clone(),
        renamer: RenameLimiter::new(platform.clone(), RenameTimings::from(&config.rename)),
        notifier: Arc::new(ChannelNotifier::new(platform.clone(), handle)),
        transcripts: Arc::new(HtmlTranscriptGenerator),
        archive: Some(TranscriptArchive::new(config.transcript_dir())),
        audit,
    });

    let mut output = Vec::with_capacity(steps.len());
    for (index, step) in steps.into_iter().enumerate() {
        let outcome = outcome_line(run_step(&engine, &platform, &store, step).await);
        output.push(format!("{:>3} {outcome}", index + 1));
    }

    engine.shutdown().await;
    for community in communities {
        for ticket in store.load(&community)? {
            let channel = platform
                .channel(&ticket.channel_id)
                .map_or_else(|| "deleted".to_owned(), |c| c.name);
            output.push(format!(
                "{community} #{} {} priority={} claimer={} added={} channel={channel}",
                ticket.id,
                ticket.status.as_str(),
                ticket.priority.label(),
                ticket.claimer.as_deref().unwrap_or("-"),
                ticket.added_users.len(),
            ));
        }
    }
    info!(lines = output.len(), "replay finished");
    Ok(output)
}

async fn run_step(
    engine: &TicketEngine,
    platform: &InMemoryPlatform,
    store: &TicketStore,
    step: ScriptStep,
) -> Result<String> {
    match step {
        ScriptStep::Member {
            community,
            user,
            roles,
        } => {
            let roles: Vec<&str> = roles.iter().map(String::as_str).collect();
            platform.add_member(&community, &user, &roles);
            Ok(format!("member {user} registered"))
        }
        ScriptStep::Create {
            community,
            user,
            topic,
            form,
        } => {
            let request = CreateTicketRequest {
                community_id: community,
                actor_id: user,
                topic,
                form_data: form,
            };
            Ok(engine.create_ticket(&request).await?.message)
        }
        ScriptStep::Press {
            community,
            user,
            ticket,
            control,
        } => {
            let request = request_for(store, &community, &user, ticket)?;
            Ok(engine.press(&control, &request).await?.message)
        }
        ScriptStep::AddUser {
            community,
            user,
            ticket,
            target,
        } => {
            let request = request_for(store, &community, &user, ticket)?;
            Ok(engine.add_user(&request, &target).await?.message)
        }
        ScriptStep::Deny {
            community,
            user,
            ticket,
            reason,
        } => {
            let request = request_for(store, &community, &user, ticket)?;
            Ok(engine
                .deny_close_request(&request, reason.as_deref())
                .await?
                .message)
        }
        ScriptStep::Message {
            community,
            user,
            ticket,
            content,
        } => {
            let request = request_for(store, &community, &user, ticket)?;
            let message_id = platform.post_as(&request.channel_id, &user, &content)?;
            let outcome = engine
                .guard_message(&community, &request.channel_id, &user, &message_id)
                .await?;
            Ok(format!("message {outcome:?}"))
        }
        ScriptStep::Wait { ms } => {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(format!("waited {ms}ms"))
        }
    }
}

fn outcome_line(result: Result<String>) -> String {
    match result {
        Ok(line) => format!("ok       {line}"),
        Err(err) if err.is_rejection() => format!("rejected {}", err.user_message()),
        Err(err) => format!("error    {err}"),
    }
}

fn request_for(
    store: &TicketStore,
    community: &str,
    user: &str,
    ticket_id: u64,
) -> Result<ActionRequest> {
    let ticket = store
        .find_by_id(community, ticket_id)?
        .ok_or_else(|| AppError::NotFound(format!("Ticket #{ticket_id} does not exist.")))?;
    Ok(ActionRequest::new(community, &ticket.channel_id, user))
}
