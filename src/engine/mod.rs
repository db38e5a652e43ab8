//! Ticket lifecycle engine.
//!
//! [`TicketEngine`] is the single entry point for every user action on a
//! ticket. Each mutating transition:
//!
//! 1. takes the `(community, channel)` lock from [`TicketLocks`],
//! 2. loads the ticket fresh from the [`TicketStore`] and checks actor and
//!    state preconditions,
//! 3. persists the updated record,
//! 4. pushes the resulting permission set and channel name to the platform,
//! 5. announces the change and hands notification, audit and (for closes)
//!    archiving off to the background.
//!
//! Rejections never touch the store or the platform.

pub mod controls;
mod create;
mod effects;
mod guard;
mod lifecycle;
pub mod locks;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::audit::AuditLogger;
use crate::config::CommunityConfig;
use crate::config_watcher::ConfigHandle;
use crate::models::ticket::Ticket;
use crate::notify::Notifier;
use crate::persistence::TicketStore;
use crate::platform::ChatPlatform;
use crate::rename_limiter::RenameLimiter;
use crate::transcript::{TranscriptArchive, TranscriptGenerator};
use crate::{AppError, Result};

pub use controls::ControlAction;
pub use locks::TicketLocks;

/// Identity of an action on an existing ticket channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Community the channel belongs to.
    pub community_id: String,
    /// Ticket channel the action was taken in.
    pub channel_id: String,
    /// User taking the action.
    pub actor_id: String,
}

impl ActionRequest {
    /// Build a request from borrowed identifiers.
    #[must_use]
    pub fn new(community_id: &str, channel_id: &str, actor_id: &str) -> Self {
        Self {
            community_id: community_id.to_owned(),
            channel_id: channel_id.to_owned(),
            actor_id: actor_id.to_owned(),
        }
    }
}

/// Submitted ticket form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTicketRequest {
    /// Community to open the ticket in.
    pub community_id: String,
    /// User opening the ticket.
    pub actor_id: String,
    /// Selected topic value.
    pub topic: String,
    /// Answers keyed by form field id.
    #[serde(default)]
    pub form_data: BTreeMap<String, String>,
}

/// Outcome shown to the acting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReply {
    /// Short confirmation text.
    pub message: String,
    /// Ticket state after the action, when one was touched.
    pub ticket: Option<Ticket>,
}

impl ActionReply {
    fn with_ticket(message: impl Into<String>, ticket: Ticket) -> Self {
        Self {
            message: message.into(),
            ticket: Some(ticket),
        }
    }
}

/// What the message guard did with an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Message may stay.
    Allowed,
    /// Message was removed and its author notified.
    Deleted,
}

/// Collaborators the engine is wired with.
pub struct EngineDeps {
    /// Live configuration.
    pub config: ConfigHandle,
    /// Ticket records and counters.
    pub store: TicketStore,
    /// Chat service.
    pub platform: Arc<dyn ChatPlatform>,
    /// Channel rename queue.
    pub renamer: RenameLimiter,
    /// Log-channel notifier.
    pub notifier: Arc<dyn Notifier>,
    /// Transcript renderer used on close.
    pub transcripts: Arc<dyn TranscriptGenerator>,
    /// Where rendered transcripts are written; skipped when absent.
    pub archive: Option<TranscriptArchive>,
    /// Audit trail; skipped when absent.
    pub audit: Option<Arc<dyn AuditLogger>>,
}

struct EngineInner {
    config: ConfigHandle,
    store: TicketStore,
    platform: Arc<dyn ChatPlatform>,
    renamer: RenameLimiter,
    notifier: Arc<dyn Notifier>,
    transcripts: Arc<dyn TranscriptGenerator>,
    archive: Option<TranscriptArchive>,
    audit: Option<Arc<dyn AuditLogger>>,
    locks: TicketLocks,
    /// Keyed by `(community, user)`; keeps the open-ticket cap exact.
    creators: TicketLocks,
    background: TaskTracker,
}

/// Ticket lifecycle state machine. Cloning shares the same engine.
#[derive(Clone)]
pub struct TicketEngine {
    inner: Arc<EngineInner>,
}

impl TicketEngine {
    /// Wire an engine from its collaborators.
    #[must_use]
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config: deps.config,
                store: deps.store,
                platform: deps.platform,
                renamer: deps.renamer,
                notifier: deps.notifier,
                transcripts: deps.transcripts,
                archive: deps.archive,
                audit: deps.audit,
                locks: TicketLocks::default(),
                creators: TicketLocks::default(),
                background: TaskTracker::new(),
            }),
        }
    }

    /// Ticket store the engine writes to.
    #[must_use]
    pub fn store(&self) -> &TicketStore {
        &self.inner.store
    }

    /// Rename queue the engine feeds.
    #[must_use]
    pub fn renamer(&self) -> &RenameLimiter {
        &self.inner.renamer
    }

    /// Wait for background work (notifications, close finalisation) that
    /// has been started so far.
    pub async fn drain_background(&self) {
        let tracker = &self.inner.background;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
        debug!("background work drained");
    }

    /// Drain background work and stop the rename queue.
    pub async fn shutdown(&self) {
        self.drain_background().await;
        self.inner.renamer.shutdown().await;
    }

    /// Whether `user_id` holds the community's team role.
    ///
    /// A user who is not a member, or a community without a team role,
    /// counts as not team.
    async fn is_team(&self, community: &CommunityConfig, user_id: &str) -> Result<bool> {
        let Some(role) = community.team_role_id.as_deref() else {
            return Ok(false);
        };
        match self.inner.platform.member_roles(&community.id, user_id).await {
            Ok(roles) => Ok(roles.iter().any(|r| r == role)),
            Err(AppError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Load the ticket bound to the request's channel and require it open.
    fn open_ticket(&self, request: &ActionRequest) -> Result<Ticket> {
        let ticket = self
            .inner
            .store
            .find_by_channel(&request.community_id, &request.channel_id)?
            .ok_or_else(|| AppError::NotFound("No ticket record for this channel.".into()))?;
        if !ticket.is_open() {
            return Err(AppError::InvalidState("This ticket is already closed.".into()));
        }
        Ok(ticket)
    }
}

fn team_mention(community: &CommunityConfig) -> String {
    community
        .team_role_id
        .as_deref()
        .map_or_else(|| "@Team".to_owned(), |role| format!("<@&{role}>"))
}
