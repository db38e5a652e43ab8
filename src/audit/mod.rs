//! Structured audit trail of ticket lifecycle events.
//!
//! Provides the [`AuditLogger`] trait and associated types. The primary
//! implementation, [`JsonlAuditWriter`], appends JSONL records to
//! daily-rotating files under the configured `audit_log_dir`.

pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type classification for audit log entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Ticket channel created and record persisted.
    TicketCreated,
    /// Team member took ownership.
    TicketClaimed,
    /// Ownership released.
    TicketUnclaimed,
    /// Priority raised or lowered.
    PriorityChanged,
    /// Participant asked the team to close.
    CloseRequested,
    /// Close request approved; the ticket was closed.
    CloseApproved,
    /// Close request turned down; the ticket stays open.
    CloseDenied,
    /// Ticket closed and queued for archiving.
    TicketClosed,
    /// Extra member granted access.
    UserAdded,
    /// Message from an outsider removed from a claimed ticket.
    MessageRejected,
}

/// A structured record of one ticket event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// ISO 8601 timestamp with timezone.
    pub timestamp: DateTime<Utc>,
    /// Event classification.
    pub event_type: AuditEventType,
    /// Community the ticket belongs to.
    pub community_id: String,
    /// Ticket number.
    pub ticket_id: u64,
    /// Ticket channel.
    pub channel_id: String,
    /// User who triggered the event.
    pub actor_id: String,
    /// Event-specific detail (target user, new priority, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEntry {
    /// Construct an entry for the given event on a ticket.
    #[must_use]
    pub fn new(
        event_type: AuditEventType,
        community_id: &str,
        ticket_id: u64,
        channel_id: &str,
        actor_id: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            community_id: community_id.to_owned(),
            ticket_id,
            channel_id: channel_id.to_owned(),
            actor_id: actor_id.to_owned(),
            detail: None,
        }
    }

    /// Attach a detail string.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Writes structured audit entries to a persistent store.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait AuditLogger: Send + Sync {
    /// Record a single audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn log_entry(&self, entry: AuditEntry) -> crate::Result<()>;
}

pub use writer::JsonlAuditWriter;
