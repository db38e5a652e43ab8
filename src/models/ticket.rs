//! Ticket record, status and priority.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix shared by every ticket channel name.
pub const CHANNEL_PREFIX: &str = "\u{1f3ab}\u{2502}";

/// Lifecycle status of a ticket. `Closed` is terminal.
///
/// Persisted with the historical German wire values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TicketStatus {
    /// Ticket accepts lifecycle actions.
    #[serde(rename = "offen")]
    Open,
    /// Ticket is archived; no further mutation.
    #[serde(rename = "geschlossen")]
    Closed,
}

impl TicketStatus {
    /// Lowercase English name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// Three-level urgency, always within `[0, 2]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(from = "i64", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// Highest priority level.
    pub const MAX: Self = Self(2);
    /// Lowest priority level.
    pub const MIN: Self = Self(0);

    /// Clamp an arbitrary level into range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped into 0..=2 first
    pub fn clamped(level: i64) -> Self {
        Self(level.clamp(0, 2) as u8)
    }

    /// Numeric level.
    #[must_use]
    pub fn level(self) -> u8 {
        self.0
    }

    /// One step up, saturating at [`Priority::MAX`].
    #[must_use]
    pub fn raised(self) -> Self {
        Self::clamped(i64::from(self.0) + 1)
    }

    /// One step down, saturating at [`Priority::MIN`].
    #[must_use]
    pub fn lowered(self) -> Self {
        Self::clamped(i64::from(self.0) - 1)
    }

    /// Coloured dot used in the channel name.
    #[must_use]
    pub fn dot(self) -> &'static str {
        match self.0 {
            0 => "\u{1f7e2}",
            1 => "\u{1f7e0}",
            _ => "\u{1f534}",
        }
    }

    /// Accent colour applied to the ticket greeting.
    #[must_use]
    pub fn color(self) -> u32 {
        match self.0 {
            0 => 0x002b_d94a,
            1 => 0x00ff_9900,
            _ => 0x00d9_2b2b,
        }
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self.0 {
            0 => "Green",
            1 => "Orange",
            _ => "Red",
        }
    }
}

impl From<i64> for Priority {
    fn from(level: i64) -> Self {
        Self::clamped(level)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

/// Build the channel name for a ticket number at a given priority.
#[must_use]
pub fn channel_name(ticket_id: u64, priority: Priority) -> String {
    format!("{CHANNEL_PREFIX}{}ticket-{ticket_id:05}", priority.dot())
}

/// Support ticket persisted per community.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Community-scoped ticket number.
    pub id: u64,
    /// Channel bound to this ticket while open.
    pub channel_id: String,
    /// User who opened the ticket; immutable.
    #[serde(rename = "userId")]
    pub creator_id: String,
    /// Topic value chosen at creation.
    pub topic: String,
    /// Lifecycle status.
    pub status: TicketStatus,
    /// Current urgency.
    #[serde(default)]
    pub priority: Priority,
    /// Creation time, stored as epoch milliseconds.
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Answers submitted with the opening form.
    #[serde(default)]
    pub form_data: BTreeMap<String, String>,
    /// Users granted access beyond creator, claimer and team.
    #[serde(default)]
    pub added_users: Vec<String>,
    /// Team member currently owning the ticket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimer: Option<String>,
    /// Fields written by other tools (`closedAt`, `hidden`, ...), kept as
    /// read so a rewrite of the record does not drop them.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Ticket {
    /// Construct a freshly opened ticket.
    #[must_use]
    pub fn new(
        id: u64,
        channel_id: String,
        creator_id: String,
        topic: String,
        form_data: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            channel_id,
            creator_id,
            topic,
            status: TicketStatus::Open,
            priority: Priority::MIN,
            created_at: Utc::now(),
            form_data,
            added_users: Vec::new(),
            claimer: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Whether lifecycle actions may still mutate this ticket.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == TicketStatus::Open
    }

    /// Whether the given user is the creator, claimer or an added user.
    #[must_use]
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.creator_id == user_id
            || self.claimer.as_deref() == Some(user_id)
            || self.added_users.iter().any(|u| u == user_id)
    }

    /// Channel name matching the current priority.
    #[must_use]
    pub fn channel_name(&self) -> String {
        channel_name(self.id, self.priority)
    }
}
