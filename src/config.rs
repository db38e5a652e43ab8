//! Global configuration parsing and validation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::{AppError, Result};

/// Maximum number of form fields shown when opening a ticket.
pub const MAX_FORM_FIELDS: usize = 5;
/// Maximum length of a form field label.
pub const MAX_FIELD_LABEL: usize = 45;

/// Rename limiter timings in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RenameConfig {
    /// Minimum spacing between two outbound renames of one channel.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Idle time after which the short debounce applies.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Debounce used after a long idle period.
    #[serde(default = "default_short_debounce_ms")]
    pub short_debounce_ms: u64,
    /// Debounce used while renames are frequent.
    #[serde(default = "default_long_debounce_ms")]
    pub long_debounce_ms: u64,
    /// Pause after a failed rename call.
    #[serde(default = "default_failure_backoff_ms")]
    pub failure_backoff_ms: u64,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_delay_ms: default_max_delay_ms(),
            short_debounce_ms: default_short_debounce_ms(),
            long_debounce_ms: default_long_debounce_ms(),
            failure_backoff_ms: default_failure_backoff_ms(),
        }
    }
}

fn default_min_interval_ms() -> u64 {
    3000
}

fn default_max_delay_ms() -> u64 {
    8000
}

fn default_short_debounce_ms() -> u64 {
    250
}

fn default_long_debounce_ms() -> u64 {
    500
}

fn default_failure_backoff_ms() -> u64 {
    4000
}

fn default_close_grace_ms() -> u64 {
    2500
}

fn default_history_limit() -> usize {
    1000
}

fn default_footer() -> String {
    "Ticket Warden".into()
}

fn default_greeting_title() -> String {
    "\u{1f3ab} Ticket #{ticketNumber}".into()
}

fn default_greeting_description() -> String {
    "Hello {userMention}\n**Topic:** {topicLabel}".into()
}

fn default_greeting_color() -> String {
    "#2b90d9".into()
}

fn default_max_tickets_per_user() -> usize {
    3
}

/// Accept either a single id or a list of ids.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) => vec![id],
        OneOrMany::Many(ids) => ids,
    })
}

/// Topic a user can open a ticket for.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TopicConfig {
    /// Display label.
    pub label: String,
    /// Stable value stored on the ticket.
    pub value: String,
    /// Optional emoji for the topic picker.
    #[serde(default)]
    pub emoji: Option<String>,
}

/// Input style of a form field.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldStyle {
    /// Single-line input.
    #[default]
    Short,
    /// Multi-line input.
    Paragraph,
}

/// Question asked when a ticket is opened.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FormFieldConfig {
    /// Answer key; defaults to `f<index>` when omitted.
    #[serde(default)]
    pub id: Option<String>,
    /// Question label.
    #[serde(default)]
    pub label: Option<String>,
    /// Whether an answer is mandatory.
    #[serde(default)]
    pub required: bool,
    /// Input style.
    #[serde(default)]
    pub style: FieldStyle,
    /// Topics this field applies to; empty means every topic.
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Form field with defaults applied, ready for display and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    /// Answer key.
    pub id: String,
    /// Label, at most [`MAX_FIELD_LABEL`] characters.
    pub label: String,
    /// Whether an answer is mandatory.
    pub required: bool,
    /// Input style.
    pub style: FieldStyle,
}

/// Per-community ticket settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommunityConfig {
    /// Community identifier.
    pub id: String,
    /// Role whose members act as the support team.
    #[serde(default)]
    pub team_role_id: Option<String>,
    /// Category that new ticket channels are created in.
    #[serde(default)]
    pub ticket_category_id: Option<String>,
    /// Channels receiving log notifications; `log_channel_id` takes one id
    /// or a list.
    #[serde(default, rename = "log_channel_id", deserialize_with = "one_or_many")]
    pub log_channel_ids: Vec<String>,
    /// Channel receiving transcripts; falls back to the first log channel.
    #[serde(default)]
    pub transcript_channel_id: Option<String>,
    /// Dashboard base URL (ending in `/panel`) used for transcript links.
    #[serde(default)]
    pub panel_url: Option<String>,
    /// Open tickets one user may have at the same time.
    #[serde(default = "default_max_tickets_per_user")]
    pub max_tickets_per_user: usize,
    /// Footer shown on ticket cards and log entries.
    #[serde(default = "default_footer")]
    pub footer: String,
    /// Greeting title template.
    #[serde(default = "default_greeting_title")]
    pub greeting_title: String,
    /// Greeting body template.
    #[serde(default = "default_greeting_description")]
    pub greeting_description: String,
    /// Greeting accent colour as `#RRGGBB`.
    #[serde(default = "default_greeting_color")]
    pub greeting_color: String,
    /// Topics offered when opening a ticket.
    #[serde(default, rename = "topic")]
    pub topics: Vec<TopicConfig>,
    /// Questions asked when opening a ticket.
    #[serde(default, rename = "form_field")]
    pub form_fields: Vec<FormFieldConfig>,
}

impl CommunityConfig {
    /// Look up a configured topic by value.
    #[must_use]
    pub fn topic(&self, value: &str) -> Option<&TopicConfig> {
        self.topics.iter().find(|t| t.value == value)
    }

    /// Form fields for a topic: global fields plus topic-specific ones,
    /// normalized and capped at [`MAX_FORM_FIELDS`].
    #[must_use]
    pub fn form_fields_for_topic(&self, topic: &str) -> Vec<FormField> {
        self.form_fields
            .iter()
            .filter(|f| f.topics.is_empty() || f.topics.iter().any(|t| t == topic))
            .take(MAX_FORM_FIELDS)
            .enumerate()
            .map(|(index, field)| FormField {
                id: field.id.clone().unwrap_or_else(|| format!("f{index}")),
                label: field
                    .label
                    .clone()
                    .unwrap_or_else(|| format!("Field {}", index + 1))
                    .chars()
                    .take(MAX_FIELD_LABEL)
                    .collect(),
                required: field.required,
                style: field.style,
            })
            .collect()
    }

    /// Greeting colour parsed from `#RRGGBB`, falling back to the default.
    #[must_use]
    pub fn greeting_color_value(&self) -> u32 {
        self.greeting_color
            .strip_prefix('#')
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .unwrap_or(0x002b_90d9)
    }

    /// Link to the archived transcript of a ticket, if a panel is configured.
    #[must_use]
    pub fn transcript_url(&self, ticket_id: u64) -> Option<String> {
        self.panel_url.as_ref().map(|url| {
            let base = url.strip_suffix("/panel").unwrap_or(url.trim_end_matches('/'));
            format!("{base}/transcript/{ticket_id}")
        })
    }

    /// Channel transcripts are posted to.
    #[must_use]
    pub fn transcript_target(&self) -> Option<&str> {
        self.transcript_channel_id
            .as_deref()
            .or(self.log_channel_ids.first().map(String::as_str))
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding ticket collections and counters.
    pub data_dir: PathBuf,
    /// Directory for transcript archives; defaults to `<data_dir>/transcripts`.
    #[serde(default)]
    pub transcript_dir: Option<PathBuf>,
    /// Directory for the JSONL audit log; disabled when absent.
    #[serde(default)]
    pub audit_log_dir: Option<PathBuf>,
    /// Delay between announcing a close and deleting the channel.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    /// Number of messages read back for a transcript.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Rename limiter timings.
    #[serde(default)]
    pub rename: RenameConfig,
    /// Configured communities.
    #[serde(default, rename = "community")]
    pub communities: Vec<CommunityConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Settings for one community.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the community is not configured.
    pub fn community(&self, community_id: &str) -> Result<&CommunityConfig> {
        self.communities
            .iter()
            .find(|c| c.id == community_id)
            .ok_or_else(|| {
                AppError::NotFound("The ticket system is not set up in this community.".into())
            })
    }

    /// Effective transcript directory.
    #[must_use]
    pub fn transcript_dir(&self) -> PathBuf {
        self.transcript_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("transcripts"))
    }

    /// Grace delay before a closed ticket's channel is deleted.
    #[must_use]
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(AppError::Config(
                "history_limit must be greater than zero".into(),
            ));
        }

        let rename = &self.rename;
        if rename.min_interval_ms == 0 || rename.failure_backoff_ms == 0 {
            return Err(AppError::Config(
                "rename min_interval_ms and failure_backoff_ms must be greater than zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for community in &self.communities {
            if community.id.is_empty() {
                return Err(AppError::Config("community id must not be empty".into()));
            }
            if community.max_tickets_per_user == 0 {
                return Err(AppError::Config(format!(
                    "community {} must allow at least one open ticket per user",
                    community.id
                )));
            }
            if !seen.insert(community.id.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate community id: {}",
                    community.id
                )));
            }

            let mut topics = HashSet::new();
            for topic in &community.topics {
                if topic.value.is_empty() || topic.label.is_empty() {
                    return Err(AppError::Config(format!(
                        "community {} has a topic without label or value",
                        community.id
                    )));
                }
                if !topics.insert(topic.value.as_str()) {
                    return Err(AppError::Config(format!(
                        "community {} has duplicate topic value: {}",
                        community.id, topic.value
                    )));
                }
            }
        }

        Ok(())
    }
}
