//! Chat message shapes exchanged with the platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visual style of an interactive control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStyle {
    /// Neutral button.
    Secondary,
    /// Highlighted button.
    Primary,
    /// Positive action.
    Success,
    /// Destructive action.
    Danger,
    /// Opens a URL instead of firing an action.
    Link,
}

/// A button attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Action identifier delivered back when pressed (empty for links).
    pub id: String,
    /// Button caption.
    pub label: String,
    /// Optional emoji shown next to the caption.
    pub emoji: Option<String>,
    /// Button style.
    pub style: ControlStyle,
    /// Target for link buttons.
    pub url: Option<String>,
}

/// Rich card attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    /// Card title.
    pub title: Option<String>,
    /// Card body.
    pub description: Option<String>,
    /// Accent colour as `0xRRGGBB`.
    pub color: Option<u32>,
    /// Footer line.
    pub footer: Option<String>,
    /// Labelled fields in display order.
    pub fields: Vec<(String, String)>,
}

/// File uploaded with a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name shown to readers.
    pub filename: String,
    /// File body.
    pub content: String,
}

/// Message to post into a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Plain text content.
    pub text: Option<String>,
    /// Optional rich card.
    pub embed: Option<Embed>,
    /// Rows of buttons.
    pub controls: Vec<Vec<Control>>,
    /// Uploaded files.
    pub attachments: Vec<Attachment>,
}

impl OutgoingMessage {
    /// Plain-text message without embed or controls.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Partial update of an existing message; `None` leaves a part untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageEdit {
    /// Replacement text content.
    pub text: Option<String>,
    /// Replacement control rows.
    pub controls: Option<Vec<Vec<Control>>>,
    /// Replacement embed colour.
    pub embed_color: Option<u32>,
}

/// Message as read back from channel history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Platform message identifier.
    pub id: String,
    /// Author user identifier.
    pub author_id: String,
    /// Author display name.
    pub author_name: String,
    /// Text content.
    pub content: String,
    /// Post time.
    pub created_at: DateTime<Utc>,
    /// Embed, when the message carries one.
    pub embed: Option<Embed>,
    /// Control rows on the message.
    pub controls: Vec<Vec<Control>>,
    /// `(filename, url)` of uploaded files.
    pub attachments: Vec<(String, String)>,
}
