//! Error types shared across the application.

use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Ticket or counter file could not be read or written.
    Persistence(String),
    /// Chat platform call (channel, permission, message API) failed.
    Platform(String),
    /// Chat platform asked us to slow down; carries the retry hint if any.
    RateLimited(Option<Duration>),
    /// Ticket, channel, community or member does not exist.
    NotFound(String),
    /// Actor lacks the role or relationship the action requires.
    PermissionDenied(String),
    /// Ticket is in a state that does not allow the action.
    InvalidState(String),
    /// Request input failed validation (topic, form answers).
    Validation(String),
}

impl AppError {
    /// Short, actor-facing text for this failure.
    ///
    /// Domain rejections carry their own message. Infrastructure failures
    /// collapse to a generic sentence so internals never leak to users.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::PermissionDenied(msg)
            | Self::InvalidState(msg)
            | Self::Validation(msg) => msg.clone(),
            Self::Persistence(_) => "The ticket could not be saved, please try again.".into(),
            Self::Config(_) => "Ticket system is not configured for this community.".into(),
            Self::Platform(_) | Self::RateLimited(_) => {
                "The chat service rejected the request, please try again.".into()
            }
        }
    }

    /// Whether this error is a rejection of the request rather than a fault.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::PermissionDenied(_) | Self::InvalidState(_) | Self::Validation(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Persistence(msg) => write!(f, "persistence: {msg}"),
            Self::Platform(msg) => write!(f, "platform: {msg}"),
            Self::RateLimited(Some(after)) => {
                write!(f, "rate limited: retry after {}ms", after.as_millis())
            }
            Self::RateLimited(None) => write!(f, "rate limited"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("invalid json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
