//! Buttons attached to ticket messages and parsing of user references.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::message::{Control, ControlStyle};
use crate::AppError;

static USER_ID: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d{17,20}").ok());

/// Action behind a ticket control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Ask the team to close the ticket.
    RequestClose,
    /// Close from the greeting card.
    Close,
    /// Accept a pending close request.
    ApproveClose,
    /// Turn down a pending close request.
    DenyClose,
    /// Lower the priority.
    PriorityDown,
    /// Raise the priority.
    PriorityUp,
    /// Take ownership.
    Claim,
    /// Release ownership.
    Unclaim,
    /// Open the add-member prompt.
    AddUser,
}

impl ControlAction {
    /// Identifier carried by the control.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::RequestClose => "request_close",
            Self::Close => "close",
            Self::ApproveClose => "approve_close_request",
            Self::DenyClose => "deny_close_request",
            Self::PriorityDown => "priority_down",
            Self::PriorityUp => "priority_up",
            Self::Claim => "claim",
            Self::Unclaim => "unclaim",
            Self::AddUser => "add_user",
        }
    }

    fn control(self) -> Control {
        let (label, emoji, style) = match self {
            Self::RequestClose => ("Request close", "\u{2753}", ControlStyle::Secondary),
            Self::Close => ("Close", "\u{1f512}", ControlStyle::Danger),
            Self::ApproveClose => ("Approve", "\u{2705}", ControlStyle::Success),
            Self::DenyClose => ("Deny", "\u{274c}", ControlStyle::Danger),
            Self::PriorityDown => ("Priority down", "\u{1f53b}", ControlStyle::Primary),
            Self::PriorityUp => ("Priority up", "\u{1f53a}", ControlStyle::Primary),
            Self::Claim => ("Claim", "\u{2705}", ControlStyle::Success),
            Self::Unclaim => ("Unclaim", "\u{1f504}", ControlStyle::Secondary),
            Self::AddUser => ("Add user", "\u{2795}", ControlStyle::Secondary),
        };
        Control {
            id: self.id().to_owned(),
            label: label.to_owned(),
            emoji: Some(emoji.to_owned()),
            style,
            url: None,
        }
    }
}

impl FromStr for ControlAction {
    type Err = AppError;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        Ok(match id {
            "request_close" => Self::RequestClose,
            "close" => Self::Close,
            "approve_close_request" => Self::ApproveClose,
            "deny_close_request" => Self::DenyClose,
            "priority_down" => Self::PriorityDown,
            "priority_up" => Self::PriorityUp,
            "claim" => Self::Claim,
            "unclaim" => Self::Unclaim,
            "add_user" => Self::AddUser,
            other => return Err(AppError::Validation(format!("Unknown action: {other}"))),
        })
    }
}

/// Control rows of the ticket greeting.
///
/// Row one asks for closing, row two carries the team actions with the
/// claim toggle last, row three adds members.
#[must_use]
pub fn ticket_rows(claimed: bool) -> Vec<Vec<Control>> {
    let toggle = if claimed {
        ControlAction::Unclaim
    } else {
        ControlAction::Claim
    };
    vec![
        vec![ControlAction::RequestClose.control()],
        vec![
            ControlAction::Close.control(),
            ControlAction::PriorityDown.control(),
            ControlAction::PriorityUp.control(),
            toggle.control(),
        ],
        vec![ControlAction::AddUser.control()],
    ]
}

/// Approve and deny buttons posted with a close request.
#[must_use]
pub fn close_request_rows() -> Vec<Vec<Control>> {
    vec![vec![
        ControlAction::ApproveClose.control(),
        ControlAction::DenyClose.control(),
    ]]
}

/// Link button to a hosted transcript.
#[must_use]
pub fn transcript_link_rows(url: &str) -> Vec<Vec<Control>> {
    vec![vec![Control {
        id: String::new(),
        label: "\u{1f4c4} View transcript".to_owned(),
        emoji: None,
        style: ControlStyle::Link,
        url: Some(url.to_owned()),
    }]]
}

/// Whether a row set is the ticket greeting's.
pub(crate) fn is_ticket_card(rows: &[Vec<Control>]) -> bool {
    rows.iter()
        .flatten()
        .any(|c| c.id == ControlAction::RequestClose.id())
}

/// Whether a row set belongs to a close request that is still pending.
pub(crate) fn is_close_prompt(rows: &[Vec<Control>]) -> bool {
    rows.iter()
        .flatten()
        .any(|c| c.id == ControlAction::ApproveClose.id())
}

/// Extract a user id from a mention (`<@123>`, `<@!123>`) or raw id.
#[must_use]
pub fn parse_user_reference(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .replace("<@!", "")
        .replace("<@", "")
        .replace('>', "");
    USER_ID
        .as_ref()?
        .find(&cleaned)
        .map(|m| m.as_str().to_owned())
}
