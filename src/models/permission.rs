//! Channel permission principals and sets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Subject of a channel permission overwrite.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Principal {
    /// The community's default role (everyone).
    Everyone,
    /// A role, such as the configured team role.
    Role(String),
    /// A single member.
    Member(String),
}

/// View/send flags for one principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    /// May see the channel.
    pub view: bool,
    /// May post in the channel.
    pub send: bool,
}

impl Access {
    /// Full participation.
    pub const VIEW_SEND: Self = Self {
        view: true,
        send: true,
    };
    /// Explicit denial.
    pub const DENIED: Self = Self {
        view: false,
        send: false,
    };

    /// Whether this access lets the principal read the channel.
    #[must_use]
    pub fn grants(self) -> bool {
        self.view
    }
}

/// Permission overwrites of one channel, keyed by principal.
pub type PermissionSet = BTreeMap<Principal, Access>;

/// One overwrite update; `access == None` removes the overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionChange {
    /// Principal whose overwrite changes.
    pub principal: Principal,
    /// New access, or `None` to remove the overwrite.
    pub access: Option<Access>,
}
