//! In-process [`ChatPlatform`] used by the replay command and the tests.
//!
//! Keeps channels, overwrites, messages and memberships in memory, records
//! every rename and permission call, and can inject failures and latency.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

use super::{ChatPlatform, NewChannel, PlatformFuture};
use crate::models::message::{HistoryMessage, MessageEdit, OutgoingMessage};
use crate::models::permission::{Access, PermissionSet, Principal};
use crate::{AppError, Result};

/// User id the in-memory bot posts as.
pub const BOT_USER_ID: &str = "bot";

/// Snapshot of one in-memory channel.
#[derive(Debug, Clone)]
pub struct ChannelState {
    /// Owning community.
    pub community_id: String,
    /// Current name.
    pub name: String,
    /// Category, if any.
    pub parent_id: Option<String>,
    /// Live permission overwrites.
    pub permissions: PermissionSet,
    /// Messages, oldest first.
    pub messages: Vec<HistoryMessage>,
}

/// One recorded rename call.
#[derive(Debug, Clone)]
pub struct RenameCall {
    /// Renamed channel.
    pub channel_id: String,
    /// Requested name.
    pub name: String,
    /// When the call was received.
    pub at: Instant,
}

#[derive(Default)]
struct State {
    channels: HashMap<String, ChannelState>,
    members: HashMap<(String, String), Vec<String>>,
    renames: Vec<RenameCall>,
    permission_calls: Vec<(String, Principal, Option<Access>)>,
    direct_messages: Vec<(String, String)>,
    deleted_channels: Vec<String>,
    failing_renames: u32,
    rate_limit_next_rename: Option<Duration>,
    failing_permission_calls: bool,
}

/// In-memory chat service.
#[derive(Default)]
pub struct InMemoryPlatform {
    state: Mutex<State>,
    rename_latency: Mutex<Duration>,
}

impl InMemoryPlatform {
    /// Empty platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a community member with the given roles.
    pub fn add_member(&self, community_id: &str, user_id: &str, roles: &[&str]) {
        self.state().members.insert(
            (community_id.to_owned(), user_id.to_owned()),
            roles.iter().map(ToString::to_string).collect(),
        );
    }

    /// Create a channel directly and return its id.
    #[must_use]
    pub fn insert_channel(&self, community_id: &str, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.state().channels.insert(
            id.clone(),
            ChannelState {
                community_id: community_id.to_owned(),
                name: name.to_owned(),
                parent_id: None,
                permissions: PermissionSet::new(),
                messages: Vec::new(),
            },
        );
        id
    }

    /// Post a message as a user and return its id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the channel does not exist.
    pub fn post_as(&self, channel_id: &str, author_id: &str, content: &str) -> Result<String> {
        let mut state = self.state();
        let channel = state
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| AppError::NotFound(format!("channel {channel_id}")))?;
        let id = Uuid::new_v4().to_string();
        channel.messages.push(HistoryMessage {
            id: id.clone(),
            author_id: author_id.to_owned(),
            author_name: author_id.to_owned(),
            content: content.to_owned(),
            created_at: Utc::now(),
            embed: None,
            controls: Vec::new(),
            attachments: Vec::new(),
        });
        Ok(id)
    }

    /// Fail the next `count` rename calls with a platform error.
    pub fn fail_next_renames(&self, count: u32) {
        self.state().failing_renames = count;
    }

    /// Answer the next rename call with a rate-limit error.
    pub fn rate_limit_next_rename(&self, retry_after: Duration) {
        self.state().rate_limit_next_rename = Some(retry_after);
    }

    /// Make every permission call fail until switched off again.
    pub fn fail_permission_calls(&self, failing: bool) {
        self.state().failing_permission_calls = failing;
    }

    /// Delay every rename call by `latency`.
    pub fn set_rename_latency(&self, latency: Duration) {
        *self
            .rename_latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Snapshot of a channel, if it still exists.
    #[must_use]
    pub fn channel(&self, channel_id: &str) -> Option<ChannelState> {
        self.state().channels.get(channel_id).cloned()
    }

    /// Ids of the channels of a community.
    #[must_use]
    pub fn channels_in(&self, community_id: &str) -> Vec<String> {
        self.state()
            .channels
            .iter()
            .filter(|(_, c)| c.community_id == community_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every rename call received so far.
    #[must_use]
    pub fn rename_calls(&self) -> Vec<RenameCall> {
        self.state().renames.clone()
    }

    /// Every permission call received so far.
    #[must_use]
    pub fn permission_calls(&self) -> Vec<(String, Principal, Option<Access>)> {
        self.state().permission_calls.clone()
    }

    /// Private messages sent so far as `(user, text)`.
    #[must_use]
    pub fn direct_messages(&self) -> Vec<(String, String)> {
        self.state().direct_messages.clone()
    }

    /// Channels deleted so far.
    #[must_use]
    pub fn deleted_channels(&self) -> Vec<String> {
        self.state().deleted_channels.clone()
    }

    fn with_channel<T>(
        &self,
        channel_id: &str,
        f: impl FnOnce(&mut ChannelState) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state();
        let channel = state
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| AppError::NotFound(format!("channel {channel_id}")))?;
        f(channel)
    }
}

impl ChatPlatform for InMemoryPlatform {
    fn create_channel<'a>(
        &'a self,
        community_id: &'a str,
        channel: NewChannel,
    ) -> PlatformFuture<'a, String> {
        Box::pin(async move {
            let id = Uuid::new_v4().to_string();
            self.state().channels.insert(
                id.clone(),
                ChannelState {
                    community_id: community_id.to_owned(),
                    name: channel.name,
                    parent_id: channel.parent_id,
                    permissions: channel.permissions,
                    messages: Vec::new(),
                },
            );
            Ok(id)
        })
    }

    fn channel_name<'a>(&'a self, channel_id: &'a str) -> PlatformFuture<'a, String> {
        Box::pin(async move { self.with_channel(channel_id, |c| Ok(c.name.clone())) })
    }

    fn rename_channel<'a>(&'a self, channel_id: &'a str, name: &'a str) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            {
                let mut state = self.state();
                state.renames.push(RenameCall {
                    channel_id: channel_id.to_owned(),
                    name: name.to_owned(),
                    at: Instant::now(),
                });
                if let Some(retry_after) = state.rate_limit_next_rename.take() {
                    return Err(AppError::RateLimited(Some(retry_after)));
                }
                if state.failing_renames > 0 {
                    state.failing_renames -= 1;
                    return Err(AppError::Platform("rename rejected".into()));
                }
            }

            let latency = *self
                .rename_latency
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            self.with_channel(channel_id, |c| {
                c.name = name.to_owned();
                Ok(())
            })
        })
    }

    fn delete_channel<'a>(&'a self, channel_id: &'a str) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state();
            state
                .channels
                .remove(channel_id)
                .ok_or_else(|| AppError::NotFound(format!("channel {channel_id}")))?;
            state.deleted_channels.push(channel_id.to_owned());
            Ok(())
        })
    }

    fn channel_permissions<'a>(&'a self, channel_id: &'a str) -> PlatformFuture<'a, PermissionSet> {
        Box::pin(async move { self.with_channel(channel_id, |c| Ok(c.permissions.clone())) })
    }

    fn set_permission<'a>(
        &'a self,
        channel_id: &'a str,
        principal: &'a Principal,
        access: Option<Access>,
    ) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state();
            state
                .permission_calls
                .push((channel_id.to_owned(), principal.clone(), access));
            if state.failing_permission_calls {
                return Err(AppError::Platform("missing permission".into()));
            }
            let channel = state
                .channels
                .get_mut(channel_id)
                .ok_or_else(|| AppError::NotFound(format!("channel {channel_id}")))?;
            match access {
                Some(access) => {
                    channel.permissions.insert(principal.clone(), access);
                }
                None => {
                    channel.permissions.remove(principal);
                }
            }
            Ok(())
        })
    }

    fn send_message<'a>(
        &'a self,
        channel_id: &'a str,
        message: OutgoingMessage,
    ) -> PlatformFuture<'a, String> {
        Box::pin(async move {
            self.with_channel(channel_id, |c| {
                let id = Uuid::new_v4().to_string();
                c.messages.push(HistoryMessage {
                    id: id.clone(),
                    author_id: BOT_USER_ID.to_owned(),
                    author_name: "Ticket Warden".to_owned(),
                    content: message.text.unwrap_or_default(),
                    created_at: Utc::now(),
                    embed: message.embed,
                    controls: message.controls,
                    attachments: message
                        .attachments
                        .into_iter()
                        .map(|a| {
                            let url = format!("memory://{channel_id}/{}", a.filename);
                            (a.filename, url)
                        })
                        .collect(),
                });
                Ok(id)
            })
        })
    }

    fn edit_message<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
        edit: MessageEdit,
    ) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            self.with_channel(channel_id, |c| {
                let message = c
                    .messages
                    .iter_mut()
                    .find(|m| m.id == message_id)
                    .ok_or_else(|| AppError::NotFound(format!("message {message_id}")))?;
                if let Some(text) = edit.text {
                    message.content = text;
                }
                if let Some(controls) = edit.controls {
                    message.controls = controls;
                }
                if let (Some(color), Some(embed)) = (edit.embed_color, message.embed.as_mut()) {
                    embed.color = Some(color);
                }
                Ok(())
            })
        })
    }

    fn delete_message<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
    ) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            self.with_channel(channel_id, |c| {
                let before = c.messages.len();
                c.messages.retain(|m| m.id != message_id);
                if c.messages.len() == before {
                    return Err(AppError::NotFound(format!("message {message_id}")));
                }
                Ok(())
            })
        })
    }

    fn fetch_history<'a>(
        &'a self,
        channel_id: &'a str,
        limit: usize,
    ) -> PlatformFuture<'a, Vec<HistoryMessage>> {
        Box::pin(async move {
            self.with_channel(channel_id, |c| {
                let skip = c.messages.len().saturating_sub(limit);
                Ok(c.messages[skip..].to_vec())
            })
        })
    }

    fn member_roles<'a>(
        &'a self,
        community_id: &'a str,
        user_id: &'a str,
    ) -> PlatformFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.state()
                .members
                .get(&(community_id.to_owned(), user_id.to_owned()))
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("member {user_id}")))
        })
    }

    fn send_direct<'a>(&'a self, user_id: &'a str, text: &'a str) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            self.state()
                .direct_messages
                .push((user_id.to_owned(), text.to_owned()));
            Ok(())
        })
    }
}
