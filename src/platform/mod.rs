//! Chat platform abstraction.
//!
//! The [`ChatPlatform`] trait decouples the ticket engine and rename limiter
//! from the concrete chat service. Every outbound effect (channels,
//! permission overwrites, messages, member lookups) routes through it.
//!
//! Implementations report a missing channel, message or member as
//! [`AppError::NotFound`](crate::AppError::NotFound), throttling as
//! [`AppError::RateLimited`](crate::AppError::RateLimited) and any other
//! failure as [`AppError::Platform`](crate::AppError::Platform).

pub mod memory;

use std::future::Future;
use std::pin::Pin;

use crate::models::message::{HistoryMessage, MessageEdit, OutgoingMessage};
use crate::models::permission::{Access, PermissionSet, Principal};
use crate::Result;

/// Boxed future returned by platform calls.
pub type PlatformFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Parameters for creating a ticket channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    /// Channel name.
    pub name: String,
    /// Category the channel is placed in.
    pub parent_id: Option<String>,
    /// Initial permission overwrites.
    pub permissions: PermissionSet,
}

/// Outbound operations the ticket system needs from a chat service.
pub trait ChatPlatform: Send + Sync {
    /// Create a text channel and return its identifier.
    fn create_channel<'a>(
        &'a self,
        community_id: &'a str,
        channel: NewChannel,
    ) -> PlatformFuture<'a, String>;

    /// Read the channel's current name.
    fn channel_name<'a>(&'a self, channel_id: &'a str) -> PlatformFuture<'a, String>;

    /// Rename a channel.
    fn rename_channel<'a>(&'a self, channel_id: &'a str, name: &'a str) -> PlatformFuture<'a, ()>;

    /// Delete a channel.
    fn delete_channel<'a>(&'a self, channel_id: &'a str) -> PlatformFuture<'a, ()>;

    /// Read the channel's live permission overwrites.
    fn channel_permissions<'a>(&'a self, channel_id: &'a str) -> PlatformFuture<'a, PermissionSet>;

    /// Set (`Some`) or remove (`None`) one permission overwrite.
    fn set_permission<'a>(
        &'a self,
        channel_id: &'a str,
        principal: &'a Principal,
        access: Option<Access>,
    ) -> PlatformFuture<'a, ()>;

    /// Post a message and return its identifier.
    fn send_message<'a>(
        &'a self,
        channel_id: &'a str,
        message: OutgoingMessage,
    ) -> PlatformFuture<'a, String>;

    /// Apply a partial edit to a message.
    fn edit_message<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
        edit: MessageEdit,
    ) -> PlatformFuture<'a, ()>;

    /// Delete a message.
    fn delete_message<'a>(&'a self, channel_id: &'a str, message_id: &'a str)
        -> PlatformFuture<'a, ()>;

    /// Read up to `limit` most recent messages, oldest first.
    fn fetch_history<'a>(
        &'a self,
        channel_id: &'a str,
        limit: usize,
    ) -> PlatformFuture<'a, Vec<HistoryMessage>>;

    /// Role identifiers of a community member.
    ///
    /// Fails with `NotFound` when the user is not a member.
    fn member_roles<'a>(
        &'a self,
        community_id: &'a str,
        user_id: &'a str,
    ) -> PlatformFuture<'a, Vec<String>>;

    /// Send a private message to a user.
    fn send_direct<'a>(&'a self, user_id: &'a str, text: &'a str) -> PlatformFuture<'a, ()>;
}
