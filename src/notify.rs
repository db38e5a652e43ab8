//! Log-channel notifications for ticket events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config_watcher::ConfigHandle;
use crate::models::message::{Embed, OutgoingMessage};
use crate::platform::ChatPlatform;
use crate::Result;

/// Accent colour of log entries.
pub const LOG_COLOR: u32 = 0x0000_ff00;

/// Boxed future returned by [`Notifier::notify`].
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Receives one line of text per ticket event.
///
/// The engine runs notifications in the background and only logs their
/// failures; a notifier can never fail a transition.
pub trait Notifier: Send + Sync {
    /// Deliver `text` for `community_id`.
    fn notify<'a>(&'a self, community_id: &'a str, text: &'a str) -> NotifyFuture<'a>;
}

/// Posts notifications as embeds into each of the community's log channels.
pub struct ChannelNotifier {
    platform: Arc<dyn ChatPlatform>,
    config: ConfigHandle,
}

impl ChannelNotifier {
    /// Notifier posting through `platform` to the configured log channels.
    #[must_use]
    pub fn new(platform: Arc<dyn ChatPlatform>, config: ConfigHandle) -> Self {
        Self { platform, config }
    }
}

impl Notifier for ChannelNotifier {
    fn notify<'a>(&'a self, community_id: &'a str, text: &'a str) -> NotifyFuture<'a> {
        Box::pin(async move {
            let config = self.config.current();
            let community = config.community(community_id)?;
            if community.log_channel_ids.is_empty() {
                debug!(community = community_id, "no log channel configured");
                return Ok(());
            }

            let message = OutgoingMessage {
                embed: Some(Embed {
                    description: Some(text.to_owned()),
                    color: Some(LOG_COLOR),
                    footer: Some(community.footer.clone()),
                    ..Embed::default()
                }),
                ..OutgoingMessage::default()
            };

            // Every channel gets its copy even when an earlier one fails.
            let mut first_error = None;
            for channel in &community.log_channel_ids {
                if let Err(err) = self.platform.send_message(channel, message.clone()).await {
                    warn!(%err, channel = %channel, "log channel post failed");
                    first_error.get_or_insert(err);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }
}
