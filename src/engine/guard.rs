//! Keeping outsiders from writing in claimed tickets.

use tracing::{debug, info, warn};

use super::{ActionRequest, GuardOutcome, TicketEngine};
use crate::audit::AuditEventType;
use crate::Result;

impl TicketEngine {
    /// Check an incoming user message in a possible ticket channel.
    ///
    /// Only open, claimed tickets are guarded. There, messages from anyone
    /// but the creator, the claimer, added users and the team are deleted
    /// and the author gets a private notice. Bot messages must be filtered
    /// out by the caller.
    ///
    /// # Errors
    ///
    /// `Persistence` when the ticket collection cannot be read, `Platform`
    /// when the author's roles cannot be looked up.
    pub async fn guard_message(
        &self,
        community_id: &str,
        channel_id: &str,
        author_id: &str,
        message_id: &str,
    ) -> Result<GuardOutcome> {
        let config = self.inner.config.current();
        let Ok(community) = config.community(community_id) else {
            return Ok(GuardOutcome::Allowed);
        };
        let Some(ticket) = self.inner.store.find_by_channel(community_id, channel_id)? else {
            return Ok(GuardOutcome::Allowed);
        };
        if !ticket.is_open() || ticket.claimer.is_none() || ticket.is_participant(author_id) {
            return Ok(GuardOutcome::Allowed);
        }
        if self.is_team(community, author_id).await? {
            return Ok(GuardOutcome::Allowed);
        }

        let platform = &self.inner.platform;
        if let Err(err) = platform.delete_message(channel_id, message_id).await {
            warn!(%err, channel = channel_id, "cannot delete outsider message");
        }
        let notice = format!(
            "\u{274c} You may not write in ticket #{}. It has been claimed and is only \
             open to its creator, the claimer, added users and the team.",
            ticket.id
        );
        if let Err(err) = platform.send_direct(author_id, &notice).await {
            debug!(%err, author = author_id, "private notice not delivered");
        }
        info!(ticket_id = ticket.id, author = author_id, "outsider message removed");
        self.record(
            AuditEventType::MessageRejected,
            &ActionRequest::new(community_id, channel_id, author_id),
            &ticket,
            Some(message_id.to_owned()),
        );

        Ok(GuardOutcome::Deleted)
    }
}
