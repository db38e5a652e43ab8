//! Outbound side effects of a transition.
//!
//! Everything here runs after the record is persisted. Failures are logged
//! and never undo the stored state.

use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use super::controls;
use super::{ActionRequest, TicketEngine};
use crate::access;
use crate::audit::{AuditEntry, AuditEventType};
use crate::config::{CommunityConfig, GlobalConfig};
use crate::models::message::{Attachment, MessageEdit, OutgoingMessage};
use crate::models::ticket::Ticket;
use crate::{AppError, Result};

/// How many recent messages are searched for the ticket card.
const CARD_SCAN: usize = 50;

impl TicketEngine {
    /// Bring the channel's overwrites in line with the ticket's state.
    pub(super) async fn sync_permissions(&self, community: &CommunityConfig, ticket: &Ticket) {
        let platform = &self.inner.platform;
        let desired = access::resolve(ticket, community.team_role_id.as_deref());
        let live = match platform.channel_permissions(&ticket.channel_id).await {
            Ok(live) => live,
            Err(err) => {
                warn!(%err, ticket_id = ticket.id, "cannot read channel permissions");
                return;
            }
        };

        let changes = access::diff(&live, &desired);
        debug!(ticket_id = ticket.id, changes = changes.len(), "syncing permissions");
        for change in changes {
            if let Err(err) = platform
                .set_permission(&ticket.channel_id, &change.principal, change.access)
                .await
            {
                warn!(
                    %err,
                    ticket_id = ticket.id,
                    principal = ?change.principal,
                    "permission update failed"
                );
            }
        }
    }

    /// Edit the ticket card: swap the claim toggle and/or recolour it.
    pub(super) async fn refresh_card(&self, ticket: &Ticket, edit: MessageEdit) {
        let platform = &self.inner.platform;
        let history = match platform.fetch_history(&ticket.channel_id, CARD_SCAN).await {
            Ok(history) => history,
            Err(err) => {
                warn!(%err, ticket_id = ticket.id, "cannot read history for card update");
                return;
            }
        };
        let Some(card) = history
            .iter()
            .rev()
            .find(|m| controls::is_ticket_card(&m.controls))
        else {
            debug!(ticket_id = ticket.id, "ticket card not found in recent history");
            return;
        };
        if let Err(err) = platform
            .edit_message(&ticket.channel_id, &card.id, edit)
            .await
        {
            warn!(%err, ticket_id = ticket.id, "ticket card update failed");
        }
    }

    /// Id of the newest close request that is still awaiting an answer.
    pub(super) async fn pending_close_prompt(&self, ticket: &Ticket) -> Result<String> {
        let history = self
            .inner
            .platform
            .fetch_history(&ticket.channel_id, CARD_SCAN)
            .await?;
        history
            .iter()
            .rev()
            .find(|m| controls::is_close_prompt(&m.controls))
            .map(|m| m.id.clone())
            .ok_or_else(|| AppError::InvalidState("There is no pending close request.".into()))
    }

    /// Replace a close request's text and remove its buttons.
    pub(super) async fn settle_close_prompt(&self, ticket: &Ticket, message_id: &str, text: String) {
        let edit = MessageEdit {
            text: Some(text),
            controls: Some(Vec::new()),
            ..MessageEdit::default()
        };
        if let Err(err) = self
            .inner
            .platform
            .edit_message(&ticket.channel_id, message_id, edit)
            .await
        {
            warn!(%err, ticket_id = ticket.id, "close request update failed");
        }
    }

    /// Post a message into the ticket channel.
    pub(super) async fn announce(&self, channel_id: &str, message: OutgoingMessage) {
        if let Err(err) = self.inner.platform.send_message(channel_id, message).await {
            warn!(%err, channel = channel_id, "announcement failed");
        }
    }

    /// Record an audit entry if an audit log is configured.
    pub(super) fn record(
        &self,
        event: AuditEventType,
        request: &ActionRequest,
        ticket: &Ticket,
        detail: Option<String>,
    ) {
        let Some(audit) = &self.inner.audit else {
            return;
        };
        let entry = AuditEntry::new(
            event,
            &request.community_id,
            ticket.id,
            &ticket.channel_id,
            &request.actor_id,
        );
        let entry = match detail {
            Some(detail) => entry.with_detail(detail),
            None => entry,
        };
        if let Err(err) = audit.log_entry(entry) {
            warn!(%err, ?event, "audit write failed");
        }
    }

    /// Hand a notification to the notifier without waiting for it.
    pub(super) fn notify(&self, community_id: &str, text: String) {
        let notifier = Arc::clone(&self.inner.notifier);
        let community = community_id.to_owned();
        self.inner.background.spawn(
            async move {
                if let Err(err) = notifier.notify(&community, &text).await {
                    warn!(%err, "notification failed");
                }
            }
            .instrument(info_span!("notify", community = community_id)),
        );
    }

    /// Start transcript archiving and channel deletion for a closed ticket.
    pub(super) fn spawn_close_finalisation(
        &self,
        config: Arc<GlobalConfig>,
        community_id: String,
        ticket: Ticket,
    ) {
        let engine = self.clone();
        let span = info_span!(
            "close_finalisation",
            community = %community_id,
            ticket_id = ticket.id,
            channel = %ticket.channel_id
        );
        self.inner.background.spawn(
            async move { engine.finalise_close(&config, &community_id, &ticket).await }
                .instrument(span),
        );
    }

    async fn finalise_close(&self, config: &GlobalConfig, community_id: &str, ticket: &Ticket) {
        match config.community(community_id) {
            Ok(community) => self.publish_transcript(config, community, ticket).await,
            Err(err) => warn!(%err, "community no longer configured, skipping transcript"),
        }

        tokio::time::sleep(config.close_grace()).await;

        self.inner.renamer.forget(&ticket.channel_id);
        match self.inner.platform.delete_channel(&ticket.channel_id).await {
            Ok(()) => info!("ticket channel deleted"),
            Err(err) => warn!(%err, "ticket channel deletion failed"),
        }
        self.inner.locks.release(community_id, &ticket.channel_id);
    }

    async fn publish_transcript(
        &self,
        config: &GlobalConfig,
        community: &CommunityConfig,
        ticket: &Ticket,
    ) {
        let platform = &self.inner.platform;
        let name = platform
            .channel_name(&ticket.channel_id)
            .await
            .unwrap_or_else(|_| ticket.channel_name());
        let history = match platform
            .fetch_history(&ticket.channel_id, config.history_limit)
            .await
        {
            Ok(history) => history,
            Err(err) => {
                warn!(%err, "cannot read history for transcript");
                return;
            }
        };
        let transcript = match self.inner.transcripts.generate(ticket, &name, &history) {
            Ok(transcript) => transcript,
            Err(err) => {
                warn!(%err, "transcript generation failed");
                return;
            }
        };

        if let Some(archive) = &self.inner.archive {
            if let Err(err) = archive.store(&community.id, ticket.id, &transcript) {
                warn!(%err, "transcript archive write failed");
            }
        }

        let Some(target) = community.transcript_target() else {
            debug!("no transcript channel configured");
            return;
        };
        let message = OutgoingMessage {
            text: Some(format!("\u{1f4c1} Transcript Ticket #{}", ticket.id)),
            controls: community
                .transcript_url(ticket.id)
                .map(|url| controls::transcript_link_rows(&url))
                .unwrap_or_default(),
            attachments: vec![
                Attachment {
                    filename: format!("transcript_{}.txt", ticket.id),
                    content: transcript.text,
                },
                Attachment {
                    filename: format!("transcript_{}.html", ticket.id),
                    content: transcript.html,
                },
            ],
            ..OutgoingMessage::default()
        };
        if let Err(err) = platform.send_message(target, message).await {
            warn!(%err, "transcript post failed");
        }
    }
}

/// Claim toggle edit for the ticket card.
pub(super) fn toggle_edit(claimed: bool) -> MessageEdit {
    MessageEdit {
        controls: Some(controls::ticket_rows(claimed)),
        ..MessageEdit::default()
    }
}

/// Card recolour edit after a priority change.
pub(super) fn recolour_edit(ticket: &Ticket) -> MessageEdit {
    MessageEdit {
        embed_color: Some(ticket.priority.color()),
        ..MessageEdit::default()
    }
}

/// Close-request prompt; `pings` names whoever has to answer it.
pub(super) fn close_request_message(actor_id: &str, pings: &str) -> OutgoingMessage {
    OutgoingMessage {
        text: Some(format!("\u{2753} Close requested by <@{actor_id}> {pings}")),
        controls: controls::close_request_rows(),
        ..OutgoingMessage::default()
    }
}
