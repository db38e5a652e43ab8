//! Transitions on existing tickets.

use std::sync::Arc;

use tracing::{info, instrument};

use super::controls::{self, ControlAction};
use super::effects::{close_request_message, recolour_edit, toggle_edit};
use super::{team_mention, ActionReply, ActionRequest, TicketEngine};
use crate::audit::AuditEventType;
use crate::config::{CommunityConfig, GlobalConfig};
use crate::models::message::OutgoingMessage;
use crate::models::ticket::{Ticket, TicketStatus};
use crate::{AppError, Result};

/// Longest close-denial reason kept.
const MAX_REASON_LEN: usize = 1000;

impl TicketEngine {
    /// Take ownership of a ticket.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown community or channel, `InvalidState` when
    /// the ticket is closed or already claimed, `PermissionDenied` when the
    /// actor is not on the team, `Persistence` when the store write fails.
    #[instrument(skip_all, fields(community = %request.community_id, channel = %request.channel_id, actor = %request.actor_id))]
    pub async fn claim(&self, request: &ActionRequest) -> Result<ActionReply> {
        let _guard = self.lock(request).await;
        let config = self.inner.config.current();
        let community = config.community(&request.community_id)?;
        let mut ticket = self.open_ticket(request)?;

        if !self.is_team(community, &request.actor_id).await? {
            return Err(AppError::PermissionDenied("Only the team can claim tickets.".into()));
        }
        if let Some(claimer) = &ticket.claimer {
            return Err(AppError::InvalidState(format!(
                "This ticket is already claimed by <@{claimer}>."
            )));
        }

        ticket.claimer = Some(request.actor_id.clone());
        self.inner.store.upsert(&request.community_id, &ticket)?;
        info!(ticket_id = ticket.id, "ticket claimed");

        self.sync_permissions(community, &ticket).await;
        self.refresh_card(&ticket, toggle_edit(true)).await;
        self.announce(
            &ticket.channel_id,
            OutgoingMessage::plain(format!(
                "\u{2705} <@{}> has claimed this ticket. {}",
                request.actor_id,
                team_mention(community)
            )),
        )
        .await;
        self.record(AuditEventType::TicketClaimed, request, &ticket, None);
        self.notify(
            &request.community_id,
            format!("Ticket #{} claimed by <@{}>", ticket.id, request.actor_id),
        );

        Ok(ActionReply::with_ticket("Ticket claimed.", ticket))
    }

    /// Release ownership of a ticket.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown community or channel, `InvalidState` when
    /// the ticket is closed or not claimed, `PermissionDenied` when the actor
    /// is neither the claimer nor on the team, `Persistence` when the store
    /// write fails.
    #[instrument(skip_all, fields(community = %request.community_id, channel = %request.channel_id, actor = %request.actor_id))]
    pub async fn unclaim(&self, request: &ActionRequest) -> Result<ActionReply> {
        let _guard = self.lock(request).await;
        let config = self.inner.config.current();
        let community = config.community(&request.community_id)?;
        let mut ticket = self.open_ticket(request)?;

        let is_claimer = ticket.claimer.as_deref() == Some(request.actor_id.as_str());
        if !is_claimer && !self.is_team(community, &request.actor_id).await? {
            return Err(AppError::PermissionDenied(
                "Only the claimer or the team can unclaim this ticket.".into(),
            ));
        }
        let Some(previous) = ticket.claimer.take() else {
            return Err(AppError::InvalidState("This ticket is not claimed.".into()));
        };

        self.inner.store.upsert(&request.community_id, &ticket)?;
        info!(ticket_id = ticket.id, previous = %previous, "ticket unclaimed");

        self.sync_permissions(community, &ticket).await;
        self.refresh_card(&ticket, toggle_edit(false)).await;
        self.announce(
            &ticket.channel_id,
            OutgoingMessage::plain(format!(
                "\u{1f504} <@{}> released this ticket. {}",
                request.actor_id,
                team_mention(community)
            )),
        )
        .await;
        self.record(
            AuditEventType::TicketUnclaimed,
            request,
            &ticket,
            Some(previous),
        );
        self.notify(
            &request.community_id,
            format!("Ticket #{} unclaimed by <@{}>", ticket.id, request.actor_id),
        );

        Ok(ActionReply::with_ticket("Ticket released.", ticket))
    }

    /// Raise the ticket's priority by one level.
    ///
    /// # Errors
    ///
    /// See [`TicketEngine::priority_down`].
    pub async fn priority_up(&self, request: &ActionRequest) -> Result<ActionReply> {
        self.change_priority(request, true).await
    }

    /// Lower the ticket's priority by one level.
    ///
    /// At either bound the priority stays put and nothing is written.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown community or channel, `InvalidState` when
    /// the ticket is closed, `PermissionDenied` when the actor is not on the
    /// team, `Persistence` when the store write fails.
    pub async fn priority_down(&self, request: &ActionRequest) -> Result<ActionReply> {
        self.change_priority(request, false).await
    }

    #[instrument(skip_all, fields(community = %request.community_id, channel = %request.channel_id, actor = %request.actor_id, raise))]
    async fn change_priority(&self, request: &ActionRequest, raise: bool) -> Result<ActionReply> {
        let _guard = self.lock(request).await;
        let config = self.inner.config.current();
        let community = config.community(&request.community_id)?;
        let mut ticket = self.open_ticket(request)?;

        if !self.is_team(community, &request.actor_id).await? {
            return Err(AppError::PermissionDenied(
                "Only the team can change the priority.".into(),
            ));
        }

        let next = if raise {
            ticket.priority.raised()
        } else {
            ticket.priority.lowered()
        };
        if next == ticket.priority {
            let label = next.label();
            return Ok(ActionReply::with_ticket(format!("Priority: {label}"), ticket));
        }

        ticket.priority = next;
        self.inner.store.upsert(&request.community_id, &ticket)?;
        info!(ticket_id = ticket.id, level = next.level(), "priority changed");

        self.inner
            .renamer
            .request_rename(&ticket.channel_id, &ticket.channel_name());
        self.refresh_card(&ticket, recolour_edit(&ticket)).await;
        self.announce(
            &ticket.channel_id,
            OutgoingMessage::plain(format!(
                "{} Priority changed to {} {}",
                team_mention(community),
                next.dot(),
                next.label()
            )),
        )
        .await;
        let direction = if raise { "up" } else { "down" };
        self.record(
            AuditEventType::PriorityChanged,
            request,
            &ticket,
            Some(format!("{direction} to {}", next.label())),
        );
        self.notify(
            &request.community_id,
            format!(
                "Ticket #{} priority {direction} to {} by <@{}>",
                ticket.id,
                next.label(),
                request.actor_id
            ),
        );

        Ok(ActionReply::with_ticket(
            format!("Priority: {}", next.label()),
            ticket,
        ))
    }

    /// Ask the team to close a ticket. Changes no state.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown community or channel, `InvalidState` when
    /// the ticket is closed, `PermissionDenied` when the actor is neither a
    /// participant nor on the team.
    #[instrument(skip_all, fields(community = %request.community_id, channel = %request.channel_id, actor = %request.actor_id))]
    pub async fn request_close(&self, request: &ActionRequest) -> Result<ActionReply> {
        let _guard = self.lock(request).await;
        let config = self.inner.config.current();
        let community = config.community(&request.community_id)?;
        let ticket = self.open_ticket(request)?;

        let actor_is_team = self.is_team(community, &request.actor_id).await?;
        if !actor_is_team && !ticket.is_participant(&request.actor_id) {
            return Err(AppError::PermissionDenied(
                "Only participants of this ticket can request closing.".into(),
            ));
        }

        // The team asks the creator side; everyone else asks the claimer or the team.
        let pings = if actor_is_team && ticket.creator_id != request.actor_id {
            std::iter::once(&ticket.creator_id)
                .chain(&ticket.added_users)
                .map(|id| format!("<@{id}>"))
                .collect::<Vec<_>>()
                .join(" ")
        } else if let Some(claimer) = &ticket.claimer {
            format!("<@{claimer}>")
        } else {
            team_mention(community)
        };
        self.announce(
            &ticket.channel_id,
            close_request_message(&request.actor_id, &pings),
        )
        .await;
        self.record(AuditEventType::CloseRequested, request, &ticket, None);
        self.notify(
            &request.community_id,
            format!(
                "Close of ticket #{} requested by <@{}>",
                ticket.id, request.actor_id
            ),
        );

        Ok(ActionReply::with_ticket("Close request sent.", ticket))
    }

    /// Close a ticket.
    ///
    /// The record is closed and persisted before this returns. Transcript,
    /// archive post and channel deletion continue in the background; see
    /// [`TicketEngine::drain_background`].
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown community or channel, `InvalidState` when
    /// the ticket is already closed, `PermissionDenied` when the actor is not
    /// on the team, `Persistence` when the store write fails.
    #[instrument(skip_all, fields(community = %request.community_id, channel = %request.channel_id, actor = %request.actor_id))]
    pub async fn close(&self, request: &ActionRequest) -> Result<ActionReply> {
        let _guard = self.lock(request).await;
        let config = self.inner.config.current();
        let community = config.community(&request.community_id)?;
        let mut ticket = self.open_ticket(request)?;

        if !self.is_team(community, &request.actor_id).await? {
            return Err(AppError::PermissionDenied("Only the team can close tickets.".into()));
        }

        self.commit_close(request, &mut ticket)?;
        self.after_close(request, &config, community, &ticket).await;
        Ok(ActionReply::with_ticket("Ticket is being closed\u{2026}", ticket))
    }

    /// Accept the pending close request and close the ticket.
    ///
    /// Participants and the team may answer a close request.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown community or channel, `InvalidState` when
    /// the ticket is closed or no close request is pending,
    /// `PermissionDenied` when the actor is neither a participant nor on the
    /// team, `Persistence` when the store write fails.
    #[instrument(skip_all, fields(community = %request.community_id, channel = %request.channel_id, actor = %request.actor_id))]
    pub async fn approve_close_request(&self, request: &ActionRequest) -> Result<ActionReply> {
        let _guard = self.lock(request).await;
        let config = self.inner.config.current();
        let community = config.community(&request.community_id)?;
        let mut ticket = self.open_ticket(request)?;

        self.require_close_responder(community, &ticket, request).await?;
        let prompt = self.pending_close_prompt(&ticket).await?;

        self.commit_close(request, &mut ticket)?;
        self.settle_close_prompt(
            &ticket,
            &prompt,
            format!("\u{2705} Close approved by <@{}>", request.actor_id),
        )
        .await;
        self.record(AuditEventType::CloseApproved, request, &ticket, None);
        self.after_close(request, &config, community, &ticket).await;

        Ok(ActionReply::with_ticket("Ticket is being closed\u{2026}", ticket))
    }

    /// Turn down the pending close request; the ticket stays open.
    ///
    /// A blank or missing `reason` is shown as "No reason given".
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown community or channel, `InvalidState` when
    /// the ticket is closed or no close request is pending,
    /// `PermissionDenied` when the actor is neither a participant nor on the
    /// team.
    #[instrument(skip_all, fields(community = %request.community_id, channel = %request.channel_id, actor = %request.actor_id))]
    pub async fn deny_close_request(
        &self,
        request: &ActionRequest,
        reason: Option<&str>,
    ) -> Result<ActionReply> {
        let _guard = self.lock(request).await;
        let config = self.inner.config.current();
        let community = config.community(&request.community_id)?;
        let ticket = self.open_ticket(request)?;

        self.require_close_responder(community, &ticket, request).await?;
        let prompt = self.pending_close_prompt(&ticket).await?;

        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map_or_else(
                || "No reason given".to_owned(),
                |r| r.chars().take(MAX_REASON_LEN).collect(),
            );
        info!(ticket_id = ticket.id, "close request denied");

        self.settle_close_prompt(
            &ticket,
            &prompt,
            format!(
                "\u{274c} Close denied by <@{}>\nReason: {reason}",
                request.actor_id
            ),
        )
        .await;
        self.record(
            AuditEventType::CloseDenied,
            request,
            &ticket,
            Some(reason),
        );
        self.notify(
            &request.community_id,
            format!(
                "Close of ticket #{} denied by <@{}>",
                ticket.id, request.actor_id
            ),
        );

        Ok(ActionReply::with_ticket("Close request denied.", ticket))
    }

    async fn require_close_responder(
        &self,
        community: &CommunityConfig,
        ticket: &Ticket,
        request: &ActionRequest,
    ) -> Result<()> {
        if ticket.is_participant(&request.actor_id)
            || self.is_team(community, &request.actor_id).await?
        {
            return Ok(());
        }
        Err(AppError::PermissionDenied(
            "Only participants of this ticket can answer a close request.".into(),
        ))
    }

    fn commit_close(&self, request: &ActionRequest, ticket: &mut Ticket) -> Result<()> {
        ticket.status = TicketStatus::Closed;
        self.inner.store.upsert(&request.community_id, ticket)?;
        info!(ticket_id = ticket.id, "ticket closed");
        Ok(())
    }

    /// Effects of a persisted close; archiving and deletion run in the background.
    async fn after_close(
        &self,
        request: &ActionRequest,
        config: &Arc<GlobalConfig>,
        community: &CommunityConfig,
        ticket: &Ticket,
    ) {
        self.announce(
            &ticket.channel_id,
            OutgoingMessage::plain(format!(
                "\u{1f512} Ticket closed by <@{}> \u{2022} {}",
                request.actor_id,
                team_mention(community)
            )),
        )
        .await;
        self.sync_permissions(community, ticket).await;
        self.record(AuditEventType::TicketClosed, request, ticket, None);
        self.notify(
            &request.community_id,
            format!("Ticket #{} closed by <@{}>", ticket.id, request.actor_id),
        );
        self.spawn_close_finalisation(
            Arc::clone(config),
            request.community_id.clone(),
            ticket.clone(),
        );
    }

    /// Grant an additional member access to a ticket.
    ///
    /// `target` may be a raw user id or a mention.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown community, channel or member,
    /// `InvalidState` when the ticket is closed or the member already has
    /// access, `PermissionDenied` when the actor is not on the team,
    /// `Validation` when `target` holds no user id, `Persistence` when the
    /// store write fails.
    #[instrument(skip_all, fields(community = %request.community_id, channel = %request.channel_id, actor = %request.actor_id))]
    pub async fn add_user(&self, request: &ActionRequest, target: &str) -> Result<ActionReply> {
        let _guard = self.lock(request).await;
        let config = self.inner.config.current();
        let community = config.community(&request.community_id)?;
        let mut ticket = self.open_ticket(request)?;

        if !self.is_team(community, &request.actor_id).await? {
            return Err(AppError::PermissionDenied("Only the team can add users.".into()));
        }
        let user_id = controls::parse_user_reference(target)
            .ok_or_else(|| AppError::Validation("That is not a valid user id.".into()))?;
        if ticket.is_participant(&user_id) {
            return Err(AppError::InvalidState(format!(
                "<@{user_id}> already has access."
            )));
        }
        match self
            .inner
            .platform
            .member_roles(&request.community_id, &user_id)
            .await
        {
            Ok(_) => {}
            Err(AppError::NotFound(_)) => {
                return Err(AppError::NotFound("Member not found.".into()));
            }
            Err(err) => return Err(err),
        }

        ticket.added_users.push(user_id.clone());
        self.inner.store.upsert(&request.community_id, &ticket)?;
        info!(ticket_id = ticket.id, user = %user_id, "user added");

        self.sync_permissions(community, &ticket).await;
        self.announce(
            &ticket.channel_id,
            OutgoingMessage::plain(format!(
                "\u{2795} <@{user_id}> was added to this ticket. {}",
                team_mention(community)
            )),
        )
        .await;
        self.record(
            AuditEventType::UserAdded,
            request,
            &ticket,
            Some(user_id.clone()),
        );
        self.notify(
            &request.community_id,
            format!(
                "<@{user_id}> added to ticket #{} by <@{}>",
                ticket.id, request.actor_id
            ),
        );

        Ok(ActionReply::with_ticket(format!("<@{user_id}> added."), ticket))
    }

    /// Route a pressed control to its transition.
    ///
    /// `add_user` and `deny_close_request` only open their input prompt
    /// here; the submitted value goes through [`TicketEngine::add_user`] or
    /// [`TicketEngine::deny_close_request`].
    ///
    /// # Errors
    ///
    /// `Validation` for an unknown control id, otherwise whatever the
    /// routed transition returns.
    pub async fn press(&self, control_id: &str, request: &ActionRequest) -> Result<ActionReply> {
        match control_id.parse::<ControlAction>()? {
            ControlAction::RequestClose => self.request_close(request).await,
            ControlAction::Close => self.close(request).await,
            ControlAction::ApproveClose => self.approve_close_request(request).await,
            ControlAction::DenyClose => Ok(ActionReply {
                message: "Enter a reason for denying (optional).".into(),
                ticket: None,
            }),
            ControlAction::PriorityDown => self.priority_down(request).await,
            ControlAction::PriorityUp => self.priority_up(request).await,
            ControlAction::Claim => self.claim(request).await,
            ControlAction::Unclaim => self.unclaim(request).await,
            ControlAction::AddUser => Ok(ActionReply {
                message: "Enter the user to add (mention or id).".into(),
                ticket: None,
            }),
        }
    }

    async fn lock(&self, request: &ActionRequest) -> tokio::sync::OwnedMutexGuard<()> {
        self.inner
            .locks
            .acquire(&request.community_id, &request.channel_id)
            .await
    }
}
