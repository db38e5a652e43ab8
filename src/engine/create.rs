//! Opening new tickets.

use std::collections::BTreeMap;

use tracing::{info, instrument, warn};

use super::controls;
use super::{ActionReply, ActionRequest, CreateTicketRequest, TicketEngine};
use crate::access;
use crate::audit::AuditEventType;
use crate::config::{CommunityConfig, FormField, TopicConfig};
use crate::models::message::{Embed, OutgoingMessage};
use crate::models::ticket::{channel_name, Priority, Ticket};
use crate::platform::NewChannel;
use crate::{AppError, Result};

/// Longest answer shown on the ticket card.
const MAX_ANSWER_LEN: usize = 1024;

impl TicketEngine {
    /// Open a ticket: allocate a number, create its channel, post the card.
    ///
    /// The record is persisted right after the channel exists, before the
    /// card and team ping are posted. Creations by the same user run one at
    /// a time so the community's open-ticket cap cannot be overrun.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown community, `Validation` for an unknown
    /// topic or a missing required answer, `InvalidState` when the user
    /// already has the maximum number of open tickets, `Platform` when the
    /// channel cannot be created, `Persistence` when the counter or record
    /// cannot be written (the new channel is then removed again).
    #[instrument(skip_all, fields(community = %request.community_id, actor = %request.actor_id, topic = %request.topic))]
    pub async fn create_ticket(&self, request: &CreateTicketRequest) -> Result<ActionReply> {
        let creators = &self.inner.creators;
        let guard = creators
            .acquire(&request.community_id, &request.actor_id)
            .await;
        let result = self.create_ticket_serialized(request).await;
        drop(guard);
        creators.release(&request.community_id, &request.actor_id);
        result
    }

    async fn create_ticket_serialized(&self, request: &CreateTicketRequest) -> Result<ActionReply> {
        let config = self.inner.config.current();
        let community = config.community(&request.community_id)?;
        let topic = community
            .topic(&request.topic)
            .ok_or_else(|| AppError::Validation("Please choose one of the offered topics.".into()))?;

        let limit = community.max_tickets_per_user;
        let open = self
            .inner
            .store
            .load(&request.community_id)?
            .iter()
            .filter(|t| t.is_open() && t.creator_id == request.actor_id)
            .count();
        if open >= limit {
            return Err(AppError::InvalidState(format!(
                "You already have {limit} open tickets."
            )));
        }
        let fields = community.form_fields_for_topic(&topic.value);
        let answers = collect_answers(&fields, &request.form_data)?;

        let id = self.inner.store.next_id(&request.community_id)?;
        let mut ticket = Ticket::new(
            id,
            String::new(),
            request.actor_id.clone(),
            topic.value.clone(),
            answers,
        );

        let platform = &self.inner.platform;
        ticket.channel_id = platform
            .create_channel(
                &request.community_id,
                NewChannel {
                    name: channel_name(id, Priority::MIN),
                    parent_id: community.ticket_category_id.clone(),
                    permissions: access::resolve(&ticket, community.team_role_id.as_deref()),
                },
            )
            .await?;

        if let Err(err) = self.inner.store.append(&request.community_id, &ticket) {
            warn!(%err, ticket_id = id, "ticket record not saved, removing channel");
            if let Err(cleanup) = platform.delete_channel(&ticket.channel_id).await {
                warn!(err = %cleanup, "orphan channel cleanup failed");
            }
            return Err(err);
        }
        info!(ticket_id = id, channel = %ticket.channel_id, "ticket created");

        self.announce(
            &ticket.channel_id,
            greeting(community, topic, &fields, &ticket),
        )
        .await;
        if let Some(role) = &community.team_role_id {
            self.announce(
                &ticket.channel_id,
                OutgoingMessage::plain(format!("<@&{role}> A new ticket was opened.")),
            )
            .await;
        }

        self.record(
            AuditEventType::TicketCreated,
            &ActionRequest::new(&request.community_id, &ticket.channel_id, &request.actor_id),
            &ticket,
            Some(topic.value.clone()),
        );
        self.notify(
            &request.community_id,
            format!(
                "Ticket #{id} opened by <@{}> ({})",
                request.actor_id, topic.label
            ),
        );

        let message = format!("Ticket created: <#{}>", ticket.channel_id);
        Ok(ActionReply::with_ticket(message, ticket))
    }
}

/// Keep answers to known fields and require every mandatory one.
fn collect_answers(
    fields: &[FormField],
    submitted: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut answers = BTreeMap::new();
    for field in fields {
        let answer = submitted
            .get(&field.id)
            .map(String::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty());
        match answer {
            Some(value) => {
                answers.insert(field.id.clone(), value.to_owned());
            }
            None if field.required => {
                return Err(AppError::Validation(format!(
                    "Please answer \"{}\".",
                    field.label
                )));
            }
            None => {}
        }
    }
    Ok(answers)
}

/// Ticket card with the filled-in greeting, answers and controls.
fn greeting(
    community: &CommunityConfig,
    topic: &TopicConfig,
    fields: &[FormField],
    ticket: &Ticket,
) -> OutgoingMessage {
    let fill = |template: &str| {
        template
            .replace("{ticketNumber}", &ticket.id.to_string())
            .replace("{topicLabel}", &topic.label)
            .replace("{userMention}", &format!("<@{}>", ticket.creator_id))
            .replace("{userId}", &ticket.creator_id)
    };

    let answers = fields
        .iter()
        .filter_map(|field| {
            ticket.form_data.get(&field.id).map(|value| {
                let shown: String = value.chars().take(MAX_ANSWER_LEN).collect();
                (field.label.clone(), shown)
            })
        })
        .collect();

    OutgoingMessage {
        embed: Some(Embed {
            title: Some(fill(&community.greeting_title)),
            description: Some(fill(&community.greeting_description)),
            color: Some(community.greeting_color_value()),
            footer: Some(community.footer.clone()),
            fields: answers,
        }),
        controls: controls::ticket_rows(false),
        ..OutgoingMessage::default()
    }
}
