//! Integration tests for the ticket lifecycle: claim, unclaim, priority,
//! close requests and close with archiving.

use ticket_warden::engine::controls::ticket_rows;
use ticket_warden::engine::ActionRequest;
use ticket_warden::models::permission::{Access, Principal};
use ticket_warden::models::ticket::{channel_name, Priority, TicketStatus};
use ticket_warden::AppError;

use super::test_helpers::{
    eventually, Harness, AGENT, AGENT_2, COMMUNITY, CREATOR, OUTSIDER, TEAM_ROLE,
};

fn member(id: &str) -> Principal {
    Principal::Member(id.into())
}

#[tokio::test]
async fn full_lifecycle_from_create_to_archive() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;
    let channel = ticket.channel_id.clone();

    let claimed = h.engine.claim(&h.request(&ticket, AGENT)).await.expect("claim");
    assert_eq!(claimed.message, "Ticket claimed.");
    assert_eq!(h.stored(&ticket).claimer.as_deref(), Some(AGENT));
    let perms = h.platform.channel(&channel).expect("channel").permissions;
    assert_eq!(perms.get(&member(AGENT)), Some(&Access::VIEW_SEND));

    let card = &h.messages(&channel)[0];
    assert_eq!(card.controls, ticket_rows(true));

    h.engine.priority_up(&h.request(&ticket, AGENT)).await.expect("up");
    let reply = h.engine.priority_up(&h.request(&ticket, AGENT)).await.expect("up");
    assert_eq!(reply.message, "Priority: Red");
    assert_eq!(h.stored(&ticket).priority, Priority::MAX);

    let red = channel_name(ticket.id, Priority::MAX);
    eventually("channel renamed", || {
        h.platform.channel(&channel).is_some_and(|c| c.name == red)
    })
    .await;
    let card = &h.messages(&channel)[0];
    assert_eq!(
        card.embed.as_ref().and_then(|e| e.color),
        Some(Priority::MAX.color())
    );

    let reply = h.engine.close(&h.request(&ticket, AGENT)).await.expect("close");
    assert_eq!(reply.ticket.map(|t| t.status), Some(TicketStatus::Closed));
    assert_eq!(h.stored(&ticket).status, TicketStatus::Closed);

    h.engine.drain_background().await;

    assert!(h.platform.channel(&channel).is_none());
    assert_eq!(h.platform.deleted_channels(), vec![channel.clone()]);

    let archived = h.dir.path().join("transcripts").join(COMMUNITY);
    let text = std::fs::read_to_string(archived.join("transcript_1.txt")).expect("txt");
    assert!(text.starts_with("# Transcript Ticket 1"));
    assert!(text.contains("has claimed this ticket"));
    assert!(archived.join("transcript_1.html").is_file());

    let posted = h.messages(&h.transcript_channel);
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].attachments.len(), 2);
    let link = posted[0].controls.iter().flatten().find_map(|c| c.url.clone());
    assert_eq!(
        link.as_deref(),
        Some("https://tickets.example.com/transcript/1")
    );

    let log = h.log_lines();
    assert!(log.iter().any(|l| l.starts_with("Ticket #1 opened by")));
    assert!(log.iter().any(|l| l.starts_with("Ticket #1 closed by")));

    assert_eq!(
        h.audit_events(),
        vec![
            "ticket_created",
            "ticket_claimed",
            "priority_changed",
            "priority_changed",
            "ticket_closed"
        ]
    );
    h.engine.shutdown().await;
}

#[tokio::test]
async fn close_revokes_creator_access_before_deletion() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;
    let channel = ticket.channel_id.clone();

    h.engine.close(&h.request(&ticket, AGENT)).await.expect("close");

    let perms = h.platform.channel(&channel).expect("still present").permissions;
    assert!(!perms.contains_key(&member(CREATOR)));
    assert_eq!(
        perms.get(&Principal::Role(TEAM_ROLE.into())),
        Some(&Access::VIEW_SEND)
    );
    h.engine.drain_background().await;
}

#[tokio::test]
async fn closed_ticket_rejects_every_action() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;
    h.engine.close(&h.request(&ticket, AGENT)).await.expect("close");
    h.engine.drain_background().await;
    let before = h.stored(&ticket);

    let request = h.request(&ticket, AGENT);
    for result in [
        h.engine.claim(&request).await,
        h.engine.unclaim(&request).await,
        h.engine.priority_up(&request).await,
        h.engine.request_close(&request).await,
        h.engine.close(&request).await,
        h.engine.add_user(&request, OUTSIDER).await,
    ] {
        let err = result.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)), "got {err}");
        assert_eq!(err.user_message(), "This ticket is already closed.");
    }
    assert_eq!(h.stored(&ticket), before);
}

#[tokio::test]
async fn unknown_channel_and_community_are_not_found() {
    let h = Harness::new();
    let err = h
        .engine
        .claim(&ActionRequest::new(COMMUNITY, "no-such-channel", AGENT))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = h
        .engine
        .claim(&ActionRequest::new("g9", "no-such-channel", AGENT))
        .await
        .unwrap_err();
    assert_eq!(
        err.user_message(),
        "The ticket system is not set up in this community."
    );
}

#[tokio::test]
async fn non_team_actors_are_rejected_without_side_effects() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;
    let before = h.stored(&ticket);
    let messages_before = h.messages(&ticket.channel_id).len();

    for actor in [CREATOR, OUTSIDER] {
        let request = h.request(&ticket, actor);
        assert!(matches!(
            h.engine.claim(&request).await,
            Err(AppError::PermissionDenied(_))
        ));
        assert!(matches!(
            h.engine.close(&request).await,
            Err(AppError::PermissionDenied(_))
        ));
        assert!(matches!(
            h.engine.priority_up(&request).await,
            Err(AppError::PermissionDenied(_))
        ));
    }

    assert_eq!(h.stored(&ticket), before);
    assert!(h.platform.permission_calls().is_empty());
    assert_eq!(h.messages(&ticket.channel_id).len(), messages_before);
}

#[tokio::test]
async fn second_claim_is_rejected() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;
    h.engine.claim(&h.request(&ticket, AGENT)).await.expect("claim");

    let err = h
        .engine
        .claim(&h.request(&ticket, AGENT_2))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(ref msg) if msg.contains(AGENT)));
    assert_eq!(h.stored(&ticket).claimer.as_deref(), Some(AGENT));
}

#[tokio::test]
async fn unclaim_by_claimer_restores_open_access() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;
    h.engine.claim(&h.request(&ticket, AGENT)).await.expect("claim");

    let reply = h.engine.unclaim(&h.request(&ticket, AGENT)).await.expect("unclaim");
    assert_eq!(reply.message, "Ticket released.");
    assert!(h.stored(&ticket).claimer.is_none());

    let perms = h.platform.channel(&ticket.channel_id).expect("channel").permissions;
    assert!(!perms.contains_key(&member(AGENT)));
    assert_eq!(h.messages(&ticket.channel_id)[0].controls, ticket_rows(false));
}

#[tokio::test]
async fn unclaim_rules() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;

    let err = h
        .engine
        .unclaim(&h.request(&ticket, AGENT))
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "This ticket is not claimed.");

    h.engine.claim(&h.request(&ticket, AGENT)).await.expect("claim");
    assert!(matches!(
        h.engine.unclaim(&h.request(&ticket, CREATOR)).await,
        Err(AppError::PermissionDenied(_))
    ));
    h.engine
        .unclaim(&h.request(&ticket, AGENT_2))
        .await
        .expect("team may release another agent's claim");
}

#[tokio::test]
async fn priority_at_bound_changes_nothing() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;

    let reply = h
        .engine
        .priority_down(&h.request(&ticket, AGENT))
        .await
        .expect("down at bound");
    assert_eq!(reply.message, "Priority: Green");
    assert_eq!(h.stored(&ticket).priority, Priority::MIN);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(h.platform.rename_calls().is_empty());
    assert!(h.audit_events().iter().all(|e| e != "priority_changed"));
}

#[tokio::test]
async fn rapid_priority_changes_rename_once() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;
    let request = h.request(&ticket, AGENT);

    h.engine.priority_up(&request).await.expect("up");
    h.engine.priority_up(&request).await.expect("up");
    h.engine.priority_down(&request).await.expect("down");

    let orange = channel_name(ticket.id, Priority::MIN.raised());
    eventually("rename", || {
        h.platform
            .channel(&ticket.channel_id)
            .is_some_and(|c| c.name == orange)
    })
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let calls = h.platform.rename_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, orange);
}

#[tokio::test]
async fn request_close_posts_team_prompt() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;

    let reply = h
        .engine
        .request_close(&h.request(&ticket, CREATOR))
        .await
        .expect("request close");
    assert_eq!(reply.message, "Close request sent.");
    assert!(h.stored(&ticket).is_open());

    let prompt = h.messages(&ticket.channel_id).pop().expect("prompt");
    assert!(prompt.content.contains(&format!("<@{CREATOR}>")));
    let ids: Vec<_> = prompt.controls.iter().flatten().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["approve_close_request", "deny_close_request"]);

    assert!(matches!(
        h.engine.request_close(&h.request(&ticket, OUTSIDER)).await,
        Err(AppError::PermissionDenied(_))
    ));
}

#[tokio::test]
async fn press_routes_controls() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;
    let request = h.request(&ticket, AGENT);

    let reply = h.engine.press("claim", &request).await.expect("claim");
    assert_eq!(reply.message, "Ticket claimed.");

    let reply = h.engine.press("add_user", &request).await.expect("prompt");
    assert!(reply.ticket.is_none());

    assert!(matches!(
        h.engine.press("explode", &request).await,
        Err(AppError::Validation(_))
    ));

    let reply = h
        .engine
        .press("deny_close_request", &request)
        .await
        .expect("reason prompt");
    assert!(reply.ticket.is_none());

    h.engine.press("close", &request).await.expect("close");
    assert_eq!(h.stored(&ticket).status, TicketStatus::Closed);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn community_without_team_role_has_no_team() {
    let h = Harness::new();
    let reply = h
        .engine
        .create_ticket(&ticket_warden::engine::CreateTicketRequest {
            community_id: super::test_helpers::BARE_COMMUNITY.into(),
            actor_id: CREATOR.into(),
            topic: "general".into(),
            form_data: std::collections::BTreeMap::new(),
        })
        .await
        .expect("create");
    let ticket = reply.ticket.expect("ticket");

    let request = ActionRequest::new(super::test_helpers::BARE_COMMUNITY, &ticket.channel_id, AGENT);
    assert!(matches!(
        h.engine.claim(&request).await,
        Err(AppError::PermissionDenied(_))
    ));
    let perms = h.platform.channel(&ticket.channel_id).expect("channel").permissions;
    assert_eq!(perms.len(), 2);
}

#[tokio::test]
async fn close_request_pings_the_other_side() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;

    // Unclaimed: the creator's request goes to the team.
    h.engine
        .request_close(&h.request(&ticket, CREATOR))
        .await
        .expect("creator request");
    let prompt = h.messages(&ticket.channel_id).pop().expect("prompt");
    assert!(prompt.content.contains(&format!("<@&{TEAM_ROLE}>")));

    // Claimed: it goes to the claimer.
    h.engine.claim(&h.request(&ticket, AGENT)).await.expect("claim");
    h.engine
        .request_close(&h.request(&ticket, CREATOR))
        .await
        .expect("creator request");
    let prompt = h.messages(&ticket.channel_id).pop().expect("prompt");
    assert!(prompt.content.contains(&format!("<@{AGENT}>")));

    // The team asks the creator.
    h.engine
        .request_close(&h.request(&ticket, AGENT_2))
        .await
        .expect("team request");
    let prompt = h.messages(&ticket.channel_id).pop().expect("prompt");
    assert!(prompt.content.starts_with(&format!("\u{2753} Close requested by <@{AGENT_2}>")));
    assert!(prompt.content.ends_with(&format!("<@{CREATOR}>")));
}

#[tokio::test]
async fn approving_a_close_request_closes_the_ticket() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;
    h.engine
        .request_close(&h.request(&ticket, AGENT))
        .await
        .expect("request close");

    let reply = h
        .engine
        .press("approve_close_request", &h.request(&ticket, CREATOR))
        .await
        .expect("approve");
    assert_eq!(reply.message, "Ticket is being closed\u{2026}");
    assert_eq!(h.stored(&ticket).status, TicketStatus::Closed);

    h.engine.drain_background().await;

    // The answered prompt is part of the archived history.
    let archived = h.dir.path().join("transcripts").join(COMMUNITY);
    let text = std::fs::read_to_string(archived.join("transcript_1.txt")).expect("txt");
    assert!(text.contains(&format!("\u{2705} Close approved by <@{CREATOR}>")));
    assert!(!text.contains("Close requested by"));

    let events = h.audit_events();
    let approved = events.iter().position(|e| e == "close_approved").expect("approved");
    let closed = events.iter().position(|e| e == "ticket_closed").expect("closed");
    assert!(approved < closed);
}

#[tokio::test]
async fn denying_a_close_request_keeps_the_ticket_open() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;
    h.engine
        .request_close(&h.request(&ticket, CREATOR))
        .await
        .expect("request close");

    let reply = h
        .engine
        .deny_close_request(&h.request(&ticket, AGENT), Some("  still waiting on logs  "))
        .await
        .expect("deny");
    assert_eq!(reply.message, "Close request denied.");
    assert!(h.stored(&ticket).is_open());

    let prompt = h.messages(&ticket.channel_id).pop().expect("prompt");
    assert_eq!(
        prompt.content,
        format!("\u{274c} Close denied by <@{AGENT}>\nReason: still waiting on logs")
    );
    assert!(prompt.controls.is_empty());
    assert!(h.audit_events().contains(&"close_denied".to_owned()));
    let audit_dir = h.config.audit_log_dir.clone().expect("audit dir");
    let denied = std::fs::read_dir(audit_dir)
        .expect("audit dir")
        .filter_map(Result::ok)
        .flat_map(|entry| {
            std::fs::read_to_string(entry.path())
                .expect("audit file")
                .lines()
                .map(|line| serde_json::from_str::<serde_json::Value>(line).expect("json"))
                .collect::<Vec<_>>()
        })
        .find(|value| value["event_type"] == "close_denied")
        .expect("close_denied entry");
    assert_eq!(denied["detail"], "still waiting on logs");
    h.engine.drain_background().await;
    assert!(h
        .log_lines()
        .contains(&format!("Close of ticket #1 denied by <@{AGENT}>")));

    // The prompt is answered; nothing is pending any more.
    assert!(matches!(
        h.engine.approve_close_request(&h.request(&ticket, AGENT)).await,
        Err(AppError::InvalidState(_))
    ));
}

#[tokio::test]
async fn blank_deny_reason_is_replaced() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;
    h.engine
        .request_close(&h.request(&ticket, AGENT))
        .await
        .expect("request close");

    h.engine
        .deny_close_request(&h.request(&ticket, CREATOR), Some("   "))
        .await
        .expect("deny");
    let prompt = h.messages(&ticket.channel_id).pop().expect("prompt");
    assert!(prompt.content.ends_with("Reason: No reason given"));
}

#[tokio::test]
async fn answering_requires_a_pending_request_and_a_participant() {
    let h = Harness::new();
    let ticket = h.open_ticket().await;

    assert!(matches!(
        h.engine.approve_close_request(&h.request(&ticket, AGENT)).await,
        Err(AppError::InvalidState(_))
    ));
    assert!(matches!(
        h.engine.deny_close_request(&h.request(&ticket, CREATOR), None).await,
        Err(AppError::InvalidState(_))
    ));

    h.engine
        .request_close(&h.request(&ticket, CREATOR))
        .await
        .expect("request close");
    assert!(matches!(
        h.engine.approve_close_request(&h.request(&ticket, OUTSIDER)).await,
        Err(AppError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.engine.deny_close_request(&h.request(&ticket, OUTSIDER), None).await,
        Err(AppError::PermissionDenied(_))
    ));
    assert!(h.stored(&ticket).is_open());
}
