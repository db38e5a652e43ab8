//! Integration tests for opening tickets.

use std::collections::BTreeMap;

use ticket_warden::engine::controls::ticket_rows;
use ticket_warden::engine::CreateTicketRequest;
use ticket_warden::models::permission::{Access, Principal};
use ticket_warden::models::ticket::{channel_name, Priority};
use ticket_warden::AppError;

use super::test_helpers::{billing_request, Harness, AGENT, COMMUNITY, CREATOR, FRIEND, TEAM_ROLE};

fn request(topic: &str, answers: &[(&str, &str)]) -> CreateTicketRequest {
    CreateTicketRequest {
        community_id: COMMUNITY.into(),
        actor_id: CREATOR.into(),
        topic: topic.into(),
        form_data: answers
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<BTreeMap<_, _>>(),
    }
}

#[tokio::test]
async fn creates_channel_record_and_card() {
    let h = Harness::new();
    let reply = h
        .engine
        .create_ticket(&billing_request(CREATOR))
        .await
        .expect("create");
    let ticket = reply.ticket.expect("ticket");
    assert_eq!(ticket.id, 1);
    assert_eq!(reply.message, format!("Ticket created: <#{}>", ticket.channel_id));
    assert_eq!(h.stored(&ticket).channel_id, ticket.channel_id);

    let channel = h.platform.channel(&ticket.channel_id).expect("channel");
    assert_eq!(channel.name, channel_name(1, Priority::MIN));
    assert_eq!(channel.parent_id.as_deref(), Some("category-1"));
    assert_eq!(
        channel.permissions.get(&Principal::Everyone),
        Some(&Access::DENIED)
    );
    assert_eq!(
        channel.permissions.get(&Principal::Member(CREATOR.into())),
        Some(&Access::VIEW_SEND)
    );
    assert_eq!(
        channel.permissions.get(&Principal::Role(TEAM_ROLE.into())),
        Some(&Access::VIEW_SEND)
    );

    let card = &channel.messages[0];
    let embed = card.embed.as_ref().expect("greeting embed");
    assert_eq!(embed.title.as_deref(), Some("\u{1f3ab} Ticket #1"));
    assert!(embed
        .description
        .as_deref()
        .is_some_and(|d| d.contains(&format!("<@{CREATOR}>")) && d.contains("Billing")));
    assert_eq!(embed.fields, vec![("Order number".to_owned(), "A-1".to_owned())]);
    assert_eq!(card.controls, ticket_rows(false));

    assert_eq!(
        channel.messages[1].content,
        format!("<@&{TEAM_ROLE}> A new ticket was opened.")
    );

    h.engine.drain_background().await;
    assert_eq!(
        h.log_lines(),
        vec![format!("Ticket #1 opened by <@{CREATOR}> (Billing)")]
    );
    assert_eq!(h.audit_events(), vec!["ticket_created"]);
}

#[tokio::test]
async fn numbers_increase_per_community() {
    let h = Harness::new();
    let first = h.open_ticket().await;
    let second = h.open_ticket().await;
    assert_eq!((first.id, second.id), (1, 2));
    assert_ne!(first.channel_id, second.channel_id);
    assert_eq!(h.store.load(COMMUNITY).expect("load").len(), 2);
}

#[tokio::test]
async fn unknown_topic_is_rejected() {
    let h = Harness::new();
    let err = h
        .engine
        .create_ticket(&request("refund", &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(err.user_message(), "Please choose one of the offered topics.");
    assert!(h.store.load(COMMUNITY).expect("load").is_empty());
}

#[tokio::test]
async fn missing_or_blank_required_answer_is_rejected() {
    let h = Harness::new();
    for answers in [&[][..], &[("order", "   ")][..]] {
        let err = h
            .engine
            .create_ticket(&request("billing", answers))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Please answer \"Order number\".");
    }
    assert_eq!(h.platform.channels_in(COMMUNITY).len(), 2);
}

#[tokio::test]
async fn answers_are_trimmed_and_unknown_keys_dropped() {
    let h = Harness::new();
    let ticket = h
        .engine
        .create_ticket(&request(
            "billing",
            &[("order", "  B-7 "), ("f1", "it broke"), ("injected", "x")],
        ))
        .await
        .expect("create")
        .ticket
        .expect("ticket");

    let expected = BTreeMap::from([
        ("f1".to_owned(), "it broke".to_owned()),
        ("order".to_owned(), "B-7".to_owned()),
    ]);
    assert_eq!(ticket.form_data, expected);
    assert_eq!(h.stored(&ticket).form_data, expected);
}

#[tokio::test]
async fn topic_specific_fields_do_not_apply_elsewhere() {
    let h = Harness::new();
    let ticket = h
        .engine
        .create_ticket(&request("bug", &[("f0", "crash on start")]))
        .await
        .expect("bug tickets need no order number")
        .ticket
        .expect("ticket");
    assert_eq!(
        ticket.form_data.get("f0").map(String::as_str),
        Some("crash on start")
    );
}

#[tokio::test]
async fn unknown_community_is_not_found() {
    let h = Harness::new();
    let mut req = billing_request(CREATOR);
    req.community_id = "g9".into();
    assert!(matches!(
        h.engine.create_ticket(&req).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn failed_save_removes_new_channel() {
    let h = Harness::new();
    std::fs::create_dir_all(h.config.data_dir.join("g1_tickets.json")).expect("block file");

    let err = h
        .engine
        .create_ticket(&billing_request(CREATOR))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));

    assert_eq!(h.platform.channels_in(COMMUNITY).len(), 2);
    assert_eq!(h.platform.deleted_channels().len(), 1);
}

#[tokio::test]
async fn open_ticket_cap_applies_per_user() {
    let h = Harness::new();
    let mut tickets = Vec::new();
    for _ in 0..3 {
        tickets.push(h.open_ticket().await);
    }

    let err = h
        .engine
        .create_ticket(&billing_request(CREATOR))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(ref msg) if msg == "You already have 3 open tickets."));
    assert_eq!(h.platform.channels_in(COMMUNITY).len(), 5);
    assert_eq!(h.store.load(COMMUNITY).expect("load").len(), 3);

    // Someone else is unaffected.
    h.engine
        .create_ticket(&billing_request(FRIEND))
        .await
        .expect("other user below the cap");

    h.engine
        .close(&h.request(&tickets[0], AGENT))
        .await
        .expect("close");
    let reopened = h
        .engine
        .create_ticket(&billing_request(CREATOR))
        .await
        .expect("closed tickets free a slot");
    assert_eq!(reopened.ticket.expect("ticket").id, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_cannot_exceed_the_cap() {
    let h = Harness::new();
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.create_ticket(&billing_request(CREATOR)).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.expect("join") {
            Ok(_) => created += 1,
            Err(err) => assert!(matches!(err, AppError::InvalidState(_)), "{err}"),
        }
    }
    assert_eq!(created, 3);
    let open = h.store.load(COMMUNITY).expect("load");
    assert_eq!(open.iter().filter(|t| t.is_open()).count(), 3);
}
