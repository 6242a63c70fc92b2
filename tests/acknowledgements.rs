//! Response acknowledgements, reports and broken-connection recovery.

mod common;

use bosh_engine::ConnectorEvent;
use bosh_testing::{Created, Harness, RequestBuilder, harness, reply_expect};
use common::stanza_ids;
use rstest::rstest;

fn acked_session(harness: &mut Harness) -> Created {
    harness.create_session_with(RequestBuilder::creation(1).ack(1))
}

fn acknowledged_rids(events: &[ConnectorEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            ConnectorEvent::ResponseAcknowledged { entry, .. } => Some(entry.rid),
            _ => None,
        })
        .collect()
}

#[rstest]
fn creation_response_carries_ack(mut harness: Harness) {
    let created = acked_session(&mut harness);
    assert_eq!(created.response.attr("ack"), Some("1"));
    assert_eq!(
        harness.engine().session(&created.sid).map(|s| s.unacked_rids()),
        Some(vec![1])
    );
}

#[rstest]
fn implicit_ack_retires_previous_responses(mut harness: Harness) {
    let created = acked_session(&mut harness);
    harness.send(RequestBuilder::session(&created.sid, 2).build());
    assert_eq!(acknowledged_rids(&harness.events()), vec![1]);
    assert_eq!(
        harness.engine().session(&created.sid).map(|s| s.unacked_rids()),
        Some(vec![])
    );
}

#[rstest]
fn response_to_older_rid_is_stamped_with_current_rid(mut harness: Harness) {
    let created = acked_session(&mut harness);
    let mut older = harness.send(RequestBuilder::session(&created.sid, 2).build());
    harness.send(RequestBuilder::session(&created.sid, 3).ack(1).build());

    let released = reply_expect!(older);
    assert_eq!(released.attr("ack"), Some("3"));
}

#[rstest]
fn lagging_ack_triggers_report(mut harness: Harness) {
    let created = acked_session(&mut harness);
    let _second = harness.send(RequestBuilder::session(&created.sid, 2).build());
    let _third = harness.send(RequestBuilder::session(&created.sid, 3).ack(1).build());
    harness.advance(2);

    let mut reply = harness.send(RequestBuilder::session(&created.sid, 4).ack(1).build());
    let report = reply_expect!(reply);
    assert_eq!(report.attr("report"), Some("2"));
    assert_eq!(report.attr("time"), Some("2000"));
}

#[rstest]
fn explicit_ack_emits_acknowledged_entries(mut harness: Harness) {
    let created = acked_session(&mut harness);
    let _held = harness.send(RequestBuilder::session(&created.sid, 2).build());
    harness.respond(&created.stream, "m1").expect("stream is live");
    harness.events();

    harness.send(RequestBuilder::session(&created.sid, 3).ack(2).build());
    let events = harness.events();
    let entry = events.iter().find_map(|event| match event {
        ConnectorEvent::ResponseAcknowledged { entry, .. } => Some(entry),
        _ => None,
    });
    let entry = entry.expect("rid 2 acknowledged");
    assert_eq!(entry.rid, 2);
    assert_eq!(stanza_ids(&entry.stanza), vec!["m1"]);
}

#[rstest]
fn repeated_request_gets_original_response(mut harness: Harness) {
    let created = acked_session(&mut harness);
    let _held = harness.send(RequestBuilder::session(&created.sid, 2).build());
    harness.respond(&created.stream, "m1").expect("stream is live");

    let mut retry = harness.send(RequestBuilder::session(&created.sid, 2).build());
    assert!(retry.result.is_ok());
    let resent = reply_expect!(retry);
    assert_eq!(stanza_ids(&resent), vec!["m1"]);
    assert_eq!(
        harness.engine().session(&created.sid).map(|s| s.held_slots()),
        Some(0)
    );
}

#[rstest]
fn repeated_unanswered_request_gets_empty_body(mut harness: Harness) {
    let created = acked_session(&mut harness);
    let mut original = harness.send(RequestBuilder::session(&created.sid, 2).build());

    let mut retry = harness.send(RequestBuilder::session(&created.sid, 2).build());
    assert!(reply_expect!(retry).is_empty());
    assert!(original.is_held());
}

#[rstest]
fn duplicate_without_ack_is_held_but_not_redelivered(mut harness: Harness) {
    let created = harness.create_session(1);
    harness.send(RequestBuilder::session(&created.sid, 2).message("m").build());
    harness.events();
    let mut retry = harness.send(RequestBuilder::session(&created.sid, 2).message("m").build());
    assert!(retry.is_held());
    assert!(harness.events().is_empty());
}

#[rstest]
fn session_without_ack_keeps_no_unacked_records(mut harness: Harness) {
    let created = harness.create_session(1);
    let mut replies = Vec::new();
    for rid in 2..=201_u64 {
        replies.push(harness.send(RequestBuilder::session(&created.sid, rid).build()));
        harness
            .respond(&created.stream, &rid.to_string())
            .expect("stream is live");
    }

    let session = harness.engine().session(&created.sid).expect("session alive");
    assert!(!session.ack_enabled());
    assert_eq!(session.rid(), 201);
    assert!(session.unacked_rids().is_empty());
    assert!(replies.iter_mut().all(|reply| !reply.is_held()));
}
