//! Requests reach the connector in RID order, exactly once.

mod common;

use bosh_testing::{RequestBuilder, reply_expect};
use common::{delivered, wide_harness};
use proptest::prelude::*;

#[test]
fn hole_defers_later_requests_until_filled() {
    let mut harness = wide_harness();
    let created = harness.create_session(1);

    harness.send(RequestBuilder::session(&created.sid, 3).message("three").build());
    assert!(delivered(&harness.events()).is_empty());

    harness.send(RequestBuilder::session(&created.sid, 2).message("two").build());
    let ids: Vec<_> = delivered(&harness.events())
        .into_iter()
        .map(|(_, id)| id)
        .collect();
    assert_eq!(ids, vec!["two", "three"]);
    assert_eq!(harness.engine().session(&created.sid).map(|s| s.rid()), Some(3));
}

#[test]
fn filling_a_hole_releases_surplus_slots() {
    let mut harness = wide_harness();
    let created = harness.create_session(1);
    let mut early = harness.send(RequestBuilder::session(&created.sid, 3).build());
    assert!(early.is_held());

    let mut late = harness.send(RequestBuilder::session(&created.sid, 2).build());
    assert!(reply_expect!(late).is_empty());
    assert!(early.is_held());
}

#[test]
fn duplicate_request_is_not_redelivered() {
    let mut harness = wide_harness();
    let created = harness.create_session(1);
    let request = RequestBuilder::session(&created.sid, 2).message("once").build();
    harness.send(request.clone());
    harness.send(request);
    assert_eq!(delivered(&harness.events()).len(), 1);
}

proptest! {
    #[test]
    fn any_arrival_order_is_delivered_in_rid_order(
        order in Just((2_u64..=9).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let mut harness = wide_harness();
        let created = harness.create_session(1);
        for rid in order {
            let id = rid.to_string();
            harness.send(RequestBuilder::session(&created.sid, rid).message(&id).build());
        }
        let ids: Vec<u64> = delivered(&harness.events())
            .into_iter()
            .filter_map(|(_, id)| id.parse().ok())
            .collect();
        prop_assert_eq!(ids, (2_u64..=9).collect::<Vec<_>>());
    }
}
