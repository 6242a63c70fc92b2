//! Steps for BOSH session scenarios.
use cucumber::{given, then, when};

use crate::world::{BoshWorld, TestResult};

#[given(expr = "a session created with rid {int}")]
fn given_session(world: &mut BoshWorld, rid: u64) { world.create(rid, None); }

#[given(expr = "a session created with rid {int} and wait {int}")]
fn given_session_with_wait(world: &mut BoshWorld, rid: u64, wait: i64) {
    world.create(rid, Some(wait));
}

#[when(expr = "the client sends an empty request with rid {int}")]
fn when_empty(world: &mut BoshWorld, rid: u64) -> TestResult { world.send(rid, &[], false) }

#[when(expr = "the client sends stanza {word} with rid {int}")]
fn when_stanza(world: &mut BoshWorld, id: String, rid: u64) -> TestResult {
    world.send(rid, &[id.as_str()], false)
}

#[when(expr = "the client terminates the session with rid {int}")]
fn when_terminate(world: &mut BoshWorld, rid: u64) -> TestResult { world.send(rid, &[], true) }

#[when(expr = "the connector responds with stanza {word}")]
fn when_respond(world: &mut BoshWorld, id: String) -> TestResult { world.respond(&id) }

#[when(expr = "{int} seconds pass")]
fn when_time_passes(world: &mut BoshWorld, secs: u64) { world.advance(secs); }

#[then(expr = "the request with rid {int} is held")]
fn then_held(world: &mut BoshWorld, rid: u64) -> TestResult {
    assert!(world.is_held(rid)?, "request {rid} was answered");
    Ok(())
}

#[then(expr = "the response to rid {int} carries stanza {word}")]
fn then_carries(world: &mut BoshWorld, rid: u64, id: String) -> TestResult {
    let response = world.response(rid)?;
    let ids: Vec<_> = response
        .child_elements()
        .filter_map(|child| child.attr("id"))
        .collect();
    assert_eq!(ids, vec![id.as_str()]);
    Ok(())
}

#[then(expr = "the response to rid {int} is empty")]
fn then_empty(world: &mut BoshWorld, rid: u64) -> TestResult {
    let response = world.response(rid)?;
    assert!(response.is_empty());
    assert!(!response.has_attr("type"));
    Ok(())
}

#[then(expr = "the response to rid {int} is a terminate")]
fn then_terminate(world: &mut BoshWorld, rid: u64) -> TestResult {
    let response = world.response(rid)?;
    assert_eq!(response.attr("type"), Some("terminate"));
    Ok(())
}

#[then(expr = "the connector receives stanzas {word} in order")]
fn then_delivered(world: &mut BoshWorld, ids: String) {
    let expected: Vec<_> = ids.split(',').map(str::to_owned).collect();
    assert_eq!(world.delivered(), expected);
}

#[then("the session is gone")]
fn then_gone(world: &mut BoshWorld) -> TestResult {
    assert!(!world.session_live()?);
    Ok(())
}

#[then("the session is live")]
fn then_live(world: &mut BoshWorld) -> TestResult {
    assert!(world.session_live()?);
    Ok(())
}
