//! Shared utilities for integration tests.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use bosh_engine::{BoshConfig, ConnectorEvent, Element, StreamName};
use bosh_testing::Harness;

/// Harness tolerating wide RID gaps and many held slots.
pub fn wide_harness() -> Harness {
    let config = BoshConfig::builder()
        .window(16)
        .max_connections(16)
        .build()
        .expect("valid configuration");
    Harness::new(config)
}

/// `id` attributes of the stanzas in `element`, in document order.
pub fn stanza_ids(element: &Element) -> Vec<String> {
    element
        .child_elements()
        .filter_map(|child| child.attr("id").map(str::to_owned))
        .collect()
}

/// `id` attributes of every stanza delivered to the connector through
/// `Nodes` events, with the stream each was delivered to.
pub fn delivered(events: &[ConnectorEvent]) -> Vec<(StreamName, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            ConnectorEvent::Nodes { stanzas, stream } => Some(
                stanzas
                    .iter()
                    .filter_map(|s| s.attr("id").map(|id| (stream.name.clone(), id.to_owned())))
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        })
        .flatten()
        .collect()
}

/// Names of the streams reported as terminated.
pub fn terminated_streams(events: &[ConnectorEvent]) -> Vec<StreamName> {
    events
        .iter()
        .filter_map(|event| match event {
            ConnectorEvent::StreamTerminate(info) => Some(info.name.clone()),
            _ => None,
        })
        .collect()
}
