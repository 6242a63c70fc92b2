#![cfg(any(test, feature = "test-helpers"))]
//! Test-only response sinks and decoding helpers.

use tokio::sync::oneshot;

use crate::{
    error::XmlError,
    slot::{OutgoingBody, ResponseSink},
    xml::{self, Element},
};

/// A sink whose write lands in the returned receiver.
#[must_use]
pub fn sink_pair() -> (Box<dyn ResponseSink>, oneshot::Receiver<OutgoingBody>) {
    let (tx, rx) = oneshot::channel();
    (Box::new(tx), rx)
}

/// A sink whose client has already disconnected.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClosedSink;

impl ResponseSink for ClosedSink {
    fn send(self: Box<Self>, body: OutgoingBody) -> Result<(), OutgoingBody> { Err(body) }
}

/// Parse a written response back into its `<body>` element.
///
/// # Errors
///
/// Returns [`XmlError`] if the payload is not a single `<body>` element.
pub fn decode(body: &OutgoingBody) -> Result<Element, XmlError> { xml::parse_body(&body.payload) }

/// Take the response written to `rx`, if any.
///
/// Returns `None` while the sink is still held or if it was dropped.
pub fn try_take(rx: &mut oneshot::Receiver<OutgoingBody>) -> Option<Element> {
    rx.try_recv().ok().and_then(|body| decode(&body).ok())
}
