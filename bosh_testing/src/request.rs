//! Builders for client request bodies.

use bosh_engine::{
    Element,
    SessionId,
    StreamName,
    stanza::{self, XBOSH_XMLNS},
};
use bytes::Bytes;

/// Fluent builder for `<body>` requests.
///
/// ```rust
/// use bosh_testing::RequestBuilder;
///
/// let request = RequestBuilder::creation(1).hold(1).wait(30).build();
/// assert_eq!(request.attr("hold"), Some("1"));
/// ```
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    body: Element,
}

impl RequestBuilder {
    /// A session creation request for `example.com` with `rid`.
    #[must_use]
    pub fn creation(rid: u64) -> Self {
        Self {
            body: stanza::body()
                .with_attr("rid", rid)
                .with_attr("to", "example.com")
                .with_attr("wait", 60)
                .with_attr("hold", 1)
                .with_attr("xmlns:xmpp", XBOSH_XMLNS)
                .with_attr("xmpp:version", "1.0"),
        }
    }

    /// A request on an existing session.
    #[must_use]
    pub fn session(sid: &SessionId, rid: u64) -> Self {
        Self {
            body: stanza::body().with_attr("sid", sid).with_attr("rid", rid),
        }
    }

    /// Set an arbitrary attribute.
    #[must_use]
    pub fn attr(mut self, key: &str, value: impl ToString) -> Self {
        self.body.set_attr(key, value);
        self
    }

    /// Remove an attribute.
    #[must_use]
    pub fn without(mut self, key: &str) -> Self {
        self.body.remove_attr(key);
        self
    }

    /// Set `hold`.
    #[must_use]
    pub fn hold(self, hold: i64) -> Self { self.attr("hold", hold) }

    /// Set `wait`.
    #[must_use]
    pub fn wait(self, wait: i64) -> Self { self.attr("wait", wait) }

    /// Set `ack`.
    #[must_use]
    pub fn ack(self, ack: u64) -> Self { self.attr("ack", ack) }

    /// Address the request to `stream`.
    #[must_use]
    pub fn stream(self, stream: &StreamName) -> Self { self.attr("stream", stream) }

    /// Ask for a new stream to `to`.
    #[must_use]
    pub fn add_stream(self, to: &str) -> Self { self.attr("to", to) }

    /// Mark the request as a terminate request.
    #[must_use]
    pub fn terminate(self) -> Self { self.attr("type", "terminate") }

    /// Mark the request as a stream restart.
    #[must_use]
    pub fn restart(self) -> Self {
        self.attr("xmlns:xmpp", XBOSH_XMLNS)
            .attr("xmpp:restart", "true")
            .attr("to", "example.com")
    }

    /// Append a stanza.
    #[must_use]
    pub fn child(mut self, child: Element) -> Self {
        self.body.push_child(child);
        self
    }

    /// Append a `<message>` stanza with `id`.
    #[must_use]
    pub fn message(self, id: &str) -> Self {
        self.child(Element::new("message").with_attr("id", id))
    }

    /// Finish the request.
    #[must_use]
    pub fn build(self) -> Element { self.body }

    /// Finish and serialize the request.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes { Bytes::from(self.body.to_string()) }
}
