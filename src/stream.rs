//! Logical XMPP streams multiplexed over a session.

use std::{collections::BTreeMap, fmt};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::Condition,
    event::{ConnectorEvent, Turn},
    session::{Session, SessionId},
    stanza::{self, Route},
    xml::Element,
};

/// Identifier assigned to a stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamName(String);

impl StreamName {
    /// Generate a fresh random name.
    #[must_use]
    pub fn generate() -> Self { Self(Uuid::new_v4().to_string()) }

    /// Return the name as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for StreamName {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Snapshot of a stream handed to the connector.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
    /// Stream name.
    pub name: StreamName,
    /// Owning session.
    pub sid: SessionId,
    /// Domain the client wants to reach.
    pub to: String,
    /// Client JID, if supplied.
    pub from: Option<String>,
    /// Upstream endpoint parsed from `route`, if valid.
    pub route: Option<Route>,
    /// Attributes of the request that opened or last restarted the stream.
    pub attrs: BTreeMap<String, String>,
}

/// Sent by [`Stream::terminate`] so the registry can archive the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamTerminated {
    /// Stream that ended.
    pub name: StreamName,
    /// Condition reported to the client, if any.
    pub condition: Option<Condition>,
}

/// One XMPP stream.
#[derive(Debug)]
pub struct Stream {
    name: StreamName,
    sid: SessionId,
    to: String,
    from: Option<String>,
    route: Option<Route>,
    attrs: BTreeMap<String, String>,
    terminated: bool,
}

impl Stream {
    /// Open a stream on `session` from a creation or stream-add request.
    pub fn new(session: &mut Session, request: &Element) -> Self {
        let name = StreamName::generate();
        session.add_stream(name.clone());
        let route = request.attr("route").and_then(|raw| {
            let parsed = Route::parse(raw);
            if parsed.is_none() {
                warn!(sid = %session.sid(), route = raw, "ignoring malformed route");
            }
            parsed
        });
        debug!(sid = %session.sid(), stream = %name, "stream opened");
        Self {
            name,
            sid: session.sid().clone(),
            to: request.attr("to").unwrap_or_default().to_owned(),
            from: request.attr("from").map(str::to_owned),
            route,
            attrs: request.attrs().clone(),
            terminated: false,
        }
    }

    /// Stream name.
    #[must_use]
    pub fn name(&self) -> &StreamName { &self.name }

    /// Owning session.
    #[must_use]
    pub fn sid(&self) -> &SessionId { &self.sid }

    /// Domain the client wants to reach.
    #[must_use]
    pub fn to(&self) -> &str { &self.to }

    /// Client JID, if supplied.
    #[must_use]
    pub fn from(&self) -> Option<&str> { self.from.as_deref() }

    /// Parsed upstream route.
    #[must_use]
    pub fn route(&self) -> Option<&Route> { self.route.as_ref() }

    /// Whether a terminate response has been queued for this stream.
    #[must_use]
    pub fn is_terminated(&self) -> bool { self.terminated }

    /// Snapshot for the connector.
    #[must_use]
    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            name: self.name.clone(),
            sid: self.sid.clone(),
            to: self.to.clone(),
            from: self.from.clone(),
            route: self.route.clone(),
            attrs: self.attrs.clone(),
        }
    }

    /// Queue a terminate body tagged with this stream.
    pub(crate) fn send_terminate_response(
        &mut self,
        session: &mut Session,
        condition: Option<&Condition>,
        turn: &mut Turn<'_>,
    ) {
        let response = stanza::terminate(condition).with_attr("stream", &self.name);
        session.enqueue(response, self.name.clone(), turn);
        self.terminated = true;
    }

    /// Queue the response announcing an additional stream.
    pub(crate) fn send_add_response(&self, session: &mut Session, turn: &mut Turn<'_>) {
        let mut response = stanza::body()
            .with_attr("stream", &self.name)
            .with_attr("from", &self.to);
        if let Some(from) = &self.from {
            response.set_attr("to", from);
        }
        session.enqueue(response, self.name.clone(), turn);
    }

    /// Capture the attributes of a restart request and notify the connector.
    pub(crate) fn restart(&mut self, request: &Element, turn: &mut Turn<'_>) {
        self.attrs = request.attrs().clone();
        if let Some(to) = request.attr("to") {
            to.clone_into(&mut self.to);
        }
        debug!(sid = %self.sid, stream = %self.name, "stream restarted");
        turn.emit(ConnectorEvent::StreamRestart(self.info()));
    }

    /// Detach the stream from its session.
    ///
    /// The returned value must be handed to the stream registry.
    pub(crate) fn terminate(
        &mut self,
        session: &mut Session,
        condition: Option<Condition>,
    ) -> StreamTerminated {
        if !session.remove_stream(&self.name) {
            warn!(sid = %self.sid, stream = %self.name, "stream missing from session");
        }
        self.terminated = true;
        StreamTerminated {
            name: self.name.clone(),
            condition,
        }
    }
}
