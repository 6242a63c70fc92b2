//! BOSH sessions.
//!
//! A [`Session`] owns everything tied to one `sid`: the negotiated
//! parameters, the response slots held open by the client, the queue of
//! responses waiting for a slot, the unacknowledged responses kept for
//! retransmission and the out-of-order buffer used to release requests in
//! RID order. The behaviour is split across submodules:
//!
//! - `admission` validates requests and releases them in RID order.
//! - `slots` holds and releases response slots.
//! - `queue` merges and flushes pending responses.
//! - `ack` retires acknowledged responses and recovers broken connections.
//! - `lifecycle` covers inactivity and termination.

mod ack;
mod admission;
mod lifecycle;
mod queue;
mod slots;

use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    time::Duration,
};

pub use ack::Recovery;
pub use admission::{MAX_BODY_ATTRIBUTES, MAX_RID};
pub use lifecycle::SessionTerminated;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    config::BoshConfig,
    error::BoshError,
    slot::ResponseSlot,
    stanza::{self, BOSH_VERSION, XBOSH_XMLNS},
    stream::{Stream, StreamName},
    timer::TimerKey,
    xml::Element,
};

/// `Content-Type` used when the client does not ask for another one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Identifier assigned to a session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self { Self(Uuid::new_v4().to_string()) }

    /// Return the identifier as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self { Self(value) }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// A response that was written but not yet acknowledged by the client.
#[derive(Clone, Debug, PartialEq)]
pub struct UnackedEntry {
    /// RID of the request whose slot carried the response.
    pub rid: u64,
    /// The response body as sent.
    pub stanza: Element,
    /// When the response was written.
    pub sent_at: Instant,
}

/// A response waiting for a free slot.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PendingEntry {
    pub(crate) stanza: Element,
    pub(crate) stream: StreamName,
}

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting requests.
    Active,
    /// Terminated; kept only until the registry drops it.
    Terminated,
}

/// State of one BOSH session.
#[derive(Debug)]
pub struct Session {
    sid: SessionId,
    rid: u64,
    wait: u64,
    hold: usize,
    window: u64,
    inactivity: u64,
    max_connections: usize,
    keepalive: Duration,
    content: String,
    ack: bool,
    route: Option<String>,
    user_agent: Option<String>,
    slots: Vec<ResponseSlot>,
    pending: VecDeque<PendingEntry>,
    unacked: BTreeMap<u64, UnackedEntry>,
    out_of_order: BTreeMap<u64, Element>,
    max_rid_sent: u64,
    streams: Vec<StreamName>,
    inactivity_timer: Option<TimerKey>,
    flush_scheduled: bool,
    next_slot: u64,
    state: SessionState,
}

impl Session {
    /// Negotiate a new session from a creation request.
    ///
    /// # Errors
    ///
    /// Returns [`BoshError::InvalidCreation`] if the request lacks a numeric
    /// `rid` or the `rid` exceeds [`MAX_RID`].
    pub fn new(request: &Element, config: &BoshConfig) -> Result<Self, BoshError> {
        let rid = request
            .attr_u64("rid")
            .ok_or(BoshError::InvalidCreation("missing or malformed rid"))?;
        if rid > admission::MAX_RID {
            return Err(BoshError::InvalidCreation("rid out of range"));
        }
        let inactivity = config.negotiate_inactivity(request.attr_u64("inactivity"));
        let wait = BoshConfig::negotiate_wait(request.attr_i64("wait"), inactivity);
        let hold = config.negotiate_hold(request.attr_i64("hold"));
        let ack = request.attr("ack") == Some("1");
        Ok(Self {
            sid: SessionId::generate(),
            rid,
            wait,
            hold,
            window: config.window,
            inactivity,
            max_connections: config.max_connections,
            keepalive: config.keepalive(),
            content: request
                .attr("content")
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_owned(),
            ack,
            route: request.attr("route").map(str::to_owned),
            user_agent: request.attr("ua").map(str::to_owned),
            slots: Vec::new(),
            pending: VecDeque::new(),
            unacked: BTreeMap::new(),
            out_of_order: BTreeMap::new(),
            max_rid_sent: rid.saturating_sub(1),
            streams: Vec::new(),
            inactivity_timer: None,
            flush_scheduled: false,
            next_slot: 0,
            state: SessionState::Active,
        })
    }

    /// Session identifier.
    #[must_use]
    pub fn sid(&self) -> &SessionId { &self.sid }

    /// Highest RID released in order.
    #[must_use]
    pub fn rid(&self) -> u64 { self.rid }

    /// Negotiated wait in seconds.
    #[must_use]
    pub fn wait(&self) -> u64 { self.wait }

    /// Negotiated hold.
    #[must_use]
    pub fn hold(&self) -> usize { self.hold }

    /// RID tolerance window.
    #[must_use]
    pub fn window(&self) -> u64 { self.window }

    /// Negotiated inactivity in seconds.
    #[must_use]
    pub fn inactivity(&self) -> u64 { self.inactivity }

    /// `Content-Type` of every response.
    #[must_use]
    pub fn content_type(&self) -> &str { &self.content }

    /// Whether the acknowledgement protocol is in use.
    #[must_use]
    pub fn ack_enabled(&self) -> bool { self.ack }

    /// Raw `route` attribute from the creation request.
    #[must_use]
    pub fn route(&self) -> Option<&str> { self.route.as_deref() }

    /// `ua` attribute from the creation request.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> { self.user_agent.as_deref() }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState { self.state }

    /// Whether the session has been terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool { self.state == SessionState::Terminated }

    /// Number of held response slots.
    #[must_use]
    pub fn held_slots(&self) -> usize { self.slots.len() }

    /// RIDs of the held slots, oldest first.
    #[must_use]
    pub fn held_rids(&self) -> Vec<u64> { self.slots.iter().map(ResponseSlot::rid).collect() }

    /// Number of responses waiting for a slot.
    #[must_use]
    pub fn pending_len(&self) -> usize { self.pending.len() }

    /// RIDs whose responses are awaiting acknowledgement.
    #[must_use]
    pub fn unacked_rids(&self) -> Vec<u64> { self.unacked.keys().copied().collect() }

    /// Highest RID whose slot carried a response.
    #[must_use]
    pub fn max_rid_sent(&self) -> u64 { self.max_rid_sent }

    /// Whether a flush is queued for the end of the turn.
    #[must_use]
    pub fn flush_scheduled(&self) -> bool { self.flush_scheduled }

    /// Whether the inactivity timer is armed.
    #[must_use]
    pub fn inactivity_armed(&self) -> bool { self.inactivity_timer.is_some() }

    /// Streams open on this session, in creation order.
    #[must_use]
    pub fn streams(&self) -> &[StreamName] { &self.streams }

    /// Whether `name` is open on this session.
    #[must_use]
    pub fn has_stream(&self, name: &StreamName) -> bool { self.streams.contains(name) }

    pub(crate) fn add_stream(&mut self, name: StreamName) { self.streams.push(name); }

    pub(crate) fn remove_stream(&mut self, name: &StreamName) -> bool {
        let before = self.streams.len();
        self.streams.retain(|open| open != name);
        self.streams.len() != before
    }

    /// Build the session creation response for the first stream.
    #[must_use]
    pub fn creation_response(&self, stream: &Stream) -> Element {
        let mut response = stanza::body()
            .with_attr("stream", stream.name())
            .with_attr("sid", &self.sid)
            .with_attr("wait", self.wait)
            .with_attr("ver", BOSH_VERSION)
            .with_attr("polling", self.inactivity / 2)
            .with_attr("inactivity", self.inactivity)
            .with_attr("requests", self.window)
            .with_attr("hold", self.hold)
            .with_attr("window", self.window)
            .with_attr("from", stream.to())
            .with_attr("content", &self.content)
            .with_attr("xmpp:restartlogic", "true")
            .with_attr("xmlns:xmpp", XBOSH_XMLNS);
        if let Some(from) = stream.from() {
            response.set_attr("to", from);
        }
        if self.ack {
            response.set_attr("ack", self.rid);
        }
        response
    }

    fn next_slot_id(&mut self) -> crate::timer::SlotId {
        let id = crate::timer::SlotId(self.next_slot);
        self.next_slot += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn creation() -> Element {
        stanza::body()
            .with_attr("rid", 100)
            .with_attr("to", "example.com")
            .with_attr("wait", 60)
            .with_attr("hold", 1)
            .with_attr("xmlns:xmpp", XBOSH_XMLNS)
            .with_attr("xmpp:version", "1.0")
    }

    #[rstest]
    fn negotiates_parameters(creation: Element) {
        let session = Session::new(
            &creation.with_attr("ua", "client/1.0").with_attr("ack", 1),
            &BoshConfig::default(),
        )
        .expect("valid creation");
        assert_eq!(session.rid(), 100);
        assert_eq!(session.max_rid_sent(), 99);
        assert_eq!(session.wait(), 60);
        assert_eq!(session.hold(), 1);
        assert_eq!(session.inactivity(), 70);
        assert_eq!(session.content_type(), DEFAULT_CONTENT_TYPE);
        assert_eq!(session.user_agent(), Some("client/1.0"));
        assert!(session.ack_enabled());
        assert_eq!(session.state(), SessionState::Active);
    }

    #[rstest]
    fn rejects_creation_without_rid(creation: Element) {
        let mut request = creation;
        request.remove_attr("rid");
        let err = Session::new(&request, &BoshConfig::default()).expect_err("rid required");
        assert!(matches!(err, BoshError::InvalidCreation(_)));
    }

    #[rstest]
    #[case::above_limit(MAX_RID + 1)]
    #[case::largest_u64(u64::MAX)]
    fn rejects_creation_rid_beyond_limit(creation: Element, #[case] rid: u64) {
        let request = creation.with_attr("rid", rid);
        let err = Session::new(&request, &BoshConfig::default()).expect_err("rid out of range");
        assert!(matches!(err, BoshError::InvalidCreation("rid out of range")));
    }

    #[rstest]
    fn creation_response_describes_session(creation: Element) {
        let mut session = Session::new(&creation, &BoshConfig::default()).expect("valid");
        let stream = Stream::new(&mut session, &creation.with_attr("from", "user@example.com"));
        let response = session.creation_response(&stream);
        assert_eq!(response.attr("sid"), Some(session.sid().as_str()));
        assert_eq!(response.attr("stream"), Some(stream.name().as_str()));
        assert_eq!(response.attr("polling"), Some("35"));
        assert_eq!(response.attr("requests"), Some("2"));
        assert_eq!(response.attr("from"), Some("example.com"));
        assert_eq!(response.attr("to"), Some("user@example.com"));
        assert_eq!(response.attr("ver"), Some(BOSH_VERSION));
        assert!(!response.has_attr("ack"));
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
