//! Events exchanged with the connector, and the per-turn context.
//!
//! The engine reports stream lifecycle and inbound stanzas as
//! [`ConnectorEvent`]s; the connector answers with [`ConnectorCommand`]s.
//! Work performed while handling one input runs inside a [`Turn`], which
//! collects emitted events and the sessions whose pending queue should be
//! flushed once the current input has been fully processed.

use tokio::time::Instant;

use crate::{
    error::Condition,
    session::{SessionId, UnackedEntry},
    stream::{StreamInfo, StreamName},
    timer::Scheduler,
    xml::Element,
};

/// Notifications for the connector.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectorEvent {
    /// A stream was opened; reply with [`ConnectorCommand::StreamAdded`].
    StreamAdd(StreamInfo),
    /// The client restarted the stream after authentication.
    StreamRestart(StreamInfo),
    /// Stanzas from the client, in RID order.
    Nodes {
        /// Child elements of the admitted request bodies.
        stanzas: Vec<Element>,
        /// Stream the stanzas belong to.
        stream: StreamInfo,
    },
    /// The client, or inactivity, ended the stream.
    StreamTerminate(StreamInfo),
    /// The client acknowledged a response.
    ResponseAcknowledged {
        /// Session that sent the response.
        sid: SessionId,
        /// The acknowledged response.
        entry: UnackedEntry,
    },
    /// A stanza could not be delivered because the client is gone.
    NoClient(Element),
}

/// Replies from the connector.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectorCommand {
    /// The upstream stream is ready.
    StreamAdded(StreamName),
    /// A stanza for the client.
    Response {
        /// Stanza to wrap in a `<body>` and deliver.
        stanza: Element,
        /// Stream the stanza belongs to.
        stream: StreamName,
    },
    /// The upstream ended the stream.
    Terminate {
        /// Stream to end.
        stream: StreamName,
        /// Reason passed on to the client.
        condition: Option<Condition>,
    },
}

/// Mutable context shared by everything handled during one scheduling turn.
pub struct Turn<'a> {
    pub(crate) scheduler: &'a mut dyn Scheduler,
    events: &'a mut Vec<ConnectorEvent>,
    deferred: &'a mut Vec<SessionId>,
}

impl<'a> Turn<'a> {
    pub(crate) fn new(
        scheduler: &'a mut dyn Scheduler,
        events: &'a mut Vec<ConnectorEvent>,
        deferred: &'a mut Vec<SessionId>,
    ) -> Self {
        Self {
            scheduler,
            events,
            deferred,
        }
    }

    /// Queue an event for the connector.
    pub(crate) fn emit(&mut self, event: ConnectorEvent) { self.events.push(event); }

    /// Ask for `sid` to be flushed once the current input is handled.
    pub(crate) fn defer_flush(&mut self, sid: SessionId) { self.deferred.push(sid); }

    /// Current instant on the scheduler's clock.
    pub(crate) fn now(&self) -> Instant { self.scheduler.now() }

    pub(crate) fn deferred_is_empty(&self) -> bool { self.deferred.is_empty() }

    pub(crate) fn take_deferred(&mut self) -> Vec<SessionId> { std::mem::take(&mut *self.deferred) }
}
