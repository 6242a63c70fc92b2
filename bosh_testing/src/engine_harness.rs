//! A [`BoshEngine`] on a virtual clock, with helpers for driving it.

use std::time::Duration;

use bosh_engine::{
    BoshConfig,
    BoshEngine,
    BoshError,
    ConnectorCommand,
    ConnectorEvent,
    Element,
    ManualScheduler,
    SessionId,
    StreamName,
    slot::OutgoingBody,
    test_helpers::{self, sink_pair},
};
use rstest::fixture;
use tokio::sync::oneshot;

use crate::RequestBuilder;

/// The pending answer to one request.
#[derive(Debug)]
pub struct Reply {
    /// What the engine returned for the request.
    pub result: Result<(), BoshError>,
    rx: oneshot::Receiver<OutgoingBody>,
    written: Option<OutgoingBody>,
}

impl Reply {
    fn new(result: Result<(), BoshError>, rx: oneshot::Receiver<OutgoingBody>) -> Self {
        Self {
            result,
            rx,
            written: None,
        }
    }

    fn poll(&mut self) {
        if self.written.is_none() {
            self.written = self.rx.try_recv().ok();
        }
    }

    /// The written response, if any.
    pub fn take(&mut self) -> Option<Element> {
        self.take_raw()
            .and_then(|body| test_helpers::decode(&body).ok())
    }

    /// The written response with its headers, if any.
    pub fn take_raw(&mut self) -> Option<OutgoingBody> {
        self.poll();
        self.written.take()
    }

    /// Whether the engine still holds the response open.
    pub fn is_held(&mut self) -> bool {
        self.poll();
        self.written.is_none()
            && matches!(self.rx.try_recv(), Err(oneshot::error::TryRecvError::Empty))
    }
}

/// A session opened through [`Harness::create_session`].
#[derive(Debug)]
pub struct Created {
    /// The new session.
    pub sid: SessionId,
    /// Its first stream.
    pub stream: StreamName,
    /// The creation response.
    pub response: Element,
}

/// Engine under test, driven on a [`ManualScheduler`].
pub struct Harness {
    engine: BoshEngine<ManualScheduler>,
}

impl Harness {
    /// Wrap an engine built from `config`.
    #[must_use]
    pub fn new(config: BoshConfig) -> Self {
        Self {
            engine: BoshEngine::new(config, ManualScheduler::new()),
        }
    }

    /// The engine.
    #[must_use]
    pub fn engine(&self) -> &BoshEngine<ManualScheduler> { &self.engine }

    /// Mutable access to the engine.
    pub fn engine_mut(&mut self) -> &mut BoshEngine<ManualScheduler> { &mut self.engine }

    /// Submit a request and run deferred flushes.
    pub fn send(&mut self, request: Element) -> Reply {
        let (sink, rx) = sink_pair();
        let result = self.engine.handle_request(request, sink);
        self.engine.run_deferred();
        Reply::new(result, rx)
    }

    /// Submit a raw payload and run deferred flushes.
    pub fn send_raw(&mut self, payload: &[u8]) -> Reply {
        let (sink, rx) = sink_pair();
        let result = self.engine.handle_raw_request(payload, sink);
        self.engine.run_deferred();
        Reply::new(result, rx)
    }

    /// Apply a connector command and run deferred flushes.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error for the command.
    pub fn command(&mut self, command: ConnectorCommand) -> Result<(), BoshError> {
        let result = self.engine.handle_command(command);
        self.engine.run_deferred();
        result
    }

    /// Queue a `<message>` from the connector for `stream`.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error for the command.
    pub fn respond(&mut self, stream: &StreamName, id: &str) -> Result<(), BoshError> {
        self.command(ConnectorCommand::Response {
            stanza: Element::new("message").with_attr("id", id),
            stream: stream.clone(),
        })
    }

    /// Advance the virtual clock by `secs` seconds.
    pub fn advance(&mut self, secs: u64) { self.engine.advance(Duration::from_secs(secs)); }

    /// Advance the virtual clock by `by`.
    pub fn advance_by(&mut self, by: Duration) { self.engine.advance(by); }

    /// Drain connector events.
    pub fn events(&mut self) -> Vec<ConnectorEvent> { self.engine.take_events() }

    /// Open a session with the defaults of [`RequestBuilder::creation`].
    ///
    /// # Panics
    ///
    /// Panics if the session cannot be created.
    pub fn create_session(&mut self, rid: u64) -> Created {
        self.create_session_with(RequestBuilder::creation(rid))
    }

    /// Open a session from a custom creation request.
    ///
    /// Connector events produced by the creation are discarded.
    ///
    /// # Panics
    ///
    /// Panics if the session cannot be created.
    pub fn create_session_with(&mut self, request: RequestBuilder) -> Created {
        let mut reply = self.send(request.build());
        assert!(reply.result.is_ok(), "creation refused: {:?}", reply.result);
        let response = reply.take().expect("creation response written");
        let sid = SessionId::from(response.attr("sid").expect("sid in creation response"));
        let stream =
            StreamName::from(response.attr("stream").expect("stream in creation response"));
        self.events();
        Created {
            sid,
            stream,
            response,
        }
    }
}

impl Default for Harness {
    fn default() -> Self { Self::new(BoshConfig::default()) }
}

/// Harness over the default configuration.
#[fixture]
pub fn harness() -> Harness { Harness::default() }
