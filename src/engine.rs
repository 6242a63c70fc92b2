//! The BOSH engine.
//!
//! [`BoshEngine`] is a synchronous state machine. The transport feeds it
//! request bodies together with a [`ResponseSink`], the connector feeds it
//! [`ConnectorCommand`]s, and the scheduler feeds it expired
//! [`TimerEvent`]s. After each input the owner calls
//! [`BoshEngine::run_deferred`] to flush responses queued during the input
//! and [`BoshEngine::take_events`] to collect notifications for the
//! connector. [`crate::server::BoshServer`] wires all of this to tokio.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    config::BoshConfig,
    error::{BoshError, Condition},
    event::{ConnectorCommand, ConnectorEvent, Turn},
    metrics::{self, Direction},
    registry::{RegistryKind, SessionRegistry, StreamRegistry},
    session::{DEFAULT_CONTENT_TYPE, Recovery, Session, SessionId},
    slot::{ResponseSink, respond},
    stanza,
    stream::{Stream, StreamName},
    timer::{ManualScheduler, Scheduler, TimerEvent},
    xml::{self, Element},
};

/// Counters describing the engine's registries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoshStats {
    /// Sessions currently live.
    pub active_sessions: usize,
    /// Sessions ever created.
    pub total_sessions: u64,
    /// Streams currently live.
    pub active_streams: usize,
    /// Streams ever opened.
    pub total_streams: u64,
}

/// BOSH session engine driven by an injected [`Scheduler`].
pub struct BoshEngine<S> {
    config: BoshConfig,
    scheduler: S,
    sessions: SessionRegistry,
    streams: StreamRegistry,
    events: Vec<ConnectorEvent>,
    deferred: Vec<SessionId>,
}

impl<S: Scheduler> BoshEngine<S> {
    /// Create an engine with no sessions.
    #[must_use]
    pub fn new(config: BoshConfig, scheduler: S) -> Self {
        Self {
            config,
            scheduler,
            sessions: SessionRegistry::new(RegistryKind::Session),
            streams: StreamRegistry::new(RegistryKind::Stream),
            events: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &BoshConfig { &self.config }

    /// Scheduler backing the engine's timers.
    #[must_use]
    pub fn scheduler(&self) -> &S { &self.scheduler }

    /// Mutable access to the scheduler, used by drivers to poll timers.
    pub fn scheduler_mut(&mut self) -> &mut S { &mut self.scheduler }

    /// Live session for `sid`.
    #[must_use]
    pub fn session(&self, sid: &SessionId) -> Option<&Session> { self.sessions.get(sid) }

    /// Live stream named `name`.
    #[must_use]
    pub fn stream(&self, name: &StreamName) -> Option<&Stream> { self.streams.get(name) }

    /// Archived terminate condition of a recently ended session.
    #[must_use]
    pub fn archived_session(&self, sid: &SessionId) -> Option<Option<&Condition>> {
        self.sessions.archived(sid)
    }

    /// Archived terminate condition of a recently ended stream.
    #[must_use]
    pub fn archived_stream(&self, name: &StreamName) -> Option<Option<&Condition>> {
        self.streams.archived(name)
    }

    /// Registry counters.
    #[must_use]
    pub fn stats(&self) -> BoshStats {
        BoshStats {
            active_sessions: self.sessions.active(),
            total_sessions: self.sessions.total(),
            active_streams: self.streams.active(),
            total_streams: self.streams.total(),
        }
    }

    /// Drain the notifications produced so far.
    pub fn take_events(&mut self) -> Vec<ConnectorEvent> { std::mem::take(&mut self.events) }

    /// Handle a raw request payload.
    ///
    /// Oversized payloads are refused without answering the sink; the
    /// transport is expected to close the connection. Payloads that fail to
    /// parse are answered with a `bad-request` terminate body.
    ///
    /// # Errors
    ///
    /// Returns a [`BoshError`] describing why the request was refused.
    pub fn handle_raw_request(
        &mut self,
        payload: &[u8],
        sink: Box<dyn ResponseSink>,
    ) -> Result<(), BoshError> {
        if payload.len() > self.config.max_held_bytes {
            warn!(
                len = payload.len(),
                max = self.config.max_held_bytes,
                "request too large"
            );
            return Err(BoshError::RequestTooLarge {
                len: payload.len(),
                max: self.config.max_held_bytes,
            });
        }
        match xml::parse_body(payload) {
            Ok(request) => self.handle_request(request, sink),
            Err(err) => {
                debug!(error = %err, "unparseable request");
                let reply = stanza::terminate(Some(&Condition::BadRequest));
                if respond(sink, reply, DEFAULT_CONTENT_TYPE).is_err() {
                    debug!("client gone before bad-request reply");
                }
                Err(err.into())
            }
        }
    }

    /// Handle a parsed request body.
    ///
    /// # Errors
    ///
    /// Returns a [`BoshError`] when the request was refused. The sink has
    /// already been answered in that case.
    pub fn handle_request(
        &mut self,
        request: Element,
        sink: Box<dyn ResponseSink>,
    ) -> Result<(), BoshError> {
        metrics::inc_bodies(Direction::Inbound);
        self.core().handle_request(request, sink)
    }

    /// Apply a command from the connector.
    ///
    /// # Errors
    ///
    /// Returns [`BoshError::StreamGone`] if the command names a stream that
    /// no longer exists. A response for such a stream is reported back as
    /// [`ConnectorEvent::NoClient`].
    pub fn handle_command(&mut self, command: ConnectorCommand) -> Result<(), BoshError> {
        self.core().handle_command(command)
    }

    /// Handle an expired timer.
    pub fn fire(&mut self, event: TimerEvent) { self.core().fire(event); }

    /// Flush every session that queued responses during the last input.
    ///
    /// Returns the number of responses written.
    pub fn run_deferred(&mut self) -> usize { self.core().run_deferred() }

    /// Terminate every session with `system-shutdown`.
    pub fn shutdown(&mut self) {
        let mut core = self.core();
        let sids = core.sessions.keys();
        info!(sessions = sids.len(), "shutting down");
        for sid in sids {
            core.terminate_streams(&sid, None, Vec::new(), Some(Condition::SystemShutdown));
        }
    }

    fn core(&mut self) -> Core<'_> {
        Core {
            config: &self.config,
            sessions: &mut self.sessions,
            streams: &mut self.streams,
            turn: Turn::new(&mut self.scheduler, &mut self.events, &mut self.deferred),
        }
    }
}

impl BoshEngine<ManualScheduler> {
    /// Advance the virtual clock, firing every timer that falls due and
    /// flushing after each one.
    pub fn advance(&mut self, by: Duration) {
        let target = self.scheduler.elapsed() + by;
        while let Some(event) = self.scheduler.pop_due(target) {
            self.fire(event);
            self.run_deferred();
        }
        self.scheduler.set_elapsed(target);
    }
}

/// Borrowed view of the engine used while handling one input.
struct Core<'a> {
    config: &'a BoshConfig,
    sessions: &'a mut SessionRegistry,
    streams: &'a mut StreamRegistry,
    turn: Turn<'a>,
}

impl Core<'_> {
    fn handle_request(
        &mut self,
        request: Element,
        sink: Box<dyn ResponseSink>,
    ) -> Result<(), BoshError> {
        if stanza::is_session_creation(&request) {
            return self.create_session(request, sink);
        }
        let sid = match request.attr("sid") {
            Some(raw) if self.sessions.contains(&SessionId::from(raw)) => SessionId::from(raw),
            raw => {
                let raw = raw.map(str::to_owned);
                self.reply_invalid_session(raw.as_deref(), sink);
                return Err(BoshError::UnknownSession(raw));
            }
        };

        if let Err(reason) = self.validate(&sid, &request) {
            warn!(sid = %sid, reason, "invalid packet, terminating session");
            let content = self.content_type(&sid);
            self.terminate_streams(&sid, None, Vec::new(), Some(Condition::ItemNotFound));
            let mut reply = stanza::terminate(Some(&Condition::ItemNotFound))
                .with_attr("message", "Invalid packet");
            if let Some(stream) = request.attr("stream") {
                reply.set_attr("stream", stream);
            }
            if respond(sink, reply, &content).is_err() {
                debug!(sid = %sid, "client gone before invalid-packet reply");
            }
            return Err(BoshError::InvalidPacket { sid, reason });
        }

        let Some(session) = self.sessions.get_mut(&sid) else {
            return Err(BoshError::UnknownSession(Some(sid.to_string())));
        };
        let rid = request.attr_u64("rid").unwrap_or_default();
        session.reset_inactivity(&mut self.turn);
        let admitted = session.admit_packets(request.clone());
        let terminate = match session.handle_acknowledgements(&request, &mut self.turn) {
            Recovery::Resend(body) => {
                if respond(sink, body, session.content_type()).is_err() {
                    debug!(sid = %sid, rid, "client gone before resend");
                }
                return Ok(());
            }
            Recovery::Empty => {
                if respond(sink, stanza::body(), session.content_type()).is_err() {
                    debug!(sid = %sid, rid, "client gone before empty reply");
                }
                return Ok(());
            }
            Recovery::Proceed { terminate } => terminate,
        };

        let mut outcome = Ok(());
        let unknown_stream = request
            .attr("stream")
            .filter(|raw| !session.has_stream(&StreamName::from(*raw)));
        if let Some(raw) = unknown_stream {
            warn!(sid = %sid, stream = raw, "request names unknown stream");
            self.reply_invalid_stream(&sid, raw, sink);
            outcome = Err(BoshError::UnknownStream {
                sid: sid.clone(),
                stream: raw.to_owned(),
            });
        } else if let Err(err) = session.hold_response(rid, sink, &mut self.turn) {
            self.terminate_streams(&sid, None, Vec::new(), Some(Condition::PolicyViolation));
            return Err(err);
        }

        if terminate {
            self.terminate_streams(&sid, None, Vec::new(), Some(Condition::ItemNotFound));
            return outcome;
        }
        if admitted.is_empty() {
            return outcome;
        }

        for packet in admitted {
            if !self.sessions.contains(&sid) {
                break;
            }
            if let Err(err) = self.process_packet(&sid, packet) {
                outcome = outcome.and(Err(err));
            }
        }
        if let Some(session) = self.sessions.get_mut(&sid) {
            session.release_excess_slots(&mut self.turn);
        }
        outcome
    }

    fn validate(&self, sid: &SessionId, request: &Element) -> Result<(), &'static str> {
        self.sessions
            .get(sid)
            .map_or(Err("unknown session"), |session| session.validate(request))
    }

    fn content_type(&self, sid: &SessionId) -> String {
        self.sessions.get(sid).map_or_else(
            || DEFAULT_CONTENT_TYPE.to_owned(),
            |session| session.content_type().to_owned(),
        )
    }

    fn create_session(
        &mut self,
        request: Element,
        sink: Box<dyn ResponseSink>,
    ) -> Result<(), BoshError> {
        let mut session = match Session::new(&request, self.config) {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "refusing session creation");
                let reply = stanza::terminate(Some(&Condition::BadRequest));
                if respond(sink, reply, DEFAULT_CONTENT_TYPE).is_err() {
                    debug!("client gone before bad-request reply");
                }
                return Err(err);
            }
        };
        let sid = session.sid().clone();
        let rid = session.rid();
        session.reset_inactivity(&mut self.turn);
        session.hold_response(rid, sink, &mut self.turn)?;

        let stream = Stream::new(&mut session, &request);
        let info = stream.info();
        let response = session.creation_response(&stream);
        session.enqueue(response, stream.name().clone(), &mut self.turn);
        info!(
            sid = %sid,
            stream = %info.name,
            wait = session.wait(),
            hold = session.hold(),
            inactivity = session.inactivity(),
            ack = session.ack_enabled(),
            "session created"
        );
        self.sessions.add(sid.clone(), session);
        self.streams.add(info.name.clone(), stream);

        self.turn.emit(ConnectorEvent::StreamAdd(info.clone()));
        let stanzas = request.into_child_elements();
        if !stanzas.is_empty() {
            self.turn.emit(ConnectorEvent::Nodes {
                stanzas,
                stream: info,
            });
        }
        if let Some(session) = self.sessions.get_mut(&sid) {
            session.release_excess_slots(&mut self.turn);
        }
        Ok(())
    }

    /// Dispatch one admitted request body.
    fn process_packet(&mut self, sid: &SessionId, packet: Element) -> Result<(), BoshError> {
        let stream = match packet.attr("stream").map(StreamName::from) {
            Some(name) if self.owns_stream(sid, &name) => Some(name),
            Some(name) => {
                warn!(sid = %sid, stream = %name, "dropping body for unknown stream");
                return Ok(());
            }
            None => None,
        };

        if stanza::is_stream_terminate(&packet) {
            let condition = packet.attr("condition").map(Condition::from);
            self.terminate_streams(sid, stream, packet.into_child_elements(), condition);
            return Ok(());
        }
        if stanza::is_stream_restart(&packet) {
            self.restart_stream(sid, stream, &packet);
            return Ok(());
        }
        if stanza::is_stream_add(&packet) {
            return self.add_stream(sid, &packet);
        }

        let stanzas = packet.into_child_elements();
        if !stanzas.is_empty() {
            self.emit_nodes(sid, stream.as_ref(), stanzas);
        }
        Ok(())
    }

    fn owns_stream(&self, sid: &SessionId, name: &StreamName) -> bool {
        self.sessions
            .get(sid)
            .is_some_and(|session| session.has_stream(name))
    }

    fn add_stream(&mut self, sid: &SessionId, request: &Element) -> Result<(), BoshError> {
        let Some(session) = self.sessions.get_mut(sid) else {
            return Err(BoshError::UnknownSession(Some(sid.to_string())));
        };
        if session.streams().len() >= self.config.max_streams_per_session {
            warn!(
                sid = %sid,
                max = self.config.max_streams_per_session,
                "stream limit exceeded"
            );
            self.terminate_streams(sid, None, Vec::new(), Some(Condition::PolicyViolation));
            return Err(BoshError::StreamLimit(sid.clone()));
        }
        let stream = Stream::new(session, request);
        let info = stream.info();
        self.streams.add(info.name.clone(), stream);
        self.turn.emit(ConnectorEvent::StreamAdd(info));
        Ok(())
    }

    fn restart_stream(&mut self, sid: &SessionId, stream: Option<StreamName>, request: &Element) {
        let target = stream.or_else(|| {
            self.sessions
                .get(sid)
                .and_then(|session| session.streams().first().cloned())
        });
        let Some(stream) = target.and_then(|name| self.streams.get_mut(&name)) else {
            warn!(sid = %sid, "restart for session without streams");
            return;
        };
        stream.restart(request, &mut self.turn);
    }

    /// Hand stanzas to the named stream, or to every stream of the session.
    fn emit_nodes(&mut self, sid: &SessionId, stream: Option<&StreamName>, stanzas: Vec<Element>) {
        let targets = match stream {
            Some(name) => vec![name.clone()],
            None => self
                .sessions
                .get(sid)
                .map(|session| session.streams().to_vec())
                .unwrap_or_default(),
        };
        for name in targets {
            if let Some(stream) = self.streams.get(&name) {
                self.turn.emit(ConnectorEvent::Nodes {
                    stanzas: stanzas.clone(),
                    stream: stream.info(),
                });
            }
        }
    }

    /// End one stream, or all streams, of a session on the client's behalf.
    ///
    /// `stanzas` carried by the terminate request are delivered first. When
    /// only some streams end, each gets a terminate body of its own; once no
    /// stream is left the session itself is terminated.
    fn terminate_streams(
        &mut self,
        sid: &SessionId,
        stream: Option<StreamName>,
        stanzas: Vec<Element>,
        condition: Option<Condition>,
    ) {
        let Some(session) = self.sessions.get_mut(sid) else {
            return;
        };
        let targets = match stream {
            Some(name) => vec![name],
            None => session.streams().to_vec(),
        };
        let ending_all = targets.len() == session.streams().len();
        let wait = session.wait();

        for name in targets {
            let Some(stream) = self.streams.get_mut(&name) else {
                warn!(sid = %sid, stream = %name, "terminating unknown stream");
                continue;
            };
            let info = stream.info();
            if !stanzas.is_empty() {
                self.turn.emit(ConnectorEvent::Nodes {
                    stanzas: stanzas.clone(),
                    stream: info.clone(),
                });
            }
            if !ending_all {
                stream.send_terminate_response(session, condition.as_ref(), &mut self.turn);
            }
            let ended = stream.terminate(session, condition.clone());
            self.streams.remove(
                &ended.name,
                ended.condition,
                wait,
                TimerEvent::StreamArchiveExpiry(name),
                self.turn.scheduler,
            );
            self.turn.emit(ConnectorEvent::StreamTerminate(info));
        }

        if session.streams().is_empty() {
            self.end_session(sid, condition);
        }
    }

    /// Send the session terminate body, drain the session and archive it.
    fn end_session(&mut self, sid: &SessionId, condition: Option<Condition>) {
        let Some(session) = self.sessions.get_mut(sid) else {
            return;
        };
        session.send_terminate_response(condition.as_ref(), &mut self.turn);
        let ended = session.terminate(condition, &mut self.turn);
        info!(sid = %sid, condition = ?ended.condition, "session terminated");
        self.sessions.remove(
            &ended.sid,
            ended.condition,
            ended.wait,
            TimerEvent::SessionArchiveExpiry(sid.clone()),
            self.turn.scheduler,
        );
    }

    fn reply_invalid_session(&self, raw: Option<&str>, sink: Box<dyn ResponseSink>) {
        let archived = raw.and_then(|raw| self.sessions.archived(&SessionId::from(raw)));
        let reply = match archived {
            Some(condition) => stanza::terminate(condition),
            None => stanza::terminate(Some(&Condition::ItemNotFound))
                .with_attr("message", "Invalid session ID"),
        };
        debug!(sid = raw, "request for unknown session");
        if respond(sink, reply, DEFAULT_CONTENT_TYPE).is_err() {
            debug!("client gone before invalid-session reply");
        }
    }

    fn reply_invalid_stream(&self, sid: &SessionId, raw: &str, sink: Box<dyn ResponseSink>) {
        let name = StreamName::from(raw);
        let reply = match self.streams.archived(&name) {
            Some(condition) => stanza::terminate(condition),
            None => stanza::terminate(Some(&Condition::ItemNotFound))
                .with_attr("message", "Invalid stream name"),
        }
        .with_attr("stream", raw);
        if respond(sink, reply, &self.content_type(sid)).is_err() {
            debug!(sid = %sid, "client gone before invalid-stream reply");
        }
    }

    fn handle_command(&mut self, command: ConnectorCommand) -> Result<(), BoshError> {
        match command {
            ConnectorCommand::StreamAdded(name) => {
                let Some(stream) = self.streams.get(&name) else {
                    return Err(BoshError::StreamGone(name));
                };
                let Some(session) = self.sessions.get_mut(stream.sid()) else {
                    return Err(BoshError::StreamGone(name));
                };
                if session.streams().len() > 1 {
                    stream.send_add_response(session, &mut self.turn);
                }
                Ok(())
            }
            ConnectorCommand::Response { stanza, stream } => {
                let live = self
                    .streams
                    .get(&stream)
                    .filter(|open| !open.is_terminated())
                    .map(|open| open.sid().clone());
                let Some(session) = live.and_then(|sid| self.sessions.get_mut(&sid)) else {
                    debug!(stream = %stream, "response for closed stream");
                    self.turn.emit(ConnectorEvent::NoClient(stanza));
                    return Err(BoshError::StreamGone(stream));
                };
                let body = stanza::body()
                    .with_attr("stream", &stream)
                    .with_child(stanza);
                session.enqueue(body, stream, &mut self.turn);
                Ok(())
            }
            ConnectorCommand::Terminate { stream, condition } => {
                self.terminate_from_connector(stream, condition)
            }
        }
    }

    /// End a stream because the upstream closed it.
    fn terminate_from_connector(
        &mut self,
        name: StreamName,
        condition: Option<Condition>,
    ) -> Result<(), BoshError> {
        let Some(stream) = self.streams.get_mut(&name) else {
            return Err(BoshError::StreamGone(name));
        };
        let sid = stream.sid().clone();
        let Some(session) = self.sessions.get_mut(&sid) else {
            return Err(BoshError::StreamGone(name));
        };
        stream.send_terminate_response(session, condition.as_ref(), &mut self.turn);
        let ended = stream.terminate(session, condition.clone());
        let wait = session.wait();
        let last = session.streams().is_empty();
        self.streams.remove(
            &ended.name,
            ended.condition,
            wait,
            TimerEvent::StreamArchiveExpiry(name),
            self.turn.scheduler,
        );
        if last {
            self.end_session(&sid, condition);
        }
        Ok(())
    }

    fn fire(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::SlotWait { sid, slot } => {
                if let Some(session) = self.sessions.get_mut(&sid) {
                    session.on_slot_timeout(slot, &mut self.turn);
                }
            }
            TimerEvent::Inactivity(sid) => {
                let Some(session) = self.sessions.get_mut(&sid) else {
                    return;
                };
                session.inactivity_fired();
                info!(sid = %sid, inactivity = session.inactivity(), "session inactive");
                for stanza in session.take_orphans() {
                    self.turn.emit(ConnectorEvent::NoClient(stanza));
                }
                self.terminate_streams(&sid, None, Vec::new(), None);
            }
            TimerEvent::SessionArchiveExpiry(sid) => self.sessions.expire(&sid),
            TimerEvent::StreamArchiveExpiry(name) => self.streams.expire(&name),
        }
    }

    fn run_deferred(&mut self) -> usize {
        let mut sent = 0;
        // Flushing can queue further flushes; drain until quiet.
        while !self.turn.deferred_is_empty() {
            for sid in self.turn.take_deferred() {
                if let Some(session) = self.sessions.get_mut(&sid) {
                    sent += session.run_scheduled_flush(&mut self.turn);
                }
            }
        }
        sent
    }
}
