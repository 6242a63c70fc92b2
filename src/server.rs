//! Tokio driver for [`BoshEngine`].
//!
//! [`BoshServer`] owns the engine and a [`DelayQueueScheduler`] and runs a
//! single `tokio::select!` loop over shutdown, expired timers, and inbound
//! requests and connector commands. The `biased` keyword makes shutdown win
//! over everything else, and due timers win over new input. After every
//! event the loop flushes deferred responses and forwards connector events.
//!
//! Transports and connectors talk to the loop through a cloneable
//! [`BoshHandle`].

use bytes::Bytes;
use log::info;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::BoshConfig,
    engine::BoshEngine,
    error::BoshError,
    event::{ConnectorCommand, ConnectorEvent},
    metrics,
    slot::{OutgoingBody, ResponseSink},
    timer::{DelayQueueScheduler, TimerEvent},
};

/// The server loop has stopped.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("BOSH server has stopped")]
pub struct ServerClosed;

enum Inbound {
    Request {
        payload: Bytes,
        sink: Box<dyn ResponseSink>,
    },
    Command(ConnectorCommand),
}

/// Events returned by [`BoshServer::next_event`].
enum Event {
    Shutdown,
    Inbound(Option<Inbound>),
    Timer(Option<TimerEvent>),
}

/// Cloneable handle for submitting work to a running [`BoshServer`].
#[derive(Clone)]
pub struct BoshHandle {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl BoshHandle {
    /// Submit a raw request body with the sink that answers it.
    ///
    /// # Errors
    ///
    /// Returns [`ServerClosed`] if the server loop has exited.
    pub fn submit(
        &self,
        payload: impl Into<Bytes>,
        sink: Box<dyn ResponseSink>,
    ) -> Result<(), ServerClosed> {
        self.tx
            .send(Inbound::Request {
                payload: payload.into(),
                sink,
            })
            .map_err(|_| ServerClosed)
    }

    /// Submit a request and wait for its response.
    ///
    /// Returns `None` if the request was dropped without an answer, for
    /// example because it exceeded the size limit, or the server stopped.
    pub async fn request(&self, payload: impl Into<Bytes>) -> Option<OutgoingBody> {
        let (tx, rx) = oneshot::channel();
        self.submit(payload, Box::new(tx)).ok()?;
        rx.await.ok()
    }

    /// Deliver a connector command.
    ///
    /// # Errors
    ///
    /// Returns [`ServerClosed`] if the server loop has exited.
    pub fn command(&self, command: ConnectorCommand) -> Result<(), ServerClosed> {
        self.tx
            .send(Inbound::Command(command))
            .map_err(|_| ServerClosed)
    }
}

/// Async driver owning a [`BoshEngine`].
pub struct BoshServer {
    engine: BoshEngine<DelayQueueScheduler>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    events: mpsc::UnboundedSender<ConnectorEvent>,
}

impl BoshServer {
    /// Create a server, the handle used to feed it, and the receiver of
    /// connector events.
    #[must_use]
    pub fn new(
        config: BoshConfig,
    ) -> (
        Self,
        BoshHandle,
        mpsc::UnboundedReceiver<ConnectorEvent>,
    ) {
        let (tx, inbound) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let server = Self {
            engine: BoshEngine::new(config, DelayQueueScheduler::new()),
            inbound,
            events,
        };
        (server, BoshHandle { tx }, events_rx)
    }

    /// Run until `shutdown` is cancelled or every handle is dropped.
    ///
    /// On exit every live session is terminated with `system-shutdown`.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("bosh server started");
        loop {
            match self.next_event(&shutdown).await {
                Event::Shutdown | Event::Inbound(None) => break,
                Event::Inbound(Some(Inbound::Request { payload, sink })) => {
                    let result = self.engine.handle_raw_request(&payload, sink);
                    Self::record(result);
                }
                Event::Inbound(Some(Inbound::Command(command))) => {
                    let result = self.engine.handle_command(command);
                    Self::record(result);
                }
                Event::Timer(Some(timer)) => self.engine.fire(timer),
                Event::Timer(None) => {}
            }
            self.flush();
        }
        self.engine.shutdown();
        self.flush();
        info!("bosh server stopped");
    }

    async fn next_event(&mut self, shutdown: &CancellationToken) -> Event {
        let timers_armed = !self.engine.scheduler().is_empty();
        tokio::select! {
            biased;

            () = shutdown.cancelled() => Event::Shutdown,
            timer = self.engine.scheduler_mut().next_expired(), if timers_armed => Event::Timer(timer),
            msg = self.inbound.recv() => Event::Inbound(msg),
        }
    }

    fn record(result: Result<(), BoshError>) {
        if let Err(err) = result {
            metrics::inc_errors();
            match err {
                BoshError::RequestTooLarge { .. } | BoshError::Xml(_) => {
                    warn!(error = %err, "request refused");
                }
                other => debug!(error = %other, "request refused"),
            }
        }
    }

    fn flush(&mut self) {
        self.engine.run_deferred();
        for event in self.engine.take_events() {
            if self.events.send(event).is_err() {
                debug!("connector event receiver dropped");
            }
        }
    }
}
