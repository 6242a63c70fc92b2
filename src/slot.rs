//! Held HTTP response slots.
//!
//! A [`ResponseSlot`] wraps the capability to answer one HTTP request. The
//! transport hands the engine a boxed [`ResponseSink`]; the slot remembers
//! which RID it answers, owns the wait timer armed for it, and can be
//! consumed exactly once by [`ResponseSlot::send`].

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::{
    timer::{Scheduler, SlotId, TimerEvent, TimerKey},
    xml::Element,
};

/// Serialized body written to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingBody {
    /// Value for the `Content-Type` header.
    pub content_type: String,
    /// Serialized `<body>` element.
    pub payload: Bytes,
}

/// Socket-level tuning applied while a response is held.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketTuning {
    /// Idle timeout for the underlying socket.
    pub timeout: Duration,
    /// TCP keepalive interval.
    pub keepalive: Duration,
}

/// Capability to answer one HTTP request.
///
/// Implementations live in the transport. `send` reports a transport-level
/// failure by handing the body back so the engine can retry it elsewhere.
pub trait ResponseSink: Send + 'static {
    /// Write the response, consuming the capability.
    ///
    /// # Errors
    ///
    /// Returns the body unchanged if the client is gone.
    fn send(self: Box<Self>, body: OutgoingBody) -> Result<(), OutgoingBody>;

    /// Apply socket tuning while the response is held. The default ignores it.
    fn tune(&mut self, _tuning: &SocketTuning) {}
}

impl ResponseSink for oneshot::Sender<OutgoingBody> {
    fn send(self: Box<Self>, body: OutgoingBody) -> Result<(), OutgoingBody> {
        oneshot::Sender::send(*self, body)
    }
}

/// Answer a request immediately, without holding it.
///
/// # Errors
///
/// Returns the element back if the transport reports the client gone.
pub fn respond(
    sink: Box<dyn ResponseSink>,
    body: Element,
    content_type: &str,
) -> Result<(), Element> {
    let outgoing = OutgoingBody {
        content_type: content_type.to_owned(),
        payload: Bytes::from(body.to_string()),
    };
    sink.send(outgoing).map_err(|_| body)
}

/// One held response associated with a request RID.
pub struct ResponseSlot {
    id: SlotId,
    rid: u64,
    sink: Box<dyn ResponseSink>,
    timer: Option<TimerKey>,
}

impl std::fmt::Debug for ResponseSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSlot")
            .field("id", &self.id)
            .field("rid", &self.rid)
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

impl ResponseSlot {
    /// Wrap a sink answering request `rid`.
    #[must_use]
    pub fn new(id: SlotId, rid: u64, sink: Box<dyn ResponseSink>) -> Self {
        Self {
            id,
            rid,
            sink,
            timer: None,
        }
    }

    /// Identifier of the slot within its session.
    #[must_use]
    pub fn id(&self) -> SlotId { self.id }

    /// RID of the request this slot answers.
    #[must_use]
    pub fn rid(&self) -> u64 { self.rid }

    /// Forward socket tuning to the sink.
    pub fn tune(&mut self, tuning: &SocketTuning) { self.sink.tune(tuning); }

    /// Arm the wait timer, replacing any previous one.
    pub fn arm(&mut self, scheduler: &mut dyn Scheduler, wait: Duration, event: TimerEvent) {
        self.cancel(scheduler);
        self.timer = Some(scheduler.schedule(wait, event));
    }

    /// Cancel the wait timer if armed.
    pub fn cancel(&mut self, scheduler: &mut dyn Scheduler) {
        if let Some(key) = self.timer.take() {
            scheduler.cancel(key);
        }
    }

    /// Whether the wait timer is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool { self.timer.is_some() }

    /// Serialize `body` and write it, consuming the slot.
    ///
    /// The wait timer must already be cancelled.
    ///
    /// # Errors
    ///
    /// Returns the element back if the transport reports the client gone.
    pub fn send(self, body: Element, content_type: &str) -> Result<(), Element> {
        debug_assert!(self.timer.is_none(), "slot sent with armed wait timer");
        respond(self.sink, body, content_type)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{session::SessionId, stanza, timer::ManualScheduler};

    struct TuningProbe(Arc<Mutex<Option<SocketTuning>>>);

    impl ResponseSink for TuningProbe {
        fn send(self: Box<Self>, _body: OutgoingBody) -> Result<(), OutgoingBody> { Ok(()) }

        fn tune(&mut self, tuning: &SocketTuning) {
            if let Ok(mut seen) = self.0.lock() {
                *seen = Some(*tuning);
            }
        }
    }

    #[test]
    fn send_writes_serialized_body() {
        let (tx, mut rx) = oneshot::channel();
        let slot = ResponseSlot::new(SlotId(0), 4, Box::new(tx));
        slot.send(stanza::body(), "text/xml; charset=utf-8")
            .expect("receiver alive");
        let written = rx.try_recv().expect("body written");
        assert_eq!(written.content_type, "text/xml; charset=utf-8");
        assert_eq!(
            written.payload,
            Bytes::from(r#"<body xmlns="http://jabber.org/protocol/httpbind"/>"#)
        );
    }

    #[test]
    fn send_returns_body_when_client_gone() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        let slot = ResponseSlot::new(SlotId(0), 4, Box::new(tx));
        let returned = slot.send(stanza::body().with_attr("stream", "s"), "text/xml");
        assert_eq!(returned.err().and_then(|b| b.attr("stream").map(str::to_owned)), Some("s".into()));
    }

    #[test]
    fn arm_and_cancel_manage_timer() {
        let mut scheduler = ManualScheduler::new();
        let (tx, _rx) = oneshot::channel();
        let mut slot = ResponseSlot::new(SlotId(1), 9, Box::new(tx));
        let event = TimerEvent::SlotWait {
            sid: SessionId::from("s"),
            slot: slot.id(),
        };
        slot.arm(&mut scheduler, Duration::from_secs(60), event);
        assert!(slot.is_armed());
        assert_eq!(scheduler.armed(), 1);
        slot.cancel(&mut scheduler);
        assert!(!slot.is_armed());
        assert_eq!(scheduler.armed(), 0);
    }

    #[test]
    fn tune_reaches_sink() {
        let seen = Arc::new(Mutex::new(None));
        let mut slot = ResponseSlot::new(SlotId(2), 1, Box::new(TuningProbe(Arc::clone(&seen))));
        let tuning = SocketTuning {
            timeout: Duration::from_secs(70),
            keepalive: Duration::from_secs(60),
        };
        slot.tune(&tuning);
        assert_eq!(*seen.lock().expect("lock"), Some(tuning));
    }
}
