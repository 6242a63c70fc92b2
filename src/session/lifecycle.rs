//! Inactivity and termination.

use std::time::Duration;

use tracing::debug;

use super::{Session, SessionId, SessionState};
use crate::{
    error::Condition,
    event::Turn,
    stanza,
    timer::TimerEvent,
    xml::Element,
};

/// Grace added to the negotiated inactivity before the session expires.
const INACTIVITY_MARGIN: Duration = Duration::from_secs(10);

/// Sent by [`Session::terminate`] so the registry can archive the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionTerminated {
    /// Session that ended.
    pub sid: SessionId,
    /// Condition reported to the client, if any.
    pub condition: Option<Condition>,
    /// Negotiated wait, used to size the archive grace period.
    pub wait: u64,
}

impl Session {
    /// Re-arm the inactivity timer to `inactivity + 10` seconds from now.
    pub(crate) fn reset_inactivity(&mut self, turn: &mut Turn<'_>) {
        self.cancel_inactivity(turn);
        let after = Duration::from_secs(self.inactivity) + INACTIVITY_MARGIN;
        self.inactivity_timer = Some(
            turn.scheduler
                .schedule(after, TimerEvent::Inactivity(self.sid.clone())),
        );
    }

    pub(crate) fn cancel_inactivity(&mut self, turn: &mut Turn<'_>) {
        if let Some(key) = self.inactivity_timer.take() {
            turn.scheduler.cancel(key);
        }
    }

    /// Forget the inactivity timer after it fired.
    pub(crate) fn inactivity_fired(&mut self) { self.inactivity_timer = None; }

    /// Stanzas queued or awaiting acknowledgement that will never reach the
    /// client.
    pub(crate) fn take_orphans(&mut self) -> Vec<Element> {
        let pending = self.pending.drain(..).map(|entry| entry.stanza);
        let unacked = std::mem::take(&mut self.unacked)
            .into_values()
            .map(|entry| entry.stanza);
        pending.chain(unacked).collect()
    }

    /// Answer the oldest held slot with a terminate body.
    pub(crate) fn send_terminate_response(
        &mut self,
        condition: Option<&Condition>,
        turn: &mut Turn<'_>,
    ) {
        if let Some(slot) = self.take_slot(turn) {
            self.send_no_requeue(slot, stanza::terminate(condition), turn);
        }
    }

    /// End the session.
    ///
    /// Every remaining slot is answered with an empty body and all timers
    /// are cancelled. The returned value must be handed to the session
    /// registry.
    pub(crate) fn terminate(
        &mut self,
        condition: Option<Condition>,
        turn: &mut Turn<'_>,
    ) -> SessionTerminated {
        if !self.streams.is_empty() {
            debug!(sid = %self.sid, streams = self.streams.len(), "terminating session with open streams");
        }
        while let Some(slot) = self.take_slot(turn) {
            self.send_no_requeue(slot, stanza::body(), turn);
        }
        debug_assert!(self.slots.is_empty(), "terminated session still holds slots");
        self.cancel_inactivity(turn);
        self.pending.clear();
        self.out_of_order.clear();
        self.state = SessionState::Terminated;
        SessionTerminated {
            sid: self.sid.clone(),
            condition,
            wait: self.wait,
        }
    }
}
