//! Holding and releasing response slots.

use std::time::Duration;

use tracing::{debug, warn};

use super::Session;
use crate::{
    error::{BoshError, Condition},
    event::Turn,
    slot::{ResponseSink, ResponseSlot, SocketTuning},
    stanza,
    timer::{SlotId, TimerEvent},
};

/// Extra socket timeout granted beyond `wait`.
const SOCKET_TIMEOUT_MARGIN: Duration = Duration::from_millis(10);

impl Session {
    /// Hold the response for request `rid` until data is available or
    /// `wait` elapses.
    ///
    /// Slots are kept ordered by RID. If pending responses exist a flush is
    /// scheduled for the end of the turn.
    ///
    /// # Errors
    ///
    /// Returns [`BoshError::ConnectionLimit`] when the session already holds
    /// more slots than `max_connections`. The new slot is then answered
    /// with a `policy-violation` terminate body.
    pub(crate) fn hold_response(
        &mut self,
        rid: u64,
        sink: Box<dyn ResponseSink>,
        turn: &mut Turn<'_>,
    ) -> Result<(), BoshError> {
        let id = self.next_slot_id();
        let mut slot = ResponseSlot::new(id, rid, sink);
        if self.slots.len() > self.max_connections {
            warn!(
                sid = %self.sid,
                held = self.slots.len(),
                max = self.max_connections,
                "connection limit exceeded"
            );
            self.send_no_requeue(
                slot,
                stanza::terminate(Some(&Condition::PolicyViolation)),
                turn,
            );
            return Err(BoshError::ConnectionLimit(self.sid.clone()));
        }

        slot.tune(&SocketTuning {
            timeout: Duration::from_secs(self.wait) + SOCKET_TIMEOUT_MARGIN,
            keepalive: self.keepalive,
        });
        slot.arm(
            turn.scheduler,
            Duration::from_secs(self.wait),
            TimerEvent::SlotWait {
                sid: self.sid.clone(),
                slot: id,
            },
        );
        let position = self.slots.partition_point(|held| held.rid() <= rid);
        self.slots.insert(position, slot);
        debug!(sid = %self.sid, rid, held = self.slots.len(), "holding response");

        if !self.pending.is_empty() {
            self.schedule_flush(turn);
        }
        Ok(())
    }

    /// Answer the oldest slots with empty bodies until at most `hold` remain.
    pub(crate) fn release_excess_slots(&mut self, turn: &mut Turn<'_>) {
        while self.slots.len() > self.hold {
            let Some(slot) = self.take_slot(turn) else {
                break;
            };
            self.send_no_requeue(slot, stanza::body(), turn);
        }
    }

    /// Remove the oldest held slot and cancel its wait timer.
    pub(crate) fn take_slot(&mut self, turn: &mut Turn<'_>) -> Option<ResponseSlot> {
        if self.slots.is_empty() {
            return None;
        }
        let mut slot = self.slots.remove(0);
        slot.cancel(turn.scheduler);
        Some(slot)
    }

    /// Answer a slot whose wait elapsed with an empty body.
    pub(crate) fn on_slot_timeout(&mut self, id: SlotId, turn: &mut Turn<'_>) {
        let Some(position) = self.slots.iter().position(|slot| slot.id() == id) else {
            return;
        };
        let mut slot = self.slots.remove(position);
        slot.cancel(turn.scheduler);
        debug!(sid = %self.sid, rid = slot.rid(), "wait elapsed");
        self.send_no_requeue(slot, stanza::body(), turn);
    }
}
