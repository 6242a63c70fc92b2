//! Pending responses and flushing.

use tracing::{debug, trace};

use super::{PendingEntry, Session, UnackedEntry};
use crate::{
    event::Turn,
    metrics::{self, Direction},
    slot::ResponseSlot,
    stream::StreamName,
    xml::Element,
};

impl Session {
    /// Queue a response for `stream` and schedule a flush.
    ///
    /// A response whose outer attributes equal those of a queued response
    /// for the same stream is merged into it.
    pub(crate) fn enqueue(&mut self, stanza: Element, stream: StreamName, turn: &mut Turn<'_>) {
        let mergeable = self
            .pending
            .iter_mut()
            .find(|entry| entry.stream == stream && entry.stanza.attrs() == stanza.attrs());
        match mergeable {
            Some(entry) => {
                trace!(sid = %self.sid, stream = %stream, "merging pending response");
                entry.stanza.append_children(stanza);
            }
            None => self.pending.push_back(PendingEntry { stanza, stream }),
        }
        self.schedule_flush(turn);
    }

    pub(crate) fn schedule_flush(&mut self, turn: &mut Turn<'_>) {
        if !self.flush_scheduled {
            self.flush_scheduled = true;
            turn.defer_flush(self.sid.clone());
        }
    }

    /// Run a flush queued by [`Session::schedule_flush`].
    pub(crate) fn run_scheduled_flush(&mut self, turn: &mut Turn<'_>) -> usize {
        self.flush_scheduled = false;
        self.flush(turn)
    }

    /// Pair pending responses with held slots, oldest first on both sides.
    ///
    /// A response whose write fails goes to the back of the queue.
    pub(crate) fn flush(&mut self, turn: &mut Turn<'_>) -> usize {
        let mut sent = 0;
        while !self.slots.is_empty() && !self.pending.is_empty() {
            let (Some(slot), Some(entry)) = (self.take_slot(turn), self.pending.pop_front())
            else {
                break;
            };
            match self.send_stanza(slot, entry.stanza, turn) {
                Ok(()) => sent += 1,
                Err(stanza) => {
                    debug!(sid = %self.sid, stream = %entry.stream, "client gone, requeueing");
                    self.pending.push_back(PendingEntry {
                        stanza,
                        stream: entry.stream,
                    });
                }
            }
        }
        sent
    }

    /// Write `stanza` on `slot` without requeueing it on failure.
    pub(crate) fn send_no_requeue(
        &mut self,
        slot: ResponseSlot,
        stanza: Element,
        turn: &mut Turn<'_>,
    ) {
        let rid = slot.rid();
        if self.send_stanza(slot, stanza, turn).is_err() {
            debug!(sid = %self.sid, rid, "client gone, dropping response");
        }
    }

    /// Stamp, record and write a response.
    ///
    /// When acknowledgements are enabled and the slot answers an older RID,
    /// the body carries `ack` set to the current RID and is kept until the
    /// client acknowledges it. A failed write undoes both.
    fn send_stanza(
        &mut self,
        slot: ResponseSlot,
        mut stanza: Element,
        turn: &mut Turn<'_>,
    ) -> Result<(), Element> {
        let rid = slot.rid();
        if self.ack {
            if rid < self.rid {
                stanza.set_attr("ack", self.rid);
            }
            self.unacked.insert(
                rid,
                UnackedEntry {
                    rid,
                    stanza: stanza.clone(),
                    sent_at: turn.now(),
                },
            );
        }
        match slot.send(stanza, &self.content) {
            Ok(()) => {
                self.max_rid_sent = self.max_rid_sent.max(rid);
                metrics::inc_bodies(Direction::Outbound);
                trace!(sid = %self.sid, rid, "response written");
                Ok(())
            }
            Err(mut stanza) => {
                if self.ack {
                    self.unacked.remove(&rid);
                    stanza.remove_attr("ack");
                }
                Err(stanza)
            }
        }
    }
}
