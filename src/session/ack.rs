//! Acknowledgements, reports and broken-connection recovery.

use std::mem;

use tracing::{debug, warn};

use super::Session;
use crate::{
    event::{ConnectorEvent, Turn},
    stanza,
    xml::Element,
};

/// Unacked responses tolerated per unit of window before acknowledgements
/// are switched off.
const UNACKED_PER_WINDOW: u64 = 4;

/// What to do with the request that carried an acknowledgement.
#[derive(Clone, Debug, PartialEq)]
pub enum Recovery {
    /// Continue normal processing. `terminate` asks for the whole session to
    /// be ended because a request fell too far behind to be recovered.
    Proceed {
        /// End the session with `item-not-found`.
        terminate: bool,
    },
    /// Answer the request immediately with the response originally sent for
    /// its RID.
    Resend(Element),
    /// Answer the request immediately with an empty body.
    Empty,
}

impl Session {
    /// Retire acknowledged responses, report a missed response and detect
    /// requests that repeat an already answered RID.
    pub(crate) fn handle_acknowledgements(
        &mut self,
        packet: &Element,
        turn: &mut Turn<'_>,
    ) -> Recovery {
        if !self.ack {
            return Recovery::Proceed { terminate: false };
        }
        let limit = self.window.saturating_mul(UNACKED_PER_WINDOW);
        if self.unacked.len() as u64 > limit {
            warn!(
                sid = %self.sid,
                unacked = self.unacked.len(),
                limit,
                "client not acknowledging, disabling acks"
            );
            self.ack = false;
            self.unacked.clear();
            self.drop_stale_requests();
            return Recovery::Proceed { terminate: false };
        }

        let ack = packet
            .attr_u64("ack")
            .unwrap_or_else(|| self.rid.saturating_sub(1));
        self.retire_acknowledged(ack, turn);
        let recovery = self.recover_stale_requests();
        if matches!(recovery, Recovery::Proceed { .. }) {
            self.report_missed(ack, turn);
        }
        recovery
    }

    fn retire_acknowledged(&mut self, ack: u64, turn: &mut Turn<'_>) {
        let retained = self.unacked.split_off(&(ack.saturating_add(1)));
        let retired = mem::replace(&mut self.unacked, retained);
        for entry in retired.into_values() {
            turn.emit(ConnectorEvent::ResponseAcknowledged {
                sid: self.sid.clone(),
                entry,
            });
        }
    }

    fn report_missed(&mut self, ack: u64, turn: &mut Turn<'_>) {
        if ack >= self.max_rid_sent {
            return;
        }
        let missed = ack + 1;
        let Some(entry) = self.unacked.get(&missed) else {
            return;
        };
        let elapsed = turn.now().saturating_duration_since(entry.sent_at);
        let Some(stream) = self.streams.first().cloned() else {
            return;
        };
        debug!(sid = %self.sid, missed, "reporting missed response");
        let report = stanza::body()
            .with_attr("report", missed)
            .with_attr("time", elapsed.as_millis());
        self.enqueue(report, stream, turn);
    }

    fn recover_stale_requests(&mut self) -> Recovery {
        let mut terminate = false;
        for rid in self.drop_stale_requests() {
            if let Some(entry) = self.unacked.get(&rid) {
                debug!(sid = %self.sid, rid, "resending response for repeated request");
                return Recovery::Resend(entry.stanza.clone());
            }
            if rid.saturating_add(self.window).saturating_add(2) >= self.rid {
                debug!(sid = %self.sid, rid, "answering repeated request with empty body");
                return Recovery::Empty;
            }
            warn!(sid = %self.sid, rid, current = self.rid, "repeated request too old");
            terminate = true;
        }
        Recovery::Proceed { terminate }
    }

    /// Remove buffered requests at or below the current RID.
    fn drop_stale_requests(&mut self) -> Vec<u64> {
        let ahead = self.out_of_order.split_off(&(self.rid + 1));
        let stale = mem::replace(&mut self.out_of_order, ahead);
        stale.into_keys().collect()
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tokio::time::Instant;

    use super::*;
    use crate::{
        config::BoshConfig,
        event::ConnectorEvent,
        session::UnackedEntry,
        stream::Stream,
        timer::ManualScheduler,
    };

    struct Fixture {
        session: Session,
        scheduler: ManualScheduler,
        events: Vec<ConnectorEvent>,
        deferred: Vec<crate::session::SessionId>,
    }

    impl Fixture {
        fn run<T>(&mut self, f: impl FnOnce(&mut Session, &mut Turn<'_>) -> T) -> T {
            let mut turn = Turn::new(&mut self.scheduler, &mut self.events, &mut self.deferred);
            f(&mut self.session, &mut turn)
        }

        fn record(&mut self, rid: u64) {
            let entry = UnackedEntry {
                rid,
                stanza: stanza::body().with_attr("n", rid),
                sent_at: Instant::now(),
            };
            self.session.unacked.insert(rid, entry);
            self.session.max_rid_sent = self.session.max_rid_sent.max(rid);
        }

        fn request(&self, rid: u64) -> Element {
            stanza::body()
                .with_attr("sid", self.session.sid())
                .with_attr("rid", rid)
        }
    }

    #[fixture]
    fn acked() -> Fixture {
        let creation = stanza::body()
            .with_attr("rid", 10)
            .with_attr("to", "example.com")
            .with_attr("wait", 30)
            .with_attr("hold", 1)
            .with_attr("ack", 1);
        let mut session = Session::new(&creation, &BoshConfig::default()).expect("valid");
        Stream::new(&mut session, &creation);
        Fixture {
            session,
            scheduler: ManualScheduler::new(),
            events: Vec::new(),
            deferred: Vec::new(),
        }
    }

    #[rstest]
    fn acknowledgement_retires_older_responses(mut acked: Fixture) {
        acked.record(9);
        acked.record(10);
        let packet = acked.request(11).with_attr("ack", 9);
        acked.session.admit_packets(packet.clone());
        let outcome = acked.run(|session, turn| session.handle_acknowledgements(&packet, turn));

        assert_eq!(outcome, Recovery::Proceed { terminate: false });
        assert_eq!(acked.session.unacked_rids(), vec![10]);
        assert!(matches!(
            acked.events.as_slice(),
            [ConnectorEvent::ResponseAcknowledged { entry, .. }] if entry.rid == 9
        ));
        // ack 9 trails max sent 10 and 10 is unacked, so a report is queued
        assert_eq!(acked.session.pending_len(), 1);
    }

    #[rstest]
    fn missing_ack_defaults_to_previous_rid(mut acked: Fixture) {
        acked.record(10);
        let packet = acked.request(11);
        acked.session.admit_packets(packet.clone());
        acked.run(|session, turn| session.handle_acknowledgements(&packet, turn));
        assert!(acked.session.unacked_rids().is_empty());
        assert_eq!(acked.session.pending_len(), 0);
    }

    #[rstest]
    fn repeated_rid_is_answered_from_unacked(mut acked: Fixture) {
        acked.record(10);
        let packet = acked.request(10).with_attr("ack", 9);
        acked.session.admit_packets(packet.clone());
        let outcome = acked.run(|session, turn| session.handle_acknowledgements(&packet, turn));
        assert_eq!(outcome, Recovery::Resend(stanza::body().with_attr("n", 10)));
        assert!(acked.session.buffered_rids().is_empty());
        assert_eq!(acked.session.pending_len(), 0);
    }

    #[rstest]
    fn repeated_rid_without_record_gets_empty_body(mut acked: Fixture) {
        let packet = acked.request(10);
        acked.session.admit_packets(packet.clone());
        let outcome = acked.run(|session, turn| session.handle_acknowledgements(&packet, turn));
        assert_eq!(outcome, Recovery::Empty);
    }

    #[rstest]
    fn ancient_rid_forces_termination(mut acked: Fixture) {
        let packet = acked.request(3);
        acked.session.admit_packets(packet.clone());
        let outcome = acked.run(|session, turn| session.handle_acknowledgements(&packet, turn));
        assert_eq!(outcome, Recovery::Proceed { terminate: true });
    }

    #[rstest]
    fn backlog_disables_acknowledgements(mut acked: Fixture) {
        for rid in 1..=9 {
            acked.record(rid);
        }
        let packet = acked.request(11).with_attr("ack", 0);
        acked.session.admit_packets(packet.clone());
        let outcome = acked.run(|session, turn| session.handle_acknowledgements(&packet, turn));
        assert_eq!(outcome, Recovery::Proceed { terminate: false });
        assert!(!acked.session.ack_enabled());
        assert!(acked.session.unacked_rids().is_empty());
        assert!(acked.events.is_empty());
    }
}
