//! Request validation and in-order release.

use tracing::{debug, trace};

use super::Session;
use crate::xml::Element;

/// Requests with more attributes than this are refused.
pub const MAX_BODY_ATTRIBUTES: usize = 20;

/// Largest RID a client may use (2^53 - 1).
pub const MAX_RID: u64 = (1 << 53) - 1;

impl Session {
    /// Check that `packet` belongs to this session and lies within the RID
    /// window.
    ///
    /// # Errors
    ///
    /// Returns a short reason naming the failed check.
    pub fn validate(&self, packet: &Element) -> Result<(), &'static str> {
        if packet.attr("sid") != Some(self.sid.as_str()) {
            return Err("missing or mismatched sid");
        }
        let rid = packet.attr_u64("rid").ok_or("missing or malformed rid")?;
        if rid > MAX_RID {
            return Err("rid out of range");
        }
        if rid.abs_diff(self.rid) > self.window {
            return Err("rid outside window");
        }
        if packet.attr_count() > MAX_BODY_ATTRIBUTES {
            return Err("too many attributes");
        }
        Ok(())
    }

    /// Buffer `packet` and release every request now contiguous with the
    /// current RID, in RID order.
    ///
    /// The result is empty while a hole remains. A RID at or below the
    /// current one is dropped unless acknowledgements are enabled, in which
    /// case it is kept for broken-connection recovery.
    pub fn admit_packets(&mut self, packet: Element) -> Vec<Element> {
        let Some(rid) = packet.attr_u64("rid") else {
            return Vec::new();
        };
        if rid <= self.rid && !self.ack {
            debug!(sid = %self.sid, rid, current = self.rid, "dropping duplicate request");
            return Vec::new();
        }
        self.out_of_order.insert(rid, packet);

        let mut released = Vec::new();
        while let Some(next) = self.out_of_order.remove(&(self.rid + 1)) {
            self.rid += 1;
            released.push(next);
        }
        trace!(
            sid = %self.sid,
            rid = self.rid,
            released = released.len(),
            buffered = self.out_of_order.len(),
            "admitted requests"
        );
        released
    }

    /// Like [`Session::admit_packets`] but return the stanzas carried by the
    /// released requests.
    pub fn admit(&mut self, packet: Element) -> Vec<Element> {
        self.admit_packets(packet)
            .into_iter()
            .flat_map(Element::into_child_elements)
            .collect()
    }

    /// RIDs buffered ahead of, or stale behind, the current RID.
    #[must_use]
    pub fn buffered_rids(&self) -> Vec<u64> { self.out_of_order.keys().copied().collect() }
}
