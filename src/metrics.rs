//! Metric helpers for `bosh_engine`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. Without the
//! `metrics` feature every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::registry::RegistryKind;

/// Name of the gauge tracking live sessions.
pub const SESSIONS_ACTIVE: &str = "bosh_sessions_active";
/// Name of the gauge tracking live streams.
pub const STREAMS_ACTIVE: &str = "bosh_streams_active";
/// Name of the counter tracking processed bodies.
pub const BODIES_PROCESSED: &str = "bosh_bodies_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "bosh_errors_total";

/// Direction of body processing.
#[derive(Clone, Copy)]
pub enum Direction {
    /// Requests received from a client.
    Inbound,
    /// Responses written to a client.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "used by metric labels"))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

#[cfg(feature = "metrics")]
fn active_gauge(kind: RegistryKind) -> &'static str {
    match kind {
        RegistryKind::Session => SESSIONS_ACTIVE,
        RegistryKind::Stream => STREAMS_ACTIVE,
    }
}

/// Increment the live gauge for `kind`.
pub fn inc_active(kind: RegistryKind) {
    #[cfg(feature = "metrics")]
    gauge!(active_gauge(kind)).increment(1.0);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Decrement the live gauge for `kind`.
pub fn dec_active(kind: RegistryKind) {
    #[cfg(feature = "metrics")]
    gauge!(active_gauge(kind)).decrement(1.0);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record a processed body for the given direction.
pub fn inc_bodies(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(BODIES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record an error occurrence.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}
