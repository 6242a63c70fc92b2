//! Utilities for driving a [`BoshEngine`](bosh_engine::BoshEngine) in tests.
//!
//! [`Harness`] runs the engine on a virtual clock and hands back a
//! [`Reply`] for every request, so tests can check which requests were
//! answered and with what.
//!
//! ```rust
//! use bosh_testing::{Harness, RequestBuilder};
//!
//! let mut harness = Harness::default();
//! let created = harness.create_session(1);
//! let mut reply = harness.send(RequestBuilder::session(&created.sid, 2).build());
//! assert!(reply.is_held());
//! ```

pub mod engine_harness;
pub mod logging;
pub mod macros;
pub mod request;

pub use engine_harness::{Created, Harness, Reply, harness};
pub use logging::{LoggerHandle, logger};
pub use request::RequestBuilder;

/// Result type for fallible tests.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
