#![doc(html_root_url = "https://docs.rs/bosh_engine/latest")]
//! Public API for the `bosh_engine` library.
//!
//! This crate implements the session layer of a BOSH (XEP-0124/XEP-0206)
//! connection manager: session negotiation, RID ordering, held response
//! slots, acknowledgements and recovery, multi-stream sessions and
//! termination. HTTP handling and the upstream XMPP connection are left to
//! the embedding application, which talks to the engine through
//! [`ResponseSink`]s, [`ConnectorEvent`]s and [`ConnectorCommand`]s.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod slot;
pub mod stanza;
pub mod stream;
pub mod test_helpers;
pub mod timer;
pub mod xml;

pub use config::{BoshConfig, BoshConfigBuilder};
pub use engine::{BoshEngine, BoshStats};
pub use error::{BoshError, Condition, ConfigError, XmlError};
pub use event::{ConnectorCommand, ConnectorEvent};
pub use metrics::{BODIES_PROCESSED, Direction, ERRORS_TOTAL, SESSIONS_ACTIVE, STREAMS_ACTIVE};
pub use registry::{SessionRegistry, StreamRegistry};
pub use server::{BoshHandle, BoshServer, ServerClosed};
pub use session::{Session, SessionId};
pub use slot::{OutgoingBody, ResponseSink, SocketTuning};
pub use stream::{Stream, StreamInfo, StreamName};
pub use timer::{DelayQueueScheduler, ManualScheduler, Scheduler, TimerEvent};
pub use xml::Element;
