//! Canonical error types and terminal binding conditions.
//!
//! [`Condition`] names why a session or stream ended and is rendered into
//! the `condition` attribute of terminate bodies. [`BoshError`] is returned
//! by the engine entry points once the client has already been answered,
//! so transports can log or count failures without further action.

use std::{convert::Infallible, fmt, str::FromStr};

use thiserror::Error;

use crate::{session::SessionId, stream::StreamName};

/// Terminal binding conditions carried on `type="terminate"` bodies.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Condition {
    /// The request format or envelope was unacceptable.
    BadRequest,
    /// The target domain is no longer serviced.
    HostGone,
    /// The target domain is unknown.
    HostUnknown,
    /// The request omitted `to` or `route` where one was required.
    ImproperAddressing,
    /// The connection manager hit an internal failure.
    InternalServerError,
    /// The session id, stream name or RID is invalid.
    ItemNotFound,
    /// Another request on the session superseded this one.
    OtherRequest,
    /// The client broke a limit such as the connection count.
    PolicyViolation,
    /// The upstream server could not be reached.
    RemoteConnectionFailed,
    /// The upstream server reported a stream error.
    RemoteStreamError,
    /// The connection manager is shutting down.
    SystemShutdown,
    /// An unclassified error.
    UndefinedCondition,
    /// Any condition string supplied by the connector that is not listed above.
    Other(String),
}

impl Condition {
    /// Return the wire representation of the condition.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::BadRequest => "bad-request",
            Self::HostGone => "host-gone",
            Self::HostUnknown => "host-unknown",
            Self::ImproperAddressing => "improper-addressing",
            Self::InternalServerError => "internal-server-error",
            Self::ItemNotFound => "item-not-found",
            Self::OtherRequest => "other-request",
            Self::PolicyViolation => "policy-violation",
            Self::RemoteConnectionFailed => "remote-connection-failed",
            Self::RemoteStreamError => "remote-stream-error",
            Self::SystemShutdown => "system-shutdown",
            Self::UndefinedCondition => "undefined-condition",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Condition {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bad-request" => Self::BadRequest,
            "host-gone" => Self::HostGone,
            "host-unknown" => Self::HostUnknown,
            "improper-addressing" => Self::ImproperAddressing,
            "internal-server-error" => Self::InternalServerError,
            "item-not-found" => Self::ItemNotFound,
            "other-request" => Self::OtherRequest,
            "policy-violation" => Self::PolicyViolation,
            "remote-connection-failed" => Self::RemoteConnectionFailed,
            "remote-stream-error" => Self::RemoteStreamError,
            "system-shutdown" => Self::SystemShutdown,
            "undefined-condition" => Self::UndefinedCondition,
            other => Self::Other(other.to_owned()),
        })
    }
}

impl From<&str> for Condition {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(condition) => condition,
            Err(never) => match never {},
        }
    }
}

/// Errors raised while parsing or validating XML payloads.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum XmlError {
    /// The payload was not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// The XML reader rejected the payload.
    #[error("malformed XML: {0}")]
    Syntax(#[from] quick_xml::Error),
    /// An attribute could not be decoded.
    #[error("malformed attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    /// Document type declarations are refused to avoid entity expansion.
    #[error("document type declarations are not accepted")]
    DocType,
    /// The payload did not contain exactly one `<body>` element.
    #[error("expected a single <body> element, found {0}")]
    NotABody(String),
    /// The document ended before every element was closed.
    #[error("unexpected end of document")]
    UnexpectedEof,
}

/// Errors returned when building a [`crate::config::BoshConfig`].
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The RID window must admit at least one request either side.
    #[error("window must be at least 1")]
    ZeroWindow,
    /// At least one held connection is required per session.
    #[error("max_connections must be at least 1")]
    ZeroConnections,
    /// At least one stream is required per session.
    #[error("max_streams_per_session must be at least 1")]
    ZeroStreams,
    /// The request size limit must be positive.
    #[error("max_held_bytes must be greater than zero")]
    ZeroHeldBytes,
    /// The inactivity bounds are inverted.
    #[error("default inactivity {default}s exceeds maximum inactivity {max}s")]
    InactivityRange {
        /// Configured default inactivity in seconds.
        default: u64,
        /// Configured maximum inactivity in seconds.
        max: u64,
    },
}

/// Top-level error type for request and connector processing.
///
/// Every variant is reported after the engine has already written the
/// appropriate terminate body (or dropped the response sink).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BoshError {
    /// The request payload exceeded the configured byte limit.
    #[error("request of {len} bytes exceeds limit of {max} bytes")]
    RequestTooLarge {
        /// Size of the rejected payload.
        len: usize,
        /// Configured limit.
        max: usize,
    },
    /// The request payload could not be parsed.
    #[error("unparseable request: {0}")]
    Xml(#[from] XmlError),
    /// A session creation request carried unusable attributes.
    #[error("invalid session creation request: {0}")]
    InvalidCreation(&'static str),
    /// The request named a session that does not exist.
    #[error("unknown session {0:?}")]
    UnknownSession(Option<String>),
    /// The request named a stream that does not belong to the session.
    #[error("unknown stream {stream} on session {sid}")]
    UnknownStream {
        /// Session that received the request.
        sid: SessionId,
        /// Stream name the client supplied.
        stream: String,
    },
    /// The request failed RID window or attribute validation.
    #[error("invalid packet for session {sid}: {reason}")]
    InvalidPacket {
        /// Session that was terminated because of the packet.
        sid: SessionId,
        /// Which check failed.
        reason: &'static str,
    },
    /// The client held more connections than allowed.
    #[error("session {0} exceeded the connection limit")]
    ConnectionLimit(SessionId),
    /// The client opened more streams than allowed.
    #[error("session {0} exceeded the stream limit")]
    StreamLimit(SessionId),
    /// A connector command referenced a stream that no longer exists.
    #[error("connector referenced unknown stream {0}")]
    StreamGone(StreamName),
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("bad-request", Condition::BadRequest)]
    #[case("item-not-found", Condition::ItemNotFound)]
    #[case("policy-violation", Condition::PolicyViolation)]
    #[case("system-shutdown", Condition::SystemShutdown)]
    #[case("see-other-uri", Condition::Other("see-other-uri".into()))]
    fn condition_parses_wire_names(#[case] wire: &str, #[case] expected: Condition) {
        let parsed = Condition::from(wire);
        assert_eq!(parsed, expected);
        assert_eq!(parsed.to_string(), wire);
    }

    #[test]
    fn config_error_reports_both_bounds() {
        let err = ConfigError::InactivityRange {
            default: 200,
            max: 100,
        };
        assert_eq!(
            err.to_string(),
            "default inactivity 200s exceeds maximum inactivity 100s"
        );
    }
}
