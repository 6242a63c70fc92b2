//! Builders and classifiers for `<body>` wrapper elements.

use std::fmt;

use crate::{error::Condition, xml::Element};

/// Namespace of the `<body>` wrapper element.
pub const BOSH_XMLNS: &str = "http://jabber.org/protocol/httpbind";
/// Namespace of the XMPP-over-BOSH attribute extensions.
pub const XBOSH_XMLNS: &str = "urn:xmpp:xbosh";
/// Protocol version advertised in session creation responses.
pub const BOSH_VERSION: &str = "1.6";

/// Build an empty `<body/>` in the BOSH namespace.
#[must_use]
pub fn body() -> Element { Element::new("body").with_attr("xmlns", BOSH_XMLNS) }

/// Build a `type="terminate"` body carrying an optional condition.
#[must_use]
pub fn terminate(condition: Option<&Condition>) -> Element {
    let element = body().with_attr("type", "terminate");
    match condition {
        Some(condition) => element.with_attr("condition", condition),
        None => element,
    }
}

/// Whether the request opens a new session.
///
/// Requires `to`, `wait` and `hold`, no `sid`, and an `xmpp:version`
/// attribute in the [`XBOSH_XMLNS`] namespace.
#[must_use]
pub fn is_session_creation(request: &Element) -> bool {
    request.has_attr("to")
        && request.has_attr("wait")
        && request.has_attr("hold")
        && !request.has_attr("sid")
        && request.ns_attr(XBOSH_XMLNS, "version").is_some()
}

/// Whether the request asks to open an additional stream on a session.
#[must_use]
pub fn is_stream_add(request: &Element) -> bool {
    request.has_attr("to")
        && request.has_attr("sid")
        && request.has_attr("rid")
        && !request.has_attr("ver")
        && !request.has_attr("hold")
        && !request.has_attr("wait")
}

/// Whether the request terminates one stream or the whole session.
#[must_use]
pub fn is_stream_terminate(request: &Element) -> bool {
    request.has_attr("sid") && request.has_attr("rid") && request.attr("type") == Some("terminate")
}

/// Whether the request restarts its stream after SASL negotiation.
#[must_use]
pub fn is_stream_restart(request: &Element) -> bool {
    request.ns_attr(XBOSH_XMLNS, "restart") == Some("true")
}

/// Upstream endpoint requested through the `route` attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    /// Protocol prefix, usually `xmpp`.
    pub protocol: String,
    /// Host name to connect to.
    pub host: String,
    /// Port to connect to.
    pub port: u16,
}

impl Route {
    /// Parse a route of the form `protocol:host:port`.
    ///
    /// Returns `None` if any part is missing, contains whitespace, or the
    /// port is not numeric.
    #[must_use]
    pub fn parse(route: &str) -> Option<Self> {
        let (rest, port) = route.rsplit_once(':')?;
        let (protocol, host) = rest.split_once(':')?;
        let valid = |part: &str| !part.is_empty() && !part.contains(char::is_whitespace);
        if !valid(protocol) || !valid(host) {
            return None;
        }
        Some(Self {
            protocol: protocol.to_owned(),
            host: host.to_owned(),
            port: port.parse().ok()?,
        })
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.protocol, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn creation() -> Element {
        body()
            .with_attr("rid", 1)
            .with_attr("to", "example.com")
            .with_attr("wait", 60)
            .with_attr("hold", 1)
            .with_attr("xmlns:xmpp", XBOSH_XMLNS)
            .with_attr("xmpp:version", "1.0")
    }

    #[test]
    fn terminate_body_carries_condition() {
        let element = terminate(Some(&Condition::PolicyViolation));
        assert_eq!(element.attr("type"), Some("terminate"));
        assert_eq!(element.attr("condition"), Some("policy-violation"));
        assert_eq!(element.attr("xmlns"), Some(BOSH_XMLNS));
        assert!(!terminate(None).has_attr("condition"));
    }

    #[test]
    fn classifies_session_creation() {
        assert!(is_session_creation(&creation()));
        assert!(!is_session_creation(&creation().with_attr("sid", "x")));
        let mut no_version = creation();
        no_version.remove_attr("xmpp:version");
        assert!(!is_session_creation(&no_version));
    }

    #[test]
    fn classifies_stream_requests() {
        let add = body()
            .with_attr("sid", "s")
            .with_attr("rid", 2)
            .with_attr("to", "other.example");
        assert!(is_stream_add(&add));
        assert!(!is_stream_add(&add.clone().with_attr("wait", 60)));

        let end = body()
            .with_attr("sid", "s")
            .with_attr("rid", 3)
            .with_attr("type", "terminate");
        assert!(is_stream_terminate(&end));

        let restart = body()
            .with_attr("xmlns:xmpp", XBOSH_XMLNS)
            .with_attr("xmpp:restart", "true");
        assert!(is_stream_restart(&restart));
    }

    #[rstest]
    #[case("xmpp:example.com:5222", Some(("xmpp", "example.com", 5222)))]
    #[case("xmpp:example.com", None)]
    #[case("xmpp:example.com:port", None)]
    #[case("xmpp::5222", None)]
    fn parses_routes(#[case] raw: &str, #[case] expected: Option<(&str, &str, u16)>) {
        let parsed = Route::parse(raw);
        let expected = expected.map(|(protocol, host, port)| Route {
            protocol: protocol.into(),
            host: host.into(),
            port,
        });
        assert_eq!(parsed, expected);
        if let Some(route) = parsed {
            assert_eq!(route.to_string(), raw);
        }
    }
}
