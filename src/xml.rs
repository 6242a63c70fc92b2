//! Minimal XML tree used for `<body>` wrappers and the stanzas they carry.
//!
//! Attributes are held in a sorted map so two elements with the same
//! attribute set compare equal regardless of the order the attributes were
//! written in. Qualified names (`xmpp:version`) are kept verbatim; use
//! [`Element::ns_attr`] to resolve a prefixed attribute by namespace.

use std::{collections::BTreeMap, fmt};

use quick_xml::{Reader, events::Event};

use crate::error::XmlError;

/// A child of an [`Element`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// A nested element.
    Element(Element),
    /// Character data.
    Text(String),
}

/// An XML element with its attributes and children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    name: String,
    attrs: BTreeMap<String, String>,
    children: Vec<Node>,
}

impl Element {
    /// Create an element with no attributes or children.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder-style child append.
    #[must_use]
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Builder-style text append.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Qualified name of the element.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Look up an attribute by its qualified name.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&str> { self.attrs.get(key).map(String::as_str) }

    /// Look up an attribute and parse it as an unsigned integer.
    #[must_use]
    pub fn attr_u64(&self, key: &str) -> Option<u64> { self.attr(key)?.trim().parse().ok() }

    /// Look up an attribute and parse it as a signed integer.
    #[must_use]
    pub fn attr_i64(&self, key: &str) -> Option<i64> { self.attr(key)?.trim().parse().ok() }

    /// Whether the attribute is present.
    #[must_use]
    pub fn has_attr(&self, key: &str) -> bool { self.attrs.contains_key(key) }

    /// Resolve a prefixed attribute by namespace URI and local name.
    ///
    /// The prefix must be declared on this element through an
    /// `xmlns:prefix` attribute.
    #[must_use]
    pub fn ns_attr(&self, namespace: &str, local: &str) -> Option<&str> {
        self.attrs.iter().find_map(|(key, value)| {
            let prefix = key.strip_prefix("xmlns:")?;
            if value != namespace {
                return None;
            }
            self.attr(&format!("{prefix}:{local}"))
        })
    }

    /// All attributes in key order.
    #[must_use]
    pub fn attrs(&self) -> &BTreeMap<String, String> { &self.attrs }

    /// Number of attributes on the element.
    #[must_use]
    pub fn attr_count(&self) -> usize { self.attrs.len() }

    /// Set or replace an attribute.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl ToString) {
        self.attrs.insert(key.into(), value.to_string());
    }

    /// Remove an attribute, returning its previous value.
    pub fn remove_attr(&mut self, key: &str) -> Option<String> { self.attrs.remove(key) }

    /// Child nodes in document order.
    #[must_use]
    pub fn children(&self) -> &[Node] { &self.children }

    /// Child elements in document order, skipping text.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// Consume the element and return its child elements.
    #[must_use]
    pub fn into_child_elements(self) -> Vec<Element> {
        self.children
            .into_iter()
            .filter_map(|node| match node {
                Node::Element(element) => Some(element),
                Node::Text(_) => None,
            })
            .collect()
    }

    /// Append a child element.
    pub fn push_child(&mut self, child: Element) { self.children.push(Node::Element(child)); }

    /// Move every child of `other` to the end of this element's children.
    pub fn append_children(&mut self, other: Element) { self.children.extend(other.children); }

    /// Whether the element has no children.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.children.is_empty() }
}

fn escape_into(f: &mut fmt::Formatter<'_>, raw: &str, attribute: bool) -> fmt::Result {
    for ch in raw.chars() {
        match ch {
            '&' => f.write_str("&amp;")?,
            '<' => f.write_str("&lt;")?,
            '>' => f.write_str("&gt;")?,
            '"' if attribute => f.write_str("&quot;")?,
            '\'' if attribute => f.write_str("&apos;")?,
            other => fmt::Write::write_char(f, other)?,
        }
    }
    Ok(())
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for (key, value) in &self.attrs {
            write!(f, " {key}=\"")?;
            escape_into(f, value, true)?;
            f.write_str("\"")?;
        }
        if self.children.is_empty() {
            return f.write_str("/>");
        }
        f.write_str(">")?;
        for child in &self.children {
            match child {
                Node::Element(element) => write!(f, "{element}")?,
                Node::Text(text) => escape_into(f, text, false)?,
            }
        }
        write!(f, "</{}>", self.name)
    }
}

fn start_element(start: &quick_xml::events::BytesStart<'_>) -> Result<Element, XmlError> {
    let mut element = Element::new(std::str::from_utf8(start.name().as_ref())?);
    for attribute in start.attributes() {
        let attribute = attribute?;
        let key = std::str::from_utf8(attribute.key.as_ref())?;
        let value = attribute.unescape_value()?;
        element.set_attr(key, value);
    }
    Ok(element)
}

fn attach(stack: &mut [Element], roots: &mut Vec<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.push_child(element),
        None => roots.push(element),
    }
}

/// Parse a request payload and return its single `<body>` element.
///
/// Leading and trailing whitespace between elements is discarded. Document
/// type declarations are rejected outright so entity expansion cannot be
/// abused.
///
/// # Errors
///
/// Returns [`XmlError`] if the payload is not UTF-8, is malformed, declares
/// a DOCTYPE, or does not consist of exactly one `<body>` element.
pub fn parse_body(payload: &[u8]) -> Result<Element, XmlError> {
    let text = std::str::from_utf8(payload)?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut roots: Vec<Element> = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(start_element(&start)?),
            Event::Empty(start) => {
                let element = start_element(&start)?;
                attach(&mut stack, &mut roots, element);
            }
            Event::End(_) => {
                let element = stack.pop().ok_or(XmlError::UnexpectedEof)?;
                attach(&mut stack, &mut roots, element);
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(text.unescape()?.into_owned()));
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(Node::Text(std::str::from_utf8(&data)?.to_owned()));
                }
            }
            Event::DocType(_) => return Err(XmlError::DocType),
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(XmlError::UnexpectedEof);
    }
    match roots.len() {
        1 => {
            let root = roots.remove(0);
            if root.name() == "body" {
                Ok(root)
            } else {
                Err(XmlError::NotABody(format!("<{}>", root.name())))
            }
        }
        n => Err(XmlError::NotABody(format!("{n} root elements"))),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn parses_body_with_nested_children() {
        let body = parse_body(
            br#"<body rid="7" sid="abc" xmlns="http://jabber.org/protocol/httpbind">
                 <message to="a@b"><body>hi &amp; bye</body></message>
                 <presence/>
               </body>"#,
        )
        .expect("valid body");
        assert_eq!(body.attr_u64("rid"), Some(7));
        assert_eq!(body.attr("sid"), Some("abc"));
        let children: Vec<_> = body.child_elements().map(Element::name).collect();
        assert_eq!(children, ["message", "presence"]);
        let message = body.child_elements().next().expect("message");
        let inner = message.child_elements().next().expect("inner body");
        assert_eq!(inner.children(), [Node::Text("hi & bye".into())]);
    }

    #[rstest]
    #[case::not_xml(b"not xml at all".as_slice())]
    #[case::wrong_root(b"<iq/>".as_slice())]
    #[case::two_roots(b"<body/><body/>".as_slice())]
    #[case::unclosed(b"<body><message></body>".as_slice())]
    #[case::doctype(b"<!DOCTYPE body [<!ENTITY a 'aaaa'>]><body/>".as_slice())]
    fn rejects_unusable_payloads(#[case] payload: &[u8]) {
        assert!(parse_body(payload).is_err());
    }

    #[test]
    fn resolves_prefixed_attributes_by_namespace() {
        let body = parse_body(br#"<body xmlns:x="urn:xmpp:xbosh" x:version="1.0"/>"#)
            .expect("valid body");
        assert_eq!(body.ns_attr("urn:xmpp:xbosh", "version"), Some("1.0"));
        assert_eq!(body.ns_attr("urn:other", "version"), None);
    }

    #[test]
    fn serializes_with_escaping() {
        let element = Element::new("message")
            .with_attr("to", "a\"b")
            .with_child(Element::new("body").with_text("1 < 2"));
        assert_eq!(
            element.to_string(),
            r#"<message to="a&quot;b"><body>1 &lt; 2</body></message>"#
        );
    }

    #[test]
    fn attribute_sets_compare_independent_of_order() {
        let a = Element::new("body").with_attr("a", 1).with_attr("b", 2);
        let b = Element::new("body").with_attr("b", 2).with_attr("a", 1);
        assert_eq!(a.attrs(), b.attrs());
    }
}
