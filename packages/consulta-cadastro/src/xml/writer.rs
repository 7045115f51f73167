//! Compact XML serialization.
//!
//! Everything sent to or extracted from a SEFAZ service passes through here,
//! so output is deterministic: no declaration, no inter-element whitespace,
//! whitespace runs inside text collapsed to one space.

use std::borrow::Cow;
use std::fmt;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use roxmltree::{Document, Node};

use crate::error::ParseError;

/// A serialized XML document.
///
/// Holding one does not guarantee well-formedness; [`XmlDocument::parse`]
/// is where that is checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XmlDocument(String);

impl XmlDocument {
    pub fn new(xml: impl Into<String>) -> Self {
        Self(xml.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Parse into a DOM tree.
    ///
    /// # Errors
    /// `ParseError::Malformed` carrying the whole document as payload.
    pub fn parse(&self) -> Result<Document<'_>, ParseError> {
        Document::parse(&self.0).map_err(|e| ParseError::malformed(&e, &self.0))
    }

    /// Indented rendering for diagnostics. Not for the wire.
    ///
    /// # Examples
    /// ```
    /// use consulta_cadastro::xml::XmlDocument;
    ///
    /// let doc = XmlDocument::new("<a><b>x</b></a>");
    /// assert_eq!(doc.pretty().unwrap(), "<a>\n  <b>x</b>\n</a>");
    /// ```
    pub fn pretty(&self) -> Result<String, ParseError> {
        let doc = self.parse()?;
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        copy_element(&mut writer, doc.root_element(), &[])?;
        into_string(writer)
    }
}

impl fmt::Display for XmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for XmlDocument {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Streaming builder for compact documents.
pub struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlWriter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Writer::new(Vec::new()),
        }
    }

    /// Emit `<?xml version="1.0" encoding="UTF-8"?>`.
    pub fn declaration(&mut self) -> Result<&mut Self, ParseError> {
        write(
            &mut self.inner,
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;
        Ok(self)
    }

    /// Open an element with the given attributes (namespace declarations
    /// included, as `("xmlns:p", uri)`).
    pub fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<&mut Self, ParseError> {
        let mut start = BytesStart::new(name);
        for attribute in attributes {
            start.push_attribute(*attribute);
        }
        write(&mut self.inner, Event::Start(start))?;
        Ok(self)
    }

    pub fn end(&mut self, name: &str) -> Result<&mut Self, ParseError> {
        write(&mut self.inner, Event::End(BytesEnd::new(name)))?;
        Ok(self)
    }

    /// `<name/>`
    pub fn empty(&mut self, name: &str) -> Result<&mut Self, ParseError> {
        write(&mut self.inner, Event::Empty(BytesStart::new(name)))?;
        Ok(self)
    }

    /// `<name>text</name>`, with the text escaped and collapsed.
    pub fn text_element(&mut self, name: &str, text: &str) -> Result<&mut Self, ParseError> {
        self.start(name, &[])?;
        let collapsed = collapse_whitespace(text);
        if !collapsed.is_empty() {
            write(&mut self.inner, Event::Text(BytesText::new(&collapsed)))?;
        }
        self.end(name)
    }

    /// Copy an element subtree from a parsed document, re-declaring the
    /// namespaces it needs.
    pub fn copy(&mut self, node: Node<'_, '_>) -> Result<&mut Self, ParseError> {
        copy_element(&mut self.inner, node, &[])?;
        Ok(self)
    }

    pub fn finish(self) -> Result<XmlDocument, ParseError> {
        into_string(self.inner).map(XmlDocument)
    }
}

/// Re-serialize `node` and its subtree as a standalone compact document.
pub fn serialize_subtree(node: Node<'_, '_>) -> Result<XmlDocument, ParseError> {
    let mut writer = XmlWriter::new();
    writer.copy(node)?;
    writer.finish()
}

/// Replace each run of whitespace with a single space and trim the ends.
///
/// # Examples
/// ```
/// use consulta_cadastro::xml::collapse_whitespace;
///
/// assert_eq!(collapse_whitespace("  RUA  DAS\n\tFLORES "), "RUA DAS FLORES");
/// ```
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// A namespace binding in scope while copying: (prefix, uri), `None` prefix
/// being the default namespace.
type Binding<'a> = (Option<&'a str>, &'a str);

fn bound_uri<'a>(scope: &[Binding<'a>], prefix: Option<&str>) -> Option<&'a str> {
    scope
        .iter()
        .rev()
        .find(|(p, _)| *p == prefix)
        .map(|(_, uri)| *uri)
}

fn qualified_name(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(p) => format!("{p}:{local}"),
        None => local.to_string(),
    }
}

fn prefix_for<'a>(node: Node<'a, '_>, uri: &str, allow_default: bool) -> Option<Option<&'a str>> {
    node.namespaces()
        .filter(|ns| ns.name() != Some("xml") && (allow_default || ns.name().is_some()))
        .find(|ns| ns.uri() == uri)
        .map(|ns| ns.name())
}

fn copy_element<'a>(
    writer: &mut Writer<Vec<u8>>,
    node: Node<'a, '_>,
    scope: &[Binding<'a>],
) -> Result<(), ParseError> {
    let mut in_scope: Vec<Binding<'a>> = scope.to_vec();
    let mut declared: Vec<Binding<'a>> = Vec::new();
    let mut require = |binding: Binding<'a>, in_scope: &mut Vec<Binding<'a>>| {
        if bound_uri(in_scope, binding.0) != Some(binding.1) {
            declared.push(binding);
            in_scope.push(binding);
        }
    };

    let prefix = match node.tag_name().namespace().filter(|uri| !uri.is_empty()) {
        Some(uri) => {
            let prefix = prefix_for(node, uri, true).flatten();
            require((prefix, uri), &mut in_scope);
            prefix
        }
        None => {
            // Unqualified element under a default namespace needs an undeclaration.
            if bound_uri(&in_scope, None).is_some_and(|uri| !uri.is_empty()) {
                require((None, ""), &mut in_scope);
            }
            None
        }
    };

    let mut attributes = Vec::new();
    for attribute in node.attributes() {
        let attr_prefix = attribute.namespace().and_then(|uri| {
            if uri == XML_NAMESPACE {
                return Some(("xml", uri));
            }
            prefix_for(node, uri, false).flatten().map(|p| (p, uri))
        });
        if let Some((p, uri)) = attr_prefix.filter(|(p, _)| *p != "xml") {
            require((Some(p), uri), &mut in_scope);
        }
        attributes.push((
            qualified_name(attr_prefix.map(|(p, _)| p), attribute.name()),
            attribute.value(),
        ));
    }

    let name = qualified_name(prefix, node.tag_name().name());
    let mut start = BytesStart::new(name.as_str());
    for (ns_prefix, uri) in &declared {
        let key = match ns_prefix {
            Some(p) => Cow::Owned(format!("xmlns:{p}")),
            None => Cow::Borrowed("xmlns"),
        };
        start.push_attribute((key.as_ref(), *uri));
    }
    for (key, value) in &attributes {
        start.push_attribute((key.as_str(), *value));
    }

    let has_content = node
        .children()
        .any(|child| child.is_element() || child.text().is_some_and(|t| !t.trim().is_empty()));
    if !has_content {
        return write(writer, Event::Empty(start));
    }

    write(writer, Event::Start(start))?;
    for child in node.children() {
        if child.is_element() {
            copy_element(writer, child, &in_scope)?;
        } else if child.is_text() {
            let collapsed = collapse_whitespace(child.text().unwrap_or_default());
            if !collapsed.is_empty() {
                write(writer, Event::Text(BytesText::new(&collapsed)))?;
            }
        }
    }
    write(writer, Event::End(BytesEnd::new(name.as_str())))
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), ParseError> {
    writer
        .write_event(event)
        .map_err(|e| ParseError::Write(e.to_string()))
}

fn into_string(writer: Writer<Vec<u8>>) -> Result<String, ParseError> {
    String::from_utf8(writer.into_inner()).map_err(|e| ParseError::Write(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{find_element, is_unqualified, ElementMatch};

    #[test]
    fn test_writer_builds_compact_document() {
        let mut writer = XmlWriter::new();
        writer
            .start("root", &[("xmlns", "urn:x"), ("v", "1")])
            .unwrap()
            .text_element("a", " one   two ")
            .unwrap()
            .empty("b")
            .unwrap()
            .end("root")
            .unwrap();
        let doc = writer.finish().unwrap();
        assert_eq!(
            doc.as_str(),
            r#"<root xmlns="urn:x" v="1"><a>one two</a><b/></root>"#
        );
    }

    #[test]
    fn test_text_is_escaped() {
        let mut writer = XmlWriter::new();
        writer.text_element("x", "a < b & c").unwrap();
        assert_eq!(writer.finish().unwrap().as_str(), "<x>a &lt; b &amp; c</x>");
    }

    #[test]
    fn test_copy_strips_formatting() {
        let source = XmlDocument::new("<a>\n  <b>  x  </b>\n  <c/>\n</a>");
        let doc = source.parse().unwrap();
        let copy = serialize_subtree(doc.root_element()).unwrap();
        assert_eq!(copy.as_str(), "<a><b>x</b><c/></a>");
    }

    #[test]
    fn test_copy_redeclares_inherited_namespaces() {
        let source = XmlDocument::new(
            r#"<s:Envelope xmlns:s="urn:s"><s:Body><ret xmlns="urn:nfe" versao="2.00"><inf><n>1</n></inf></ret></s:Body></s:Envelope>"#,
        );
        let doc = source.parse().unwrap();
        let ret = find_element(doc.root_element(), ElementMatch::local("ret")).unwrap();
        let copy = serialize_subtree(ret).unwrap();

        // Only the bindings the subtree uses are declared.
        assert_eq!(
            copy.as_str(),
            r#"<ret xmlns="urn:nfe" versao="2.00"><inf><n>1</n></inf></ret>"#
        );
        let reparsed = copy.parse().unwrap();
        let n = find_element(reparsed.root_element(), ElementMatch::qualified("n", "urn:nfe"));
        assert!(n.is_some());
    }

    #[test]
    fn test_copy_keeps_prefixes() {
        let source = XmlDocument::new(r#"<p:a xmlns:p="urn:p"><p:b/></p:a>"#);
        let doc = source.parse().unwrap();
        let copy = serialize_subtree(doc.root_element()).unwrap();
        assert_eq!(copy.as_str(), r#"<p:a xmlns:p="urn:p"><p:b/></p:a>"#);
    }

    #[test]
    fn test_copy_undeclares_default_namespace() {
        let source = XmlDocument::new(r#"<a xmlns="urn:a"><b xmlns=""/></a>"#);
        let doc = source.parse().unwrap();
        let copy = serialize_subtree(doc.root_element()).unwrap();
        let reparsed = copy.parse().unwrap();
        assert_eq!(copy.as_str(), r#"<a xmlns="urn:a"><b xmlns=""/></a>"#);
        let b = find_element(reparsed.root_element(), ElementMatch::local("b")).unwrap();
        assert!(is_unqualified(b));
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let source = XmlDocument::new(r#"<a x="1" y="2"><b>t</b></a>"#);
        let doc = source.parse().unwrap();
        let first = serialize_subtree(doc.root_element()).unwrap();
        let second = serialize_subtree(first.parse().unwrap().root_element()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_error_keeps_payload() {
        let err = XmlDocument::new("<a><b></a>").parse().unwrap_err();
        assert_eq!(err.payload(), Some("<a><b></a>"));
    }

    #[test]
    fn test_pretty() {
        let doc = XmlDocument::new("<a><b>x</b><c/></a>");
        assert_eq!(doc.pretty().unwrap(), "<a>\n  <b>x</b>\n  <c/>\n</a>");
    }
}
