//! XML utility functions for navigating and extracting data from DOM trees.
//!
//! SEFAZ services disagree on whether children inherit the default
//! namespace, so every lookup here matches on local name and treats the
//! namespace as a preference rather than a requirement.

use roxmltree::Node;

/// Predicate over element names: a local name plus an optional namespace.
///
/// # Examples
/// ```
/// use roxmltree::Document;
/// use consulta_cadastro::xml::ElementMatch;
///
/// let xml = r#"<a:root xmlns:a="urn:a"/>"#;
/// let doc = Document::parse(xml).unwrap();
/// let root = doc.root_element();
///
/// assert!(ElementMatch::local("root").matches(root));
/// assert!(ElementMatch::qualified("root", "urn:a").matches(root));
/// assert!(!ElementMatch::qualified("root", "urn:b").matches(root));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementMatch<'m> {
    local_name: &'m str,
    namespace: Option<&'m str>,
}

impl<'m> ElementMatch<'m> {
    /// Match on local name only, in any namespace.
    #[must_use]
    pub fn local(local_name: &'m str) -> Self {
        Self {
            local_name,
            namespace: None,
        }
    }

    /// Match on local name within one namespace.
    #[must_use]
    pub fn qualified(local_name: &'m str, namespace: &'m str) -> Self {
        Self {
            local_name,
            namespace: Some(namespace),
        }
    }

    /// `true` if `node` is an element this predicate accepts.
    #[must_use]
    pub fn matches(&self, node: Node<'_, '_>) -> bool {
        node.is_element()
            && node.tag_name().name() == self.local_name
            && self
                .namespace
                .map_or(true, |ns| node.tag_name().namespace() == Some(ns))
    }
}

/// Get the tag name without namespace prefix.
///
/// # Examples
/// ```
/// use roxmltree::Document;
/// use consulta_cadastro::xml::get_tag_name;
///
/// let xml = r#"<soap:Body xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"/>"#;
/// let doc = Document::parse(xml).unwrap();
/// assert_eq!(get_tag_name(doc.root_element()), "Body");
/// ```
pub fn get_tag_name<'a>(node: Node<'a, '_>) -> &'a str {
    node.tag_name().name()
}

/// Find the first element matching `pattern`, starting with `node` itself and
/// then its descendants in document order.
///
/// This is the single search primitive behind every namespace-tolerant
/// lookup in the crate.
///
/// # Examples
/// ```
/// use roxmltree::Document;
/// use consulta_cadastro::xml::{find_element, ElementMatch};
///
/// let xml = r#"<a><b><infCons xmlns="urn:x"/></b></a>"#;
/// let doc = Document::parse(xml).unwrap();
///
/// assert!(find_element(doc.root_element(), ElementMatch::local("infCons")).is_some());
/// assert!(find_element(doc.root_element(), ElementMatch::local("infCad")).is_none());
/// ```
pub fn find_element<'a, 'input>(
    node: Node<'a, 'input>,
    pattern: ElementMatch<'_>,
) -> Option<Node<'a, 'input>> {
    node.descendants().find(|n| pattern.matches(*n))
}

/// Find the first direct child element matching `pattern`.
pub fn find_child_matching<'a, 'input>(
    node: Node<'a, 'input>,
    pattern: ElementMatch<'_>,
) -> Option<Node<'a, 'input>> {
    node.children().find(|child| pattern.matches(*child))
}

/// Find the first child element with the given local name, in any namespace.
///
/// # Examples
/// ```
/// use roxmltree::Document;
/// use consulta_cadastro::xml::find_child;
///
/// let xml = r#"<root><child1/><child2/></root>"#;
/// let doc = Document::parse(xml).unwrap();
/// let root = doc.root_element();
///
/// assert!(find_child(root, "child1").is_some());
/// assert!(find_child(root, "missing").is_none());
/// ```
pub fn find_child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    find_child_matching(node, ElementMatch::local(tag))
}

/// Find all child elements with the given local name, in document order.
///
/// # Examples
/// ```
/// use roxmltree::Document;
/// use consulta_cadastro::xml::find_children;
///
/// let xml = r#"<root><item>1</item><item>2</item><other/></root>"#;
/// let doc = Document::parse(xml).unwrap();
///
/// assert_eq!(find_children(doc.root_element(), "item").count(), 2);
/// ```
pub fn find_children<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |child| ElementMatch::local(tag).matches(*child))
}

/// `true` if the element is in no namespace.
///
/// roxmltree reports an element undeclared with `xmlns=""` as `Some("")`
/// rather than `None`; both count as unqualified.
///
/// # Examples
/// ```
/// use roxmltree::Document;
/// use consulta_cadastro::xml::is_unqualified;
///
/// let doc = Document::parse(r#"<a xmlns="urn:a"><b xmlns=""/><c/></a>"#).unwrap();
/// let mut children = doc.root_element().children();
/// assert!(is_unqualified(children.next().unwrap()));
/// assert!(!is_unqualified(children.next().unwrap()));
/// ```
#[must_use]
pub fn is_unqualified(node: Node<'_, '_>) -> bool {
    node.tag_name().namespace().map_or(true, str::is_empty)
}

/// Find a child element by local name, preferring the namespace it is most
/// likely meant to have.
///
/// Lookup order:
/// 1. an unqualified child (no namespace),
/// 2. a child in the parent's own namespace,
/// 3. a child in any namespace.
pub fn find_child_tolerant<'a, 'input>(
    parent: Node<'a, 'input>,
    tag: &str,
) -> Option<Node<'a, 'input>> {
    parent
        .children()
        .find(|child| {
            child.is_element() && get_tag_name(*child) == tag && is_unqualified(*child)
        })
        .or_else(|| {
            parent
                .tag_name()
                .namespace()
                .filter(|ns| !ns.is_empty())
                .and_then(|ns| find_child_matching(parent, ElementMatch::qualified(tag, ns)))
        })
        .or_else(|| find_child(parent, tag))
}

/// Trimmed text of a child element found with [`find_child_tolerant`].
///
/// Returns `None` when the child is missing or its text is blank.
///
/// # Examples
/// ```
/// use roxmltree::Document;
/// use consulta_cadastro::xml::child_text;
///
/// let xml = r#"<infCad xmlns="http://www.portalfiscal.inf.br/nfe"><IE> 123 </IE><xFant/></infCad>"#;
/// let doc = Document::parse(xml).unwrap();
/// let node = doc.root_element();
///
/// assert_eq!(child_text(node, "IE"), Some("123".to_string()));
/// assert_eq!(child_text(node, "xFant"), None);
/// assert_eq!(child_text(node, "CNPJ"), None);
/// ```
pub fn child_text(parent: Node<'_, '_>, tag: &str) -> Option<String> {
    find_child_tolerant(parent, tag)
        .map(get_text)
        .filter(|s| !s.is_empty())
}

/// Get the text content of a node, trimmed.
///
/// # Returns
/// Trimmed text content, or empty string if no text
pub fn get_text(node: Node<'_, '_>) -> String {
    node.text()
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Get all element children of a node.
pub fn element_children<'a, 'input>(
    node: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|child| child.is_element())
}

/// `true` if `xml` parses as a well-formed document.
#[must_use]
pub fn is_well_formed(xml: &str) -> bool {
    roxmltree::Document::parse(xml).is_ok()
}
