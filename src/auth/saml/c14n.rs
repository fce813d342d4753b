// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! XML canonicalization for signature checks.
//!
//! Supports Exclusive XML Canonicalization 1.0 (with an
//! `InclusiveNamespaces` prefix list) and Canonical XML 1.0, both without
//! comments. The output covers one element subtree, optionally leaving out
//! a descendant (the enveloped signature).

use std::collections::BTreeMap;

use roxmltree::{Document, Node, NodeId};

pub const EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const INCLUSIVE: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Canonicalization flavour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// Exclusive C14N; listed prefixes are treated inclusively (`#default`
    /// names the default namespace)
    Exclusive { inclusive_prefixes: Vec<String> },
    /// Canonical XML 1.0
    Inclusive,
}

impl Method {
    /// Method for an algorithm URI, `None` for unsupported ones.
    pub fn from_uri(uri: &str, inclusive_prefixes: Vec<String>) -> Option<Self> {
        match uri {
            EXCLUSIVE => Some(Method::Exclusive { inclusive_prefixes }),
            INCLUSIVE => Some(Method::Inclusive),
            _ => None,
        }
    }
}

/// Canonical form of the subtree rooted at `node`, skipping `omit`.
pub fn canonicalize(doc: &Document<'_>, node: Node<'_, '_>, method: &Method, omit: Option<NodeId>) -> String {
    let mut writer = Writer {
        input: doc.input_text(),
        method,
        omit,
        out: String::new(),
    };
    writer.element(node, &BTreeMap::new());
    writer.out
}

struct Writer<'m, 'i> {
    input: &'i str,
    method: &'m Method,
    omit: Option<NodeId>,
    out: String,
}

impl Writer<'_, '_> {
    fn element(&mut self, node: Node<'_, '_>, rendered: &BTreeMap<String, String>) {
        let prefix = element_prefix(self.input, node);
        let qname = match &prefix {
            Some(p) => format!("{p}:{}", node.tag_name().name()),
            None => node.tag_name().name().to_string(),
        };

        let declarations = self.namespace_declarations(node, prefix.as_deref(), rendered);
        let mut scope = rendered.clone();
        for (p, uri) in &declarations {
            scope.insert(p.clone(), uri.clone());
        }

        self.out.push('<');
        self.out.push_str(&qname);
        for (p, uri) in &declarations {
            if p.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(p);
                self.out.push_str("=\"");
            }
            escape_attribute(&mut self.out, uri);
            self.out.push('"');
        }

        let mut attributes: Vec<(String, String, String, String)> = node
            .attributes()
            .map(|a| {
                let ns = a.namespace().unwrap_or("").to_string();
                let name = match a.namespace().and_then(|uri| attribute_prefix(node, uri)) {
                    Some(p) => format!("{p}:{}", a.name()),
                    None => a.name().to_string(),
                };
                (ns, a.name().to_string(), name, a.value().to_string())
            })
            .collect();
        attributes.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        for (_, _, name, value) in attributes {
            self.out.push(' ');
            self.out.push_str(&name);
            self.out.push_str("=\"");
            escape_attribute(&mut self.out, &value);
            self.out.push('"');
        }
        self.out.push('>');

        for child in node.children() {
            if Some(child.id()) == self.omit {
                continue;
            }
            if child.is_element() {
                self.element(child, &scope);
            } else if child.is_text() {
                escape_text(&mut self.out, child.text().unwrap_or(""));
            } else if let Some(pi) = child.pi() {
                self.out.push_str("<?");
                self.out.push_str(pi.target);
                if let Some(value) = pi.value {
                    self.out.push(' ');
                    self.out.push_str(value);
                }
                self.out.push_str("?>");
            }
        }

        self.out.push_str("</");
        self.out.push_str(&qname);
        self.out.push('>');
    }

    /// Namespace declarations to emit on `node`, sorted by prefix.
    ///
    /// A declaration is emitted when the nearest output ancestor did not
    /// already render the same binding.
    fn namespace_declarations(
        &self,
        node: Node<'_, '_>,
        prefix: Option<&str>,
        rendered: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let in_scope: BTreeMap<String, String> = node
            .namespaces()
            .filter(|ns| ns.name() != Some("xml"))
            .map(|ns| (ns.name().unwrap_or("").to_string(), ns.uri().to_string()))
            .collect();

        let candidates: Vec<String> = match self.method {
            Method::Inclusive => {
                let mut all: Vec<String> = in_scope.keys().cloned().collect();
                if !in_scope.contains_key("") {
                    all.push(String::new());
                }
                all
            }
            Method::Exclusive { inclusive_prefixes } => {
                let mut used = vec![prefix.unwrap_or("").to_string()];
                used.extend(
                    node.attributes()
                        .filter_map(|a| a.namespace())
                        .filter_map(|uri| attribute_prefix(node, uri))
                        .filter(|p| p != "xml"),
                );
                used.extend(inclusive_prefixes.iter().map(|p| {
                    if p == "#default" {
                        String::new()
                    } else {
                        p.clone()
                    }
                }));
                used
            }
        };

        let mut out = BTreeMap::new();
        for p in candidates {
            let uri = in_scope.get(&p).cloned().unwrap_or_default();
            let current = rendered.get(&p);
            let emit = if uri.is_empty() {
                // Only the default namespace can be undeclared, and only
                // when an ancestor put a non-empty one in force.
                p.is_empty() && current.is_some_and(|c| !c.is_empty())
            } else {
                current != Some(&uri)
            };
            if emit {
                out.insert(p, uri);
            }
        }
        out
    }
}

/// Prefix as written in the source start tag.
fn element_prefix(input: &str, node: Node<'_, '_>) -> Option<String> {
    let rest = input.get(node.range().start + 1..)?;
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(rest.len());
    rest[..end].split_once(':').map(|(p, _)| p.to_string())
}

fn attribute_prefix(node: Node<'_, '_>, uri: &str) -> Option<String> {
    if uri == XML_NS {
        return Some("xml".to_string());
    }
    node.lookup_prefix(uri).map(str::to_string)
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exclusive() -> Method {
        Method::Exclusive {
            inclusive_prefixes: Vec::new(),
        }
    }

    fn c14n(xml: &str, path: &[&str], method: &Method) -> String {
        let doc = Document::parse(xml).unwrap();
        let mut node = doc.root_element();
        for name in path {
            node = node
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == *name)
                .unwrap();
        }
        canonicalize(&doc, node, method, None)
    }

    #[test]
    fn exclusive_drops_unused_namespaces_and_sorts_attributes() {
        let xml = r#"<a:Root xmlns:a="urn:a" xmlns:b="urn:b" xmlns:c="urn:c"><a:Child z="1" b:y="2" a="3"/></a:Root>"#;
        assert_eq!(
            c14n(xml, &["Child"], &exclusive()),
            r#"<a:Child xmlns:a="urn:a" xmlns:b="urn:b" a="3" z="1" b:y="2"></a:Child>"#
        );
    }

    #[test]
    fn exclusive_does_not_repeat_rendered_namespaces() {
        let xml = r#"<p:Outer xmlns:p="urn:p"><p:Inner>t</p:Inner></p:Outer>"#;
        assert_eq!(
            c14n(xml, &[], &exclusive()),
            r#"<p:Outer xmlns:p="urn:p"><p:Inner>t</p:Inner></p:Outer>"#
        );
    }

    #[test]
    fn inclusive_prefix_list_is_honoured() {
        let xml = r#"<a:Root xmlns:a="urn:a" xmlns:xs="urn:xs"><a:Child>v</a:Child></a:Root>"#;
        let method = Method::Exclusive {
            inclusive_prefixes: vec!["xs".to_string()],
        };
        assert_eq!(
            c14n(xml, &["Child"], &method),
            r#"<a:Child xmlns:a="urn:a" xmlns:xs="urn:xs">v</a:Child>"#
        );
    }

    #[test]
    fn inclusive_renders_every_namespace_in_scope() {
        let xml = r#"<a:Root xmlns:a="urn:a" xmlns:b="urn:b"><a:Child/></a:Root>"#;
        assert_eq!(
            c14n(xml, &["Child"], &Method::Inclusive),
            r#"<a:Child xmlns:a="urn:a" xmlns:b="urn:b"></a:Child>"#
        );
    }

    #[test]
    fn default_namespace_and_escaping() {
        let xml = "<Root xmlns=\"urn:d\"><V k=\"a&amp;&quot;b\">x &lt; y &amp; z<!-- gone --></V></Root>";
        assert_eq!(
            c14n(xml, &["V"], &exclusive()),
            "<V xmlns=\"urn:d\" k=\"a&amp;&quot;b\">x &lt; y &amp; z</V>"
        );
    }

    #[test]
    fn omitted_node_is_skipped() {
        let xml = r#"<r:Root xmlns:r="urn:r"><r:Keep/><r:Drop/></r:Root>"#;
        let doc = Document::parse(xml).unwrap();
        let root = doc.root_element();
        let drop = root
            .children()
            .find(|n| n.tag_name().name() == "Drop")
            .unwrap();
        assert_eq!(
            canonicalize(&doc, root, &exclusive(), Some(drop.id())),
            r#"<r:Root xmlns:r="urn:r"><r:Keep></r:Keep></r:Root>"#
        );
    }

    /// Canonical forms below were produced by `xmllint --exc-c14n`.
    const SIGNED_RESPONSE: &str = include_str!("../../testdata/signed-response.xml");
    const ASSERTION_C14N: &str = include_str!("../../testdata/assertion.exc-c14n.xml");
    const SIGNED_INFO_C14N: &str = include_str!("../../testdata/signed-info.exc-c14n.xml");

    fn find<'a, 'i>(doc: &'a Document<'i>, name: &str) -> Node<'a, 'i> {
        doc.descendants()
            .find(|n| n.is_element() && n.tag_name().name() == name)
            .unwrap()
    }

    #[test]
    fn enveloped_assertion_matches_libxml2() {
        let doc = Document::parse(SIGNED_RESPONSE).unwrap();
        let assertion = find(&doc, "Assertion");
        let signature = find(&doc, "Signature");

        let canonical = canonicalize(&doc, assertion, &exclusive(), Some(signature.id()));
        assert_eq!(canonical, ASSERTION_C14N);
    }

    #[test]
    fn signed_info_matches_libxml2() {
        let doc = Document::parse(SIGNED_RESPONSE).unwrap();
        let signed_info = find(&doc, "SignedInfo");

        assert_eq!(
            canonicalize(&doc, signed_info, &exclusive(), None),
            SIGNED_INFO_C14N
        );
    }
}
