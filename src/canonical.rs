//! Minimal canonical XML serialization for signed assertions.
//!
//! This is not a general XML library. It covers exactly the subset the
//! assertion format needs: elements built in code are written out in their
//! exclusive-canonicalization byte form, so the serialized bytes can be
//! digested and signed directly. Canonical-by-construction means there is no
//! separate canonicalization pass; the writer only ever produces canonical
//! output.
//!
//! Rules applied (from Exclusive XML Canonicalization, no comments):
//! - namespace declarations come before other attributes, each group in
//!   lexicographic order
//! - attribute values escape `&`, `<`, `"` and the whitespace characters
//!   tab/LF/CR as character references
//! - text content escapes `&`, `<`, `>` and CR
//! - empty elements are written as a start/end tag pair, never self-closed
//! - no comments, no processing instructions, no insignificant whitespace

/// An XML element assembled in memory and serialized canonically.
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    /// Creates an empty element with the given tag name.
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Adds an attribute. `xmlns` and `xmlns:*` attributes are treated as
    /// namespace declarations when the element is written.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    /// Appends a child element.
    pub fn child(mut self, element: Element) -> Self {
        self.children.push(Node::Element(element));
        self
    }

    /// Appends a text node.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Serializes the element to its canonical byte form.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        self.write(&mut out);
        out.into_bytes()
    }

    fn write(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);

        let (mut ns_decls, mut attrs): (Vec<_>, Vec<_>) = self
            .attrs
            .iter()
            .partition(|(name, _)| name == "xmlns" || name.starts_with("xmlns:"));
        ns_decls.sort_by(|a, b| a.0.cmp(&b.0));
        attrs.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, value) in ns_decls.into_iter().chain(attrs) {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            escape_attr(value, out);
            out.push('"');
        }
        out.push('>');

        for child in &self.children {
            match child {
                Node::Element(element) => element.write(out),
                Node::Text(text) => escape_text(text, out),
            }
        }

        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn escape_attr(value: &str, out: &mut String) {
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

fn escape_text(text: &str, out: &mut String) {
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
