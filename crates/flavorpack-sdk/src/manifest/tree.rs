//! Explicit XML tree for manifest documents.
//!
//! `quick-xml` only tokenizes; the tree itself is plain data with indexed
//! child access. Names are kept as written (`prefix:local`) and split into a
//! [`QName`]; no namespace resolution happens implicitly.
//!
//! Everything that is not an element (text, comments, CDATA, declarations,
//! processing instructions) is kept verbatim, and so is the whitespace in
//! front of each attribute, line breaks included. An unmodified document
//! serializes back to the same text apart from attribute quoting (always
//! `"`), whitespace between the last attribute and the end of a start tag,
//! and the spelling of self-closing tags (always `<name />`).

use std::fs;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::types::PackError;

/// A qualified name: optional namespace prefix plus local part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    /// An unprefixed name.
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local: local.into(),
        }
    }

    /// A prefixed name, e.g. `android:name`.
    pub fn prefixed(prefix: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            local: local.into(),
        }
    }

    /// Splits `prefix:local` at the first colon.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((prefix, local)) => Self::prefixed(prefix, local),
            None => Self::local(raw),
        }
    }

    /// The name as written in the document.
    pub fn to_raw(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local),
            None => self.local.clone(),
        }
    }
}

/// An attribute with its unescaped value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
    /// Whitespace written before the attribute.
    pub leading: String,
}

/// A node in the document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Character data, still escaped.
    Text(String),
    CData(String),
    Comment(String),
    /// `<?xml ...?>` declaration content.
    Declaration(String),
    ProcessingInstruction(String),
    DocType(String),
}

impl Node {
    /// Returns the element if this node is one.
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Returns the element mutably if this node is one.
    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    fn is_whitespace(&self) -> bool {
        matches!(self, Node::Text(text) if text.trim().is_empty())
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Node::Element(element) => element.write_to(out),
            Node::Text(text) => out.push_str(text),
            Node::CData(text) => {
                out.push_str("<![CDATA[");
                out.push_str(text);
                out.push_str("]]>");
            }
            Node::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            Node::Declaration(text) | Node::ProcessingInstruction(text) => {
                out.push_str("<?");
                out.push_str(text);
                out.push_str("?>");
            }
            Node::DocType(text) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(text);
                out.push('>');
            }
        }
    }
}

/// An element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    /// Written as `<name/>` when it has no children.
    pub self_closing: bool,
}

impl Element {
    /// Creates an empty, self-closing element.
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
            self_closing: true,
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, name: QName, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Returns the value of attribute `name`.
    pub fn attribute(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| &attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    /// Sets attribute `name`, keeping its position if it already exists.
    ///
    /// A new attribute goes last, with the same leading whitespace as the
    /// attribute before it.
    pub fn set_attribute(&mut self, name: QName, value: impl Into<String>) {
        let value = value.into();
        if let Some(attr) = self.attributes.iter_mut().find(|attr| attr.name == name) {
            attr.value = value;
            return;
        }
        let leading = self
            .attributes
            .last()
            .map_or_else(|| " ".to_string(), |attr| attr.leading.clone());
        self.attributes.push(Attribute {
            name,
            value,
            leading,
        });
    }

    /// Direct child elements with `index` into [`Element::children`].
    pub fn child_elements(&self) -> impl Iterator<Item = (usize, &Element)> {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(index, node)| node.as_element().map(|element| (index, element)))
    }

    /// First direct child element with local name `local`.
    pub fn find_child(&self, local: &str) -> Option<&Element> {
        self.child_elements()
            .map(|(_, element)| element)
            .find(|element| element.name.local == local)
    }

    /// Index of the first direct child element with local name `local`.
    pub fn find_child_index(&self, local: &str) -> Option<usize> {
        self.child_elements()
            .find(|(_, element)| element.name.local == local)
            .map(|(index, _)| index)
    }

    /// Appends `element` as the last child element.
    ///
    /// When the existing children are indented, the new element gets the
    /// indentation of the last child element and goes before the trailing
    /// whitespace that precedes the closing tag.
    pub fn append_child_element(&mut self, element: Element) {
        self.self_closing = false;

        let indent = self
            .children
            .iter()
            .rposition(|node| node.as_element().is_some())
            .and_then(|last| last.checked_sub(1))
            .and_then(|before| match &self.children[before] {
                Node::Text(text) if text.trim().is_empty() => Some(text.clone()),
                _ => None,
            });

        let trailing_ws = self.children.last().is_some_and(Node::is_whitespace);
        match (indent, trailing_ws) {
            (Some(indent), true) => {
                let at = self.children.len() - 1;
                self.children.insert(at, Node::Element(element));
                self.children.insert(at, Node::Text(indent));
            }
            (Some(indent), false) => {
                self.children.push(Node::Text(indent));
                self.children.push(Node::Element(element));
            }
            (None, _) => self.children.push(Node::Element(element)),
        }
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name.to_raw());
        for attr in &self.attributes {
            out.push_str(&attr.leading);
            out.push_str(&attr.name.to_raw());
            out.push_str("=\"");
            out.push_str(&quick_xml::escape::escape(attr.value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() && self.self_closing {
            out.push_str(" />");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write_to(out);
        }
        out.push_str("</");
        out.push_str(&self.name.to_raw());
        out.push('>');
    }
}

/// A parsed XML document: prolog, root element, epilog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub prolog: Vec<Node>,
    pub root: Element,
    pub epilog: Vec<Node>,
}

impl Document {
    /// Parses an XML document.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::Manifest`] for malformed XML, mismatched tags, or
    /// a document without exactly one root element.
    pub fn parse(xml: &str) -> Result<Self, PackError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();
        let mut prolog = Vec::new();
        let mut root: Option<Element> = None;
        let mut epilog = Vec::new();

        loop {
            let event = reader.read_event().map_err(|e| {
                PackError::Manifest(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            })?;

            let node = match event {
                Event::Start(start) => {
                    let mut element = element_from_start(&start)?;
                    element.self_closing = false;
                    stack.push(element);
                    continue;
                }
                Event::Empty(start) => Node::Element(element_from_start(&start)?),
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        PackError::Manifest("closing tag without matching opening tag".to_string())
                    })?;
                    Node::Element(element)
                }
                Event::Text(text) => Node::Text(utf8(&text)?),
                Event::CData(text) => Node::CData(utf8(&text)?),
                Event::Comment(text) => Node::Comment(utf8(&text)?),
                Event::Decl(decl) => Node::Declaration(utf8(&decl)?),
                Event::PI(pi) => Node::ProcessingInstruction(utf8(&pi)?),
                Event::DocType(text) => Node::DocType(utf8(&text)?),
                Event::Eof => break,
            };

            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
                continue;
            }
            match node {
                Node::Element(element) => {
                    if root.is_some() {
                        return Err(PackError::Manifest(
                            "document has more than one root element".to_string(),
                        ));
                    }
                    root = Some(element);
                }
                other if root.is_none() => prolog.push(other),
                other => epilog.push(other),
            }
        }

        if let Some(open) = stack.last() {
            return Err(PackError::Manifest(format!(
                "element <{}> is never closed",
                open.name.to_raw()
            )));
        }
        let root = root
            .ok_or_else(|| PackError::Manifest("document has no root element".to_string()))?;

        Ok(Self {
            prolog,
            root,
            epilog,
        })
    }

    /// Reads and parses the document at `path`.
    pub fn load(path: &Path) -> Result<Self, PackError> {
        let xml = fs::read_to_string(path)?;
        Self::parse(&xml).map_err(|e| match e {
            PackError::Manifest(reason) => {
                PackError::Manifest(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })
    }

    /// Serializes the document to a UTF-8 string.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        for node in &self.prolog {
            node.write_to(&mut out);
        }
        self.root.write_to(&mut out);
        for node in &self.epilog {
            node.write_to(&mut out);
        }
        out
    }

    /// Writes the document to `path`, replacing its contents.
    pub fn save(&self, path: &Path) -> Result<(), PackError> {
        fs::write(path, self.to_xml())?;
        Ok(())
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, PackError> {
    let raw_name = utf8(start.name().as_ref())?;
    let mut element = Element::new(QName::parse(&raw_name));
    let raw_attributes = utf8(start.attributes_raw())?;
    let mut gaps = attribute_gaps(&raw_attributes).into_iter();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| PackError::Manifest(format!("malformed attribute: {}", e)))?;
        let raw_value = utf8(&attr.value)?;
        let value = quick_xml::escape::unescape(&raw_value)
            .map_err(|e| PackError::Manifest(format!("bad entity in attribute value: {}", e)))?
            .into_owned();
        let leading = gaps
            .next()
            .filter(|gap| !gap.is_empty())
            .unwrap_or_else(|| " ".to_string());
        element.attributes.push(Attribute {
            name: QName::parse(&utf8(attr.key.as_ref())?),
            value,
            leading,
        });
    }
    Ok(element)
}

/// Whitespace in front of each attribute of a raw start tag, after the name.
fn attribute_gaps(raw: &str) -> Vec<String> {
    let bytes = raw.as_bytes();
    let mut gaps = Vec::new();
    let mut i = 0;
    loop {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        gaps.push(raw[start..i].to_string());

        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'=' {
            i += 1;
        }
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            match bytes.get(i) {
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    i += 1;
                    while i < bytes.len() && bytes[i] != quote {
                        i += 1;
                    }
                    i += 1;
                }
                _ => {
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                        i += 1;
                    }
                }
            }
        }
    }
    gaps
}

fn utf8(bytes: &[u8]) -> Result<String, PackError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| PackError::Manifest(format!("manifest is not valid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<!-- app manifest -->
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.x">
    <application android:label="App">
        <meta-data android:name="A" android:value="1" />
    </application>
</manifest>
"#;

    #[test]
    fn test_roundtrip_is_verbatim() {
        let doc = Document::parse(SAMPLE).unwrap();
        assert_eq!(doc.to_xml(), SAMPLE);
    }

    #[test]
    fn test_prolog_and_epilog() {
        let doc = Document::parse(SAMPLE).unwrap();
        assert!(matches!(doc.prolog[0], Node::Declaration(ref d) if d.starts_with("xml")));
        assert!(doc.prolog.iter().any(|n| matches!(n, Node::Comment(_))));
        assert_eq!(doc.epilog, vec![Node::Text("\n".to_string())]);
    }

    #[test]
    fn test_qualified_names_are_split() {
        let doc = Document::parse(SAMPLE).unwrap();
        let app = doc.root.find_child("application").unwrap();
        assert_eq!(
            app.attribute(&QName::prefixed("android", "label")),
            Some("App")
        );
        assert_eq!(app.attribute(&QName::local("label")), None);
    }

    #[test]
    fn test_attribute_entities_roundtrip() {
        let xml = r#"<a v="x &amp; &quot;y&quot;" />"#;
        let doc = Document::parse(xml).unwrap();
        assert_eq!(doc.root.attribute(&QName::local("v")), Some("x & \"y\""));
        assert_eq!(doc.to_xml(), xml);
    }

    #[test]
    fn test_multiline_attributes_keep_their_layout() {
        let xml = "<manifest xmlns:android=\"http://schemas.android.com/apk/res/android\"\n    package=\"com.x\"\n    android:versionCode = '3'>\n</manifest>";
        let doc = Document::parse(xml).unwrap();
        assert_eq!(
            doc.to_xml(),
            "<manifest xmlns:android=\"http://schemas.android.com/apk/res/android\"\n    package=\"com.x\"\n    android:versionCode=\"3\">\n</manifest>"
        );
    }

    #[test]
    fn test_new_attribute_follows_previous_indentation() {
        let mut doc = Document::parse("<application\n    android:label=\"App\"\n    android:icon=\"@x\">\n</application>").unwrap();
        doc.root.set_attribute(QName::prefixed("android", "label"), "Shop");
        doc.root.set_attribute(QName::prefixed("android", "theme"), "@t");
        assert_eq!(
            doc.to_xml(),
            "<application\n    android:label=\"Shop\"\n    android:icon=\"@x\"\n    android:theme=\"@t\">\n</application>"
        );
    }

    #[test]
    fn test_open_close_pair_without_children_is_kept() {
        let xml = "<a><b></b></a>";
        let doc = Document::parse(xml).unwrap();
        assert_eq!(doc.to_xml(), xml);
    }

    #[test]
    fn test_append_uses_sibling_indentation() {
        let mut doc = Document::parse(SAMPLE).unwrap();
        let app_index = doc.root.find_child_index("application").unwrap();
        let app = doc.root.children[app_index].as_element_mut().unwrap();
        app.append_child_element(
            Element::new(QName::local("meta-data"))
                .with_attribute(QName::prefixed("android", "name"), "B"),
        );

        let xml = doc.to_xml();
        assert!(xml.contains(
            "<meta-data android:name=\"A\" android:value=\"1\" />\n        <meta-data android:name=\"B\" />\n    </application>"
        ));
    }

    #[test]
    fn test_append_to_empty_element() {
        let mut doc = Document::parse("<manifest><application/></manifest>").unwrap();
        let app = doc.root.children[0].as_element_mut().unwrap();
        app.append_child_element(Element::new(QName::local("meta-data")));
        assert_eq!(
            doc.to_xml(),
            "<manifest><application><meta-data /></application></manifest>"
        );
    }

    #[test]
    fn test_mismatched_tags_are_rejected() {
        assert!(Document::parse("<a><b></a>").is_err());
    }

    #[test]
    fn test_missing_root_is_rejected() {
        let err = Document::parse("<?xml version=\"1.0\"?>\n").unwrap_err();
        assert!(err.to_string().contains("no root element"));
    }
}
