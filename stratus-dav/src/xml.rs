use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use tokio::io::{AsyncBufRead, AsyncWrite};

use super::error::ParsingError;

// Constants
pub const DAV_URN: &str = "DAV:";
pub const XML_URN: &str = "http://www.w3.org/XML/1998/namespace";
const SEP: &str = "%%";

// Async traits
pub trait IWrite: AsyncWrite + Unpin + Send {}
impl<T: AsyncWrite + Unpin + Send> IWrite for T {}
pub trait IRead: AsyncBufRead + Unpin {}
impl<T: AsyncBufRead + Unpin> IRead for T {}

// Conversion between the canonical tree and typed values
pub trait QWrite {
    fn qwrite(&self) -> Element;
}
pub trait QRead: Sized {
    fn qread(xml: &Element) -> Result<Self, ParsingError>;
}

// ---------------

/// Build the canonical name of an element or an attribute.
///
/// Names in the `DAV:` namespace are kept bare, other namespaced names are
/// written `{uri}%%{local}`, names without namespace are written `%%{local}`.
/// Attributes of the reserved `xml` namespace keep their `xml:` prefix.
pub fn canonical(ns: Option<&str>, local: &str) -> String {
    match ns {
        Some(DAV_URN) => local.to_string(),
        Some(XML_URN) => format!("xml:{}", local),
        Some(uri) => format!("{}{}{}", uri, SEP, local),
        None => format!("{}{}", SEP, local),
    }
}

/// Split a canonical name into its namespace and its local part
pub fn split(name: &str) -> (Option<&str>, &str) {
    if let Some(local) = name.strip_prefix("xml:") {
        return (Some(XML_URN), local);
    }
    match name.rsplit_once(SEP) {
        Some(("", local)) => (None, local),
        Some((uri, local)) => (Some(uri), local),
        None => (Some(DAV_URN), name),
    }
}

/// A node of a parsed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with a canonical name.
///
/// The prefix used in the source document is remembered so that property
/// values can be echoed back with the same prefix when it is free.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub prefix: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn dav(local: &str) -> Self {
        Self::new(local)
    }

    pub fn with_text(mut self, txt: impl Into<String>) -> Self {
        self.children.push(Node::Text(txt.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn namespace(&self) -> Option<&str> {
        split(&self.name).0
    }

    pub fn local_name(&self) -> &str {
        split(&self.name).1
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements, text nodes are skipped
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    /// Concatenation of the direct text children
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    pub fn has_elements(&self) -> bool {
        self.elements().next().is_some()
    }
}

// ---------------

/// Parse a complete document into its root element.
///
/// The parser is iterative: nesting depth only grows a heap allocated stack.
/// Document type declarations are refused, so no external entity is ever
/// resolved. Whitespace-only text nodes are dropped.
pub async fn parse<T: IRead>(src: T) -> Result<Element, ParsingError> {
    let mut rdr = NsReader::from_reader(src);
    let mut buf: Vec<u8> = vec![];
    let mut stack: Vec<Element> = vec![];

    loop {
        let evt = rdr.read_event_into_async(&mut buf).await?;
        let finished = match evt {
            Event::Start(ref bs) => {
                stack.push(open(&rdr, bs)?);
                None
            }
            Event::Empty(ref bs) => attach(&mut stack, open(&rdr, bs)?),
            Event::End(_) => {
                let elem = stack.pop().ok_or(ParsingError::WrongToken)?;
                attach(&mut stack, elem)
            }
            Event::Text(ref t) => {
                let txt = t.unescape()?;
                if let Some(parent) = stack.last_mut() {
                    if !txt.trim().is_empty() {
                        parent.children.push(Node::Text(txt.into_owned()));
                    }
                }
                None
            }
            Event::CData(ref c) => {
                let txt = std::str::from_utf8(c)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(txt.to_string()));
                }
                None
            }
            Event::DocType(_) => return Err(ParsingError::ExternalEntities),
            Event::Eof => return Err(ParsingError::Eof),
            _ => None,
        };
        if let Some(root) = finished {
            return Ok(root);
        }
        buf.clear();
    }
}

/// Attach a closed element to its parent, returns it when it is the root
fn attach(stack: &mut Vec<Element>, elem: Element) -> Option<Element> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(elem));
            None
        }
        None => Some(elem),
    }
}

fn resolved(ns: ResolveResult) -> Result<Option<String>, ParsingError> {
    match ns {
        ResolveResult::Bound(n) => Ok(Some(std::str::from_utf8(n.into_inner())?.to_string())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(p) => Err(ParsingError::UnknownPrefix(
            String::from_utf8_lossy(&p).into_owned(),
        )),
    }
}

fn open<T>(rdr: &NsReader<T>, bs: &BytesStart<'_>) -> Result<Element, ParsingError> {
    let (ns, local) = rdr.resolve_element(bs.name());
    let ns = resolved(ns)?;
    let local = std::str::from_utf8(local.into_inner())?;
    let prefix = match bs.name().prefix() {
        Some(p) => Some(std::str::from_utf8(p.into_inner())?.to_string()),
        None => None,
    };

    let mut attributes = vec![];
    for attr in bs.attributes() {
        let attr = attr?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let value = attr.decode_and_unescape_value(rdr)?.into_owned();
        if let Some(local) = attr.key.as_ref().strip_prefix(b"xml:") {
            attributes.push((format!("xml:{}", std::str::from_utf8(local)?), value));
            continue;
        }
        let (ans, alocal) = rdr.resolve_attribute(attr.key);
        let ans = resolved(ans)?;
        let alocal = std::str::from_utf8(alocal.into_inner())?;
        attributes.push((canonical(ans.as_deref(), alocal), value));
    }

    Ok(Element {
        name: canonical(ns.as_deref(), local),
        prefix,
        attributes,
        children: vec![],
    })
}

// ---------------

enum Step<'a> {
    Open(&'a Element, bool),
    Text(&'a str),
    Close(BytesEnd<'static>),
}

/// Transform a tree into an XML stream of characters.
///
/// `DAV:` is stamped as the default namespace of the root element. Other
/// namespaces reuse a prefix already declared in scope, otherwise they are
/// declared inline, preferably with the prefix seen when parsing.
pub struct Writer<T: IWrite> {
    pub q: quick_xml::writer::Writer<T>,
    scopes: Vec<Vec<(String, String)>>,
    generated: usize,
}

impl<T: IWrite> Writer<T> {
    pub fn new(inner: T) -> Self {
        Self {
            q: quick_xml::writer::Writer::new(inner),
            scopes: vec![],
            generated: 0,
        }
    }

    pub async fn document(&mut self, root: &Element) -> Result<(), quick_xml::Error> {
        self.q
            .write_event_async(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .await?;

        let mut todo = vec![Step::Open(root, true)];
        while let Some(step) = todo.pop() {
            match step {
                Step::Open(elem, is_root) => {
                    let (start, declared) = self.start(elem, is_root);
                    if elem.children.is_empty() {
                        self.q.write_event_async(Event::Empty(start)).await?;
                        continue;
                    }
                    let end = start.to_end().into_owned();
                    self.q.write_event_async(Event::Start(start)).await?;
                    self.scopes.push(declared);
                    todo.push(Step::Close(end));
                    for child in elem.children.iter().rev() {
                        todo.push(match child {
                            Node::Element(e) => Step::Open(e, false),
                            Node::Text(t) => Step::Text(t),
                        });
                    }
                }
                Step::Text(txt) => {
                    self.q
                        .write_event_async(Event::Text(BytesText::new(txt)))
                        .await?;
                }
                Step::Close(end) => {
                    self.q.write_event_async(Event::End(end)).await?;
                    self.scopes.pop();
                }
            }
        }
        Ok(())
    }

    fn lookup_prefix<'a>(
        &'a self,
        declared: &'a [(String, String)],
        uri: &str,
    ) -> Option<&'a str> {
        // the innermost binding of a prefix shadows the outer ones
        let mut frames =
            std::iter::once(declared).chain(self.scopes.iter().rev().map(|v| v.as_slice()));
        let mut shadowed: Vec<&str> = vec![];
        frames.find_map(|frame| {
            let found = frame.iter().find(|(p, u)| u == uri && !shadowed.contains(&p.as_str()));
            shadowed.extend(frame.iter().map(|(p, _)| p.as_str()));
            found.map(|(p, _)| p.as_str())
        })
    }

    fn lookup_uri<'a>(&'a self, declared: &'a [(String, String)], prefix: &str) -> Option<&'a str> {
        std::iter::once(declared)
            .chain(self.scopes.iter().rev().map(|v| v.as_slice()))
            .find_map(|frame| frame.iter().find(|(p, _)| p == prefix))
            .map(|(_, u)| u.as_str())
    }

    fn fresh_prefix(&mut self, declared: &[(String, String)], wanted: Option<&str>) -> String {
        if let Some(p) = wanted {
            if !p.is_empty() && p != "xml" && p != "xmlns" && self.lookup_uri(declared, p).is_none() {
                return p.to_string();
            }
        }
        loop {
            self.generated += 1;
            let candidate = format!("ns{}", self.generated);
            if self.lookup_uri(declared, &candidate).is_none() {
                return candidate;
            }
        }
    }

    fn start(&mut self, elem: &Element, is_root: bool) -> (BytesStart<'static>, Vec<(String, String)>) {
        let mut declared: Vec<(String, String)> = vec![];
        if is_root {
            declared.push((String::new(), DAV_URN.to_string()));
        }

        let (ns, local) = split(&elem.name);
        let tag = match ns {
            None => {
                if self.lookup_uri(&declared, "").map_or(false, |u| !u.is_empty()) {
                    declared.retain(|(p, _)| !p.is_empty());
                    declared.push((String::new(), String::new()));
                }
                local.to_string()
            }
            Some(uri) => match self.lookup_prefix(&declared, uri) {
                Some("") => local.to_string(),
                Some(p) => format!("{}:{}", p, local),
                None if uri == DAV_URN => {
                    declared.push((String::new(), DAV_URN.to_string()));
                    local.to_string()
                }
                None => {
                    let p = self.fresh_prefix(&declared, elem.prefix.as_deref());
                    declared.push((p.clone(), uri.to_string()));
                    format!("{}:{}", p, local)
                }
            },
        };

        let mut attrs: Vec<(String, String)> = vec![];
        for (name, value) in elem.attributes.iter() {
            let (ns, local) = split(name);
            let key = match ns {
                None => local.to_string(),
                Some(XML_URN) => name.clone(),
                Some(uri) => {
                    let existing = self
                        .lookup_prefix(&declared, uri)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string);
                    let p = match existing {
                        Some(p) => p,
                        None => {
                            let p = self.fresh_prefix(&declared, None);
                            declared.push((p.clone(), uri.to_string()));
                            p
                        }
                    };
                    format!("{}:{}", p, local)
                }
            };
            attrs.push((key, value.clone()));
        }

        let mut start = BytesStart::new(tag);
        for (p, uri) in declared.iter() {
            let key = match p.as_str() {
                "" => "xmlns".to_string(),
                p => format!("xmlns:{}", p),
            };
            start.push_attribute((key.as_str(), uri.as_str()));
        }
        for (k, v) in attrs.iter() {
            start.push_attribute((k.as_str(), v.as_str()));
        }
        (start, declared)
    }
}

/// Render a tree into a standalone document
pub async fn to_bytes(root: &Element) -> Result<Vec<u8>, quick_xml::Error> {
    let mut buffer = Vec::new();
    let mut writer = Writer::new(&mut buffer);
    writer.document(root).await?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(src: &str) -> String {
        let tree = parse(src.as_bytes()).await.unwrap();
        let out = to_bytes(&tree).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn canonical_names() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:" xmlns:Z="http://ns.example.com/z/">
  <D:prop><Z:color/><plain xmlns=""/></D:prop>
</D:propfind>"#;
        let tree = parse(src.as_bytes()).await.unwrap();
        assert_eq!(tree.name, "propfind");
        assert_eq!(tree.prefix.as_deref(), Some("D"));
        let prop = tree.child("prop").unwrap();
        let names: Vec<&str> = prop.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["http://ns.example.com/z/%%color", "%%plain"]);
        assert_eq!(prop.elements().next().unwrap().local_name(), "color");
        assert_eq!(prop.elements().nth(1).unwrap().namespace(), None);
    }

    #[tokio::test]
    async fn default_namespace_and_xml_lang() {
        let src = r#"<propertyupdate xmlns="DAV:"><set><prop><author xml:lang="en" xmlns="urn:x">Jim</author></prop></set></propertyupdate>"#;
        let tree = parse(src.as_bytes()).await.unwrap();
        let author = tree
            .child("set")
            .and_then(|s| s.child("prop"))
            .and_then(|p| p.elements().next())
            .unwrap();
        assert_eq!(author.name, "urn:x%%author");
        assert_eq!(author.attribute("xml:lang"), Some("en"));
        assert_eq!(author.text(), "Jim");
    }

    #[tokio::test]
    async fn unknown_prefix_is_an_error() {
        let src = r#"<D:propfind xmlns:D="DAV:"><Q:prop/></D:propfind>"#;
        assert!(matches!(
            parse(src.as_bytes()).await,
            Err(ParsingError::UnknownPrefix(_))
        ));
    }

    #[tokio::test]
    async fn doctype_is_refused() {
        let src = r#"<?xml version="1.0"?><!DOCTYPE foo [<!ENTITY x SYSTEM "file:///etc/passwd">]><foo>&x;</foo>"#;
        assert!(matches!(
            parse(src.as_bytes()).await,
            Err(ParsingError::ExternalEntities)
        ));
    }

    #[tokio::test]
    async fn truncated_document() {
        let src = r#"<D:propfind xmlns:D="DAV:"><D:prop>"#;
        assert!(parse(src.as_bytes()).await.is_err());
    }

    #[tokio::test]
    async fn deep_nesting_does_not_recurse() {
        let depth = 20_000;
        let src = format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth));
        let tree = parse(src.as_bytes()).await.unwrap();
        assert_eq!(tree.name, "%%a");
        let out = to_bytes(&tree).await.unwrap();
        assert!(out.len() > depth * 3);
    }

    #[tokio::test]
    async fn writer_stamps_dav_and_reuses_prefixes() {
        let out = roundtrip(
            r#"<D:multistatus xmlns:D="DAV:"><D:response><R:bigbox xmlns:R="http://ns.example.com/boxschema/"><R:BoxType>Box type A</R:BoxType></R:bigbox></D:response></D:multistatus>"#,
        )
        .await;
        assert_eq!(
            out,
            r#"<?xml version="1.0" encoding="utf-8"?><multistatus xmlns="DAV:"><response><R:bigbox xmlns:R="http://ns.example.com/boxschema/"><R:BoxType>Box type A</R:BoxType></R:bigbox></response></multistatus>"#
        );
    }

    #[tokio::test]
    async fn writer_handles_no_namespace_and_conflicts() {
        let root = Element::dav("prop")
            .with_child(Element::new("%%plain").with_child(Element::dav("href").with_text("/a")))
            .with_child(Element {
                name: "urn:one%%x".into(),
                prefix: Some("p".into()),
                ..Default::default()
            })
            .with_child(
                Element {
                    name: "urn:two%%y".into(),
                    prefix: Some("p".into()),
                    ..Default::default()
                }
                .with_attribute("urn:one%%flag", "1"),
            );
        let out = String::from_utf8(to_bytes(&root).await.unwrap()).unwrap();
        assert_eq!(
            out,
            r#"<?xml version="1.0" encoding="utf-8"?><prop xmlns="DAV:"><plain xmlns=""><href xmlns="DAV:">/a</href></plain><p:x xmlns:p="urn:one"/><p:y xmlns:p="urn:two" xmlns:ns1="urn:one" ns1:flag="1"/></prop>"#
        );

        // the output parses back to the same canonical names
        let back = parse(out.as_bytes()).await.unwrap();
        let names: Vec<&str> = back.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["%%plain", "urn:one%%x", "urn:two%%y"]);
        let plain = back.elements().next().unwrap();
        assert_eq!(plain.child("href").unwrap().text(), "/a");
        let y = back.elements().nth(2).unwrap();
        assert_eq!(y.attribute("urn:one%%flag"), Some("1"));
    }

    #[tokio::test]
    async fn text_is_escaped() {
        let root = Element::dav("displayname").with_text("a < b & c");
        let out = String::from_utf8(to_bytes(&root).await.unwrap()).unwrap();
        assert!(out.contains("a &lt; b &amp; c"));
        let back = parse(out.as_bytes()).await.unwrap();
        assert_eq!(back.text(), "a < b & c");
    }
}
