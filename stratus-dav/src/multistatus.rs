use http::status::StatusCode;

use super::types::{PropValue, Violation};
use super::xml::{Element, QWrite};

/// 13.  Multi-Status Response
///
/// A Multi-Status response conveys information about multiple resources
/// in situations where multiple status codes might be appropriate.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MultiStatus {
    pub statuses: Vec<Status>,
    pub description: Option<String>,
}

impl MultiStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_status(&mut self, status: Status) {
        self.statuses.push(status);
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn find(&self, href: &str) -> Option<&Status> {
        self.statuses.iter().find(|s| s.href == href)
    }
}

impl QWrite for MultiStatus {
    fn qwrite(&self) -> Element {
        let mut root = Element::dav("multistatus");
        for status in self.statuses.iter() {
            root.push(status.qwrite());
        }
        if let Some(desc) = &self.description {
            root.push(Element::dav("responsedescription").with_text(desc.as_str()));
        }
        root
    }
}

/// 14.24.  response XML Element
///
/// <!ELEMENT response (href, ((href*, status)|(propstat+)),
///                     error?, responsedescription? , location?) >
///
/// When at least one propstat is attached, the status code of the entry is
/// not rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub href: String,
    pub code: StatusCode,
    pub description: Option<String>,
    pub error: Option<Violation>,
    propstats: Vec<PropStat>,
}

impl Status {
    pub fn new(href: impl Into<String>, code: StatusCode) -> Self {
        Self {
            href: href.into(),
            code,
            description: None,
            error: None,
            propstats: vec![],
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_error(mut self, error: Violation) -> Self {
        self.error = Some(error);
        self
    }

    /// Attach a propstat, merged into an existing one with the same code
    pub fn add_propstat(&mut self, propstat: PropStat) {
        match self.propstats.iter_mut().find(|p| p.code == propstat.code) {
            Some(existing) => existing.props.extend(propstat.props),
            None => self.propstats.push(propstat),
        }
    }

    pub fn propstats(&self) -> &[PropStat] {
        &self.propstats
    }

    pub fn propstat(&self, code: StatusCode) -> Option<&PropStat> {
        self.propstats.iter().find(|p| p.code == code)
    }
}

impl QWrite for Status {
    fn qwrite(&self) -> Element {
        let mut elem = Element::dav("response").with_child(Element::dav("href").with_text(self.href.as_str()));
        match self.propstats.is_empty() {
            true => elem.push(status_line(self.code)),
            false => {
                for p in self.propstats.iter() {
                    elem.push(p.qwrite());
                }
            }
        }
        if let Some(err) = &self.error {
            elem.push(err.qwrite());
        }
        if let Some(desc) = &self.description {
            elem.push(Element::dav("responsedescription").with_text(desc.as_str()));
        }
        elem
    }
}

/// 14.22 propstat XML Element
///
/// <!ELEMENT propstat (prop, status, error?, responsedescription?) >
///
/// Properties without value are rendered as empty elements.
#[derive(Debug, Clone, PartialEq)]
pub struct PropStat {
    pub code: StatusCode,
    pub props: Vec<(String, Option<PropValue>)>,
    pub description: Option<String>,
    pub error: Option<Violation>,
}

impl PropStat {
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            props: vec![],
            description: None,
            error: None,
        }
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: Option<PropValue>) -> Self {
        self.props.push((name.into(), value));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_error(mut self, error: Violation) -> Self {
        self.error = Some(error);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.props.iter().map(|(n, _)| n.as_str())
    }

    pub fn value(&self, name: &str) -> Option<&PropValue> {
        self.props
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }
}

impl QWrite for PropStat {
    fn qwrite(&self) -> Element {
        let prop = self.props.iter().fold(Element::dav("prop"), |acc, (name, value)| {
            acc.with_child(match value {
                Some(v) => v.to_element(name),
                None => Element::new(name.as_str()),
            })
        });
        let mut elem = Element::dav("propstat")
            .with_child(prop)
            .with_child(status_line(self.code));
        if let Some(err) = &self.error {
            elem.push(err.qwrite());
        }
        if let Some(desc) = &self.description {
            elem.push(Element::dav("responsedescription").with_text(desc.as_str()));
        }
        elem
    }
}

/// 14.28.  status XML Element
///
/// <!ELEMENT status (#PCDATA) >
pub fn status_line(code: StatusCode) -> Element {
    Element::dav("status").with_text(format!(
        "HTTP/1.1 {} {}",
        code.as_str(),
        code.canonical_reason().unwrap_or("Unknown")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{parse, to_bytes};

    #[tokio::test]
    async fn propstats_are_grouped_by_code() {
        let mut status = Status::new("/container/front.html", StatusCode::OK);
        status.add_propstat(
            PropStat::new(StatusCode::OK).with_prop("http://ns.example.com/boxschema/%%bigbox", None),
        );
        status.add_propstat(
            PropStat::new(StatusCode::NOT_FOUND).with_prop("http://ns.example.com/boxschema/%%author", None),
        );
        status.add_propstat(
            PropStat::new(StatusCode::OK).with_prop("getcontentlength", Some(PropValue::text("4525"))),
        );
        assert_eq!(status.propstats().len(), 2);
        assert_eq!(
            status.propstat(StatusCode::OK).unwrap().names().collect::<Vec<_>>(),
            vec!["http://ns.example.com/boxschema/%%bigbox", "getcontentlength"]
        );

        let mut ms = MultiStatus::new();
        ms.add_status(status);
        let bytes = to_bytes(&ms.qwrite()).await.unwrap();
        let out = String::from_utf8(bytes).unwrap();
        assert!(out.contains(r#"<multistatus xmlns="DAV:"><response><href>/container/front.html</href><propstat><prop>"#));
        assert!(out.contains("<getcontentlength>4525</getcontentlength>"));
        assert!(out.contains("<status>HTTP/1.1 404 Not Found</status>"));
        assert!(!out.contains("<status>HTTP/1.1 200 OK</status></response>"));
    }

    #[tokio::test]
    async fn status_without_propstat() {
        let mut ms = MultiStatus::new();
        ms.add_status(
            Status::new("/container/", StatusCode::LOCKED)
                .with_error(Violation::LockTokenSubmitted(vec![]))
                .with_description("locked"),
        );
        let out = to_bytes(&ms.qwrite()).await.unwrap();
        let tree = parse(out.as_slice()).await.unwrap();
        let response = tree.child("response").unwrap();
        assert_eq!(response.child("href").unwrap().text(), "/container/");
        assert_eq!(response.child("status").unwrap().text(), "HTTP/1.1 423 Locked");
        assert!(response.child("error").unwrap().child("lock-token-submitted").is_some());
        assert_eq!(response.child("responsedescription").unwrap().text(), "locked");
    }
}
