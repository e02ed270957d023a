use std::collections::HashMap;

use http::request::Parts;
use http::Method;

use stratus_store::{DavError, Resource, Result};

use super::codec::{decode_path, etag_list, header, parse_http_date, unquote_etag};
use super::context::RequestContext;
use super::lock;
use super::router::Mount;

/// 10.4.  If Header
///
/// If = "If" ":" ( 1*No-tag-list | 1*Tagged-list )
/// No-tag-list = List
/// Tagged-list = Resource-Tag 1*List
/// List = "(" 1*Condition ")"
/// Condition = ["Not"] (State-token | "[" entity-tag "]")
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IfHeader {
    pub lists: Vec<IfList>,
}

/// One parenthesized list, with the decoded path of its resource tag
#[derive(Debug, Clone, PartialEq)]
pub struct IfList {
    pub resource: Option<String>,
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub not: bool,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Token(String),
    ETag(String),
    /// `<DAV:no-lock>`, never satisfied
    NoLock,
}

/// What an If list is evaluated against
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceState {
    pub etag: Option<String>,
    pub tokens: Vec<String>,
}

fn bad(msg: &str) -> DavError {
    DavError::BadRequest(format!("If header: {}", msg))
}

impl IfHeader {
    pub fn parse(value: &str) -> Result<Self> {
        let mut lists = vec![];
        let mut tag: Option<String> = None;
        let mut tagged: Option<bool> = None;
        let mut rest = value.trim_start();

        while !rest.is_empty() {
            if let Some(r) = rest.strip_prefix('<') {
                let (url, r) = r.split_once('>').ok_or_else(|| bad("unterminated resource tag"))?;
                if tagged == Some(false) {
                    return Err(bad("tagged and untagged lists can not be mixed"));
                }
                tagged = Some(true);
                tag = Some(tag_path(url)?);
                rest = r.trim_start();
                if !rest.starts_with('(') {
                    return Err(bad("resource tag without list"));
                }
            } else if let Some(r) = rest.strip_prefix('(') {
                tagged.get_or_insert(false);
                let (checks, r) = parse_list(r)?;
                lists.push(IfList {
                    resource: tag.clone(),
                    checks,
                });
                rest = r.trim_start();
            } else {
                return Err(bad("expected a resource tag or a list"));
            }
        }

        match lists.is_empty() {
            true => Err(bad("no list")),
            false => Ok(Self { lists }),
        }
    }

    /// Lock tokens submitted by the client
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = vec![];
        for check in self.lists.iter().flat_map(|l| l.checks.iter()) {
            if let (false, Condition::Token(t)) = (check.not, &check.condition) {
                if !tokens.contains(t) {
                    tokens.push(t.clone());
                }
            }
        }
        tokens
    }

    /// True when any list holds
    pub async fn evaluate(&self, ctx: &RequestContext, current: Option<&dyn Resource>) -> Result<bool> {
        let mut states: HashMap<Option<String>, ResourceState> = HashMap::new();
        for list in self.lists.iter() {
            if !states.contains_key(&list.resource) {
                let state = match &list.resource {
                    None => ResourceState::of(&ctx.mount, &ctx.path, current).await?,
                    Some(path) => match ctx.router.resolve(path) {
                        None => ResourceState::default(),
                        Some(mount) => {
                            let res = mount.lookup(path).await?;
                            ResourceState::of(&mount, path, res.as_deref()).await?
                        }
                    },
                };
                states.insert(list.resource.clone(), state);
            }
            if let Some(state) = states.get(&list.resource) {
                if list.holds(state) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

impl IfList {
    pub fn holds(&self, state: &ResourceState) -> bool {
        self.checks.iter().all(|c| c.holds(state))
    }
}

impl Check {
    pub fn holds(&self, state: &ResourceState) -> bool {
        let positive = match &self.condition {
            Condition::Token(t) => state.tokens.contains(t),
            Condition::ETag(e) => state.etag.as_deref() == Some(e.as_str()),
            Condition::NoLock => false,
        };
        positive != self.not
    }
}

impl ResourceState {
    pub async fn of(mount: &Mount, path: &str, resource: Option<&dyn Resource>) -> Result<Self> {
        let etag = match resource {
            Some(r) => Some(r.etag().await?),
            None => None,
        };
        let tokens = lock::lock_set(mount, path)
            .await?
            .resource_locks()
            .map(|l| l.token.clone())
            .collect();
        Ok(Self { etag, tokens })
    }
}

fn tag_path(url: &str) -> Result<String> {
    let path = match url.contains("://") {
        true => {
            let uri: http::Uri = url.parse().map_err(|_| bad("invalid resource tag"))?;
            uri.path().to_string()
        }
        false => url.to_string(),
    };
    decode_path(&path)
}

fn parse_list(mut rest: &str) -> Result<(Vec<Check>, &str)> {
    let mut checks = vec![];
    loop {
        rest = rest.trim_start();
        if let Some(r) = rest.strip_prefix(')') {
            if checks.is_empty() {
                return Err(bad("empty list"));
            }
            return Ok((checks, r));
        }

        let mut not = false;
        if rest.get(..3).map_or(false, |w| w.eq_ignore_ascii_case("not")) {
            not = true;
            rest = rest[3..].trim_start();
        }

        let condition = if let Some(r) = rest.strip_prefix('<') {
            let (token, r) = r.split_once('>').ok_or_else(|| bad("unterminated state token"))?;
            rest = r;
            match token {
                "DAV:no-lock" => Condition::NoLock,
                t => Condition::Token(t.to_string()),
            }
        } else if let Some(r) = rest.strip_prefix('[') {
            let (etag, r) = r.split_once(']').ok_or_else(|| bad("unterminated entity tag"))?;
            rest = r;
            Condition::ETag(unquote_etag(etag.trim()))
        } else {
            return Err(bad("expected a state token or an entity tag"));
        };
        checks.push(Check { not, condition });
    }
}

/// Tokens of the If header, empty when there is none
pub fn submitted_tokens(parts: &Parts) -> Result<Vec<String>> {
    match header(parts, "If")? {
        Some(v) => Ok(IfHeader::parse(v)?.tokens()),
        None => Ok(vec![]),
    }
}

/// Whether the client accepts a cached answer
fn cacheable(parts: &Parts) -> Result<bool> {
    Ok(match header(parts, "Cache-Control")? {
        Some(v) => !v
            .split(',')
            .map(str::trim)
            .any(|d| d.eq_ignore_ascii_case("no-cache") || d.eq_ignore_ascii_case("no-store")),
        None => true,
    })
}

fn etag_matches(etag: &Option<String>, value: &str) -> bool {
    match (etag, value) {
        (None, _) => false,
        (Some(_), "*") => true,
        (Some(e), v) => etag_list(v).contains(e),
    }
}

/// Evaluate the conditional headers of a request against its target,
/// `resource` is `None` when the target does not exist.
///
/// Failures are `PreconditionFailed`, or `ResourceNotModified` for a
/// cacheable GET or HEAD.
pub async fn check(ctx: &RequestContext, parts: &Parts, resource: Option<&dyn Resource>) -> Result<()> {
    let (etag, modified) = match resource {
        Some(r) => (Some(r.etag().await?), Some(r.last_modified().await?.timestamp())),
        None => (None, None),
    };
    let safe = parts.method == Method::GET || parts.method == Method::HEAD;

    if let Some(v) = header(parts, "If-Match")? {
        if !etag_matches(&etag, v) {
            tracing::debug!(etag=?etag, header=v, "If-Match failed");
            return Err(DavError::PreconditionFailed);
        }
    }

    if let Some(v) = header(parts, "If-Unmodified-Since")? {
        if let (Some(date), Some(modified)) = (parse_http_date(v), modified) {
            if date.timestamp() < modified {
                return Err(DavError::PreconditionFailed);
            }
        }
    }

    let none_match = header(parts, "If-None-Match")?;
    if let Some(v) = none_match {
        let creating = matches!(parts.method.as_str(), "PUT" | "MKCOL");
        if creating && v != "*" {
            return Err(DavError::BadRequest("If-None-Match only accepts * here".into()));
        }
        if etag_matches(&etag, v) {
            match safe {
                true if cacheable(parts)? => return Err(DavError::ResourceNotModified),
                true => (),
                false => return Err(DavError::PreconditionFailed),
            }
        }
    }

    if none_match.is_none() && safe {
        if let Some(v) = header(parts, "If-Modified-Since")? {
            if let (Some(date), Some(modified)) = (parse_http_date(v), modified) {
                if modified <= date.timestamp() && cacheable(parts)? {
                    return Err(DavError::ResourceNotModified);
                }
            }
        }
    }

    if let Some(v) = header(parts, "If")? {
        let parsed = IfHeader::parse(v)?;
        if !parsed.evaluate(ctx, resource).await? {
            tracing::debug!(header = v, "If header evaluated to false");
            return Err(DavError::PreconditionFailed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(t: &str) -> Check {
        Check {
            not: false,
            condition: Condition::Token(t.into()),
        }
    }

    #[test]
    fn untagged_lists() {
        let h = IfHeader::parse(
            "(<urn:uuid:181d4fae-7d8c-11d0-a765-00a0c91e6bf2> [\"I am an ETag\"]) ([\"I am another ETag\"])",
        )
        .unwrap();
        assert_eq!(h.lists.len(), 2);
        assert_eq!(h.lists[0].resource, None);
        assert_eq!(
            h.lists[0].checks,
            vec![
                token("urn:uuid:181d4fae-7d8c-11d0-a765-00a0c91e6bf2"),
                Check {
                    not: false,
                    condition: Condition::ETag("I am an ETag".into())
                },
            ]
        );
        assert_eq!(h.tokens(), vec!["urn:uuid:181d4fae-7d8c-11d0-a765-00a0c91e6bf2"]);
    }

    #[test]
    fn tagged_lists() {
        let h = IfHeader::parse(
            "<http://www.example.com/specs/> (<urn:uuid:1>) (Not <DAV:no-lock>) </a%20b> ([W/\"x\"])",
        )
        .unwrap();
        assert_eq!(h.lists.len(), 3);
        assert_eq!(h.lists[0].resource.as_deref(), Some("/specs/"));
        assert_eq!(h.lists[1].resource.as_deref(), Some("/specs/"));
        assert_eq!(
            h.lists[1].checks,
            vec![Check {
                not: true,
                condition: Condition::NoLock
            }]
        );
        assert_eq!(h.lists[2].resource.as_deref(), Some("/a b"));
    }

    #[test]
    fn grammar_violations() {
        assert!(IfHeader::parse("").is_err());
        assert!(IfHeader::parse("()").is_err());
        assert!(IfHeader::parse("(<urn:uuid:1>").is_err());
        assert!(IfHeader::parse("<http://a/b>").is_err());
        assert!(IfHeader::parse("token").is_err());
        // untagged then tagged
        assert!(IfHeader::parse("(<urn:uuid:1>) </b> (<urn:uuid:2>)").is_err());
    }

    #[test]
    fn list_evaluation() {
        let state = ResourceState {
            etag: Some("abc".into()),
            tokens: vec!["urn:uuid:1".into()],
        };
        let h = IfHeader::parse("(<urn:uuid:1> [\"abc\"])").unwrap();
        assert!(h.lists[0].holds(&state));

        let h = IfHeader::parse("(<urn:uuid:2>)").unwrap();
        assert!(!h.lists[0].holds(&state));

        let h = IfHeader::parse("(Not <urn:uuid:2>)").unwrap();
        assert!(h.lists[0].holds(&state));

        let h = IfHeader::parse("(<DAV:no-lock>)").unwrap();
        assert!(!h.lists[0].holds(&state));

        let h = IfHeader::parse("(Not <DAV:no-lock> [\"xyz\"])").unwrap();
        assert!(!h.lists[0].holds(&state));
    }
}
