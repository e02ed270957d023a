use std::io;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{StreamExt, TryStreamExt};
use http::request::Parts;
use http::{header, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, BodyStream, Empty, Full, LengthLimitError, Limited, StreamBody};
use hyper::body::Frame;
use percent_encoding::percent_decode_str;

use stratus_dav::types::{Depth, Timeout};
use stratus_dav::xml::{self as dxml, Element, QRead};
use stratus_store::{ByteStream, DavError, Result};

pub type Body = UnsyncBoxBody<Bytes, io::Error>;
pub type HttpResponse = Response<Body>;

pub const XML_CONTENT_TYPE: &str = "application/xml; charset=\"utf-8\"";

/// Longest request path accepted, in bytes
pub const MAX_URI_LEN: usize = 8192;

pub fn text_body(txt: impl Into<Bytes>) -> Body {
    Full::new(txt.into()).map_err(|e| match e {}).boxed_unsync()
}

pub fn empty_body() -> Body {
    Empty::new().map_err(|e| match e {}).boxed_unsync()
}

pub fn stream_body(stream: ByteStream) -> Body {
    StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync()
}

/// Data frames of a request body, trailers are dropped
pub fn body_stream(body: Body) -> ByteStream {
    BodyStream::new(body)
        .try_filter_map(|frame| async move { Ok(frame.into_data().ok()) })
        .boxed()
}

// ---- HEADERS ----

pub fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>> {
    match parts.headers.get(name) {
        None => Ok(None),
        Some(v) => v
            .to_str()
            .map(|v| Some(v.trim()))
            .map_err(|_| DavError::BadRequest(format!("{} is not valid ASCII", name))),
    }
}

pub fn depth(parts: &Parts, default: Depth) -> Result<Depth> {
    match header(parts, "Depth")? {
        None => Ok(default),
        Some(v) => Depth::parse(v).ok_or_else(|| DavError::BadRequest(format!("invalid Depth {}", v))),
    }
}

/// `Overwrite: T | F`, true when absent
pub fn overwrite(parts: &Parts) -> Result<bool> {
    match header(parts, "Overwrite")? {
        None => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("t") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("f") => Ok(false),
        Some(v) => Err(DavError::BadRequest(format!("invalid Overwrite {}", v))),
    }
}

pub fn timeouts(parts: &Parts) -> Result<Vec<Timeout>> {
    Ok(header(parts, "Timeout")?
        .map(Timeout::parse_list)
        .unwrap_or_default())
}

/// `Lock-Token: <coded-url>`, without the angle brackets
pub fn lock_token(parts: &Parts) -> Result<Option<String>> {
    let raw = match header(parts, "Lock-Token")? {
        Some(v) => v,
        None => return Ok(None),
    };
    raw.strip_prefix('<')
        .and_then(|v| v.strip_suffix('>'))
        .map(|v| Some(v.to_string()))
        .ok_or_else(|| DavError::BadRequest(format!("invalid Lock-Token {}", raw)))
}

/// Percent-decode the path of a request URI
pub fn decode_path(raw: &str) -> Result<String> {
    if raw.len() > MAX_URI_LEN {
        return Err(DavError::RequestUriTooLong);
    }
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|e| DavError::BadRequest(format!("path is not UTF-8: {}", e)))?;
    if !decoded.starts_with('/') {
        return Err(DavError::BadRequest("path must be absolute".into()));
    }
    if decoded.split('/').any(|s| s == "." || s == "..") {
        return Err(DavError::BadRequest("dot segments are not allowed".into()));
    }
    Ok(decoded.into_owned())
}

/// Authority the client used to reach us
pub fn authority(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
}

/// `scheme://authority` of the request
pub fn origin(parts: &Parts) -> Option<String> {
    let scheme = parts.uri.scheme_str().unwrap_or("http");
    authority(parts).map(|a| format!("{}://{}", scheme, a))
}

/// Decoded path of the `Destination` header.
///
/// An absolute URL pointing to another authority is refused with
/// `BadGateway`, we do not forward requests.
pub fn destination(parts: &Parts) -> Result<Option<String>> {
    let raw = match header(parts, "Destination")? {
        Some(v) => v,
        None => return Ok(None),
    };
    let uri: http::Uri = raw
        .parse()
        .map_err(|e| DavError::BadRequest(format!("invalid Destination: {}", e)))?;
    if let Some(target) = uri.authority() {
        let ours = authority(parts);
        if !ours.map_or(false, |a| a.eq_ignore_ascii_case(target.as_str())) {
            return Err(DavError::BadGateway(target.to_string()));
        }
    }
    Ok(Some(decode_path(uri.path())?))
}

/// Comma separated list of entity tags, quotes and weak markers removed
pub fn etag_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|t| unquote_etag(t.trim()))
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn unquote_etag(value: &str) -> String {
    let value = value.strip_prefix("W/").unwrap_or(value);
    value.trim_matches('"').to_string()
}

pub fn quote_etag(etag: &str) -> String {
    format!("\"{}\"", etag)
}

pub fn http_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

// ---- BODIES ----

/// Collect a request body, refusing anything above `limit` bytes
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(DavError::PayloadTooLarge),
        Err(e) => Err(DavError::BadRequest(format!("unable to read body: {}", e))),
    }
}

/// Parse an XML request body, `None` when the body is empty
pub async fn read_xml(body: Body, limit: usize) -> Result<Option<Element>> {
    let bytes = read_body(body, limit).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(dxml::parse(&bytes[..]).await?))
}

pub async fn deserialize<T: QRead>(body: Body, limit: usize) -> Result<Option<T>> {
    match read_xml(body, limit).await? {
        None => Ok(None),
        Some(root) => Ok(Some(T::qread(&root)?)),
    }
}

/// Render an XML document as the whole response body
pub async fn serialize(status: StatusCode, root: &Element) -> Result<HttpResponse> {
    let bytes = dxml::to_bytes(root)
        .await
        .map_err(anyhow::Error::from)?;
    tracing::trace!(len = bytes.len(), "serialized XML response");
    Ok(Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, XML_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(text_body(bytes))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = http::Request::builder().uri("/dav/a");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn depth_header() {
        assert_eq!(depth(&parts(&[]), Depth::Infinity).unwrap(), Depth::Infinity);
        assert_eq!(depth(&parts(&[("Depth", "0")]), Depth::Infinity).unwrap(), Depth::Zero);
        assert_eq!(depth(&parts(&[("Depth", "infinity")]), Depth::Zero).unwrap(), Depth::Infinity);
        assert!(depth(&parts(&[("Depth", "2")]), Depth::Zero).is_err());
    }

    #[test]
    fn overwrite_header() {
        assert!(overwrite(&parts(&[])).unwrap());
        assert!(!overwrite(&parts(&[("Overwrite", "F")])).unwrap());
        assert!(overwrite(&parts(&[("Overwrite", "T")])).unwrap());
        assert!(overwrite(&parts(&[("Overwrite", "yes")])).is_err());
    }

    #[test]
    fn lock_token_header() {
        let p = parts(&[("Lock-Token", "<urn:uuid:1234>")]);
        assert_eq!(lock_token(&p).unwrap().as_deref(), Some("urn:uuid:1234"));
        assert!(lock_token(&parts(&[("Lock-Token", "urn:uuid:1234")])).is_err());
        assert_eq!(lock_token(&parts(&[])).unwrap(), None);
    }

    #[test]
    fn paths_are_decoded() {
        assert_eq!(decode_path("/a%20b/c%C3%A9").unwrap(), "/a b/cé");
        assert!(decode_path("/a/../b").is_err());
        assert!(decode_path("/%FF").is_err());
        let long = format!("/{}", "a".repeat(MAX_URI_LEN));
        assert!(matches!(decode_path(&long), Err(DavError::RequestUriTooLong)));
    }

    #[test]
    fn destination_header() {
        let p = parts(&[("Host", "example.com"), ("Destination", "http://example.com/b%20c/")]);
        assert_eq!(destination(&p).unwrap().as_deref(), Some("/b c/"));

        let p = parts(&[("Host", "example.com"), ("Destination", "/relative")]);
        assert_eq!(destination(&p).unwrap().as_deref(), Some("/relative"));

        let p = parts(&[("Host", "example.com"), ("Destination", "http://elsewhere.org/x")]);
        assert!(matches!(destination(&p), Err(DavError::BadGateway(_))));
    }

    #[test]
    fn etags_and_dates() {
        assert_eq!(etag_list("\"a\", W/\"b\" ,c"), vec!["a", "b", "c"]);
        let date = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(http_date(&date), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert!(parse_http_date("yesterday").is_none());
    }

    #[tokio::test]
    async fn body_limit() {
        let body = text_body("<propfind xmlns=\"DAV:\"><propname/></propfind>");
        assert!(matches!(read_body(body, 8).await, Err(DavError::PayloadTooLarge)));

        let body = text_body("  \n");
        assert!(read_xml(body, 1024).await.unwrap().is_none());

        let body = text_body("<propfind xmlns=\"DAV:\"><propname/>");
        assert!(matches!(read_xml(body, 1024).await, Err(DavError::BadRequest(_))));
    }
}
