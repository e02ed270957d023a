use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, StreamExt};
use http::request::Parts;
use http::{header, Method, Response, StatusCode};

use stratus_store::{ByteStream, Resource, Result};

use super::DavMethod;
use crate::dav::codec::{
    empty_body, header, http_date, parse_http_date, quote_etag, stream_body, unquote_etag, Body,
    HttpResponse,
};
use crate::dav::compress::{self, Coding, SUPPORTED};
use crate::dav::conditional;
use crate::dav::context::RequestContext;
use crate::dav::range::{self, ByteRanges};

const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// GET and HEAD, HEAD stops before the body
pub struct GetMethod;

#[async_trait]
impl DavMethod for GetMethod {
    async fn run(&self, ctx: &RequestContext, parts: &Parts, _body: Body) -> Result<HttpResponse> {
        let head = parts.method == Method::HEAD;
        let res = ctx.resource().await?;
        conditional::check(ctx, parts, Some(res.as_ref())).await?;

        let etag = res.etag().await?;
        let modified = res.last_modified().await?;
        let builder = Response::builder()
            .header(header::ETAG, quote_etag(&etag))
            .header(header::LAST_MODIFIED, http_date(&modified));

        if res.is_collection().await? {
            return Ok(builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, 0)
                .body(empty_body())?);
        }

        let len = res.length().await?;
        let media_type = res
            .media_type()
            .await?
            .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string());
        let builder = builder.header(header::ACCEPT_RANGES, "bytes");

        let ranges = match header(parts, "Range")? {
            Some(r) if if_range_holds(parts, &etag, &modified)? => range::parse(r, len),
            _ => None,
        };
        if let Some(ranges) = ranges {
            let ranged = Ranged {
                res: res.as_ref(),
                ctx,
                media_type: &media_type,
                len,
                head,
            };
            return ranged.respond(builder, ranges).await;
        }

        let available = match ctx.options.compression && !compress::is_compressed(&media_type) {
            true => &SUPPORTED[..],
            false => &[][..],
        };
        let coding = compress::negotiate(header(parts, "Accept-Encoding")?, available)?;
        let mut builder = builder
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, &media_type);
        if ctx.options.compression {
            builder = builder.header(header::VARY, "Accept-Encoding");
        }
        builder = match coding {
            Coding::Identity => builder.header(header::CONTENT_LENGTH, len),
            c => builder.header(header::CONTENT_ENCODING, c.as_str()),
        };
        tracing::debug!(len, coding = coding.as_str(), "serving content");

        if head {
            return Ok(builder.body(empty_body())?);
        }
        let content = res.stream(None, &ctx.user).await?;
        Ok(builder.body(stream_body(compress::encode(content, coding)))?)
    }
}

/// `If-Range` holds when absent, or when it names the current entity
fn if_range_holds(parts: &Parts, etag: &str, modified: &DateTime<Utc>) -> Result<bool> {
    let value = match header(parts, "If-Range")? {
        Some(v) => v,
        None => return Ok(true),
    };
    if value.starts_with("W/") {
        return Ok(false);
    }
    if value.starts_with('"') {
        return Ok(unquote_etag(value) == etag);
    }
    Ok(parse_http_date(value).map_or(false, |d| d.timestamp() == modified.timestamp()))
}

struct Ranged<'a> {
    res: &'a dyn Resource,
    ctx: &'a RequestContext,
    media_type: &'a str,
    len: u64,
    head: bool,
}

impl<'a> Ranged<'a> {
    async fn respond(&self, builder: http::response::Builder, ranges: Vec<(u64, u64)>) -> Result<HttpResponse> {
        let builder = builder.status(StatusCode::PARTIAL_CONTENT);

        if let [single] = ranges[..] {
            let builder = builder
                .header(header::CONTENT_TYPE, self.media_type)
                .header(header::CONTENT_RANGE, range::content_range(single, self.len))
                .header(header::CONTENT_LENGTH, single.1 - single.0 + 1);
            if self.head {
                return Ok(builder.body(empty_body())?);
            }
            let content = self.res.stream(Some(single), &self.ctx.user).await?;
            return Ok(builder.body(stream_body(content))?);
        }

        let framing = ByteRanges::new();
        let builder = builder
            .header(header::CONTENT_TYPE, framing.content_type())
            .header(
                header::CONTENT_LENGTH,
                framing.length(self.media_type, &ranges, self.len),
            );
        if self.head {
            return Ok(builder.body(empty_body())?);
        }

        let mut pieces: Vec<ByteStream> = vec![];
        for r in ranges.iter() {
            let part_header = framing.part_header(self.media_type, *r, self.len);
            pieces.push(stream::once(future::ready(Ok(part_header))).boxed());
            pieces.push(self.res.stream(Some(*r), &self.ctx.user).await?);
            pieces.push(stream::once(future::ready(Ok(framing.part_end()))).boxed());
        }
        pieces.push(stream::once(future::ready(Ok(framing.closing()))).boxed());
        tracing::debug!(parts = ranges.len(), "serving byte ranges");
        Ok(builder.body(stream_body(stream::iter(pieces).flatten().boxed()))?)
    }
}
