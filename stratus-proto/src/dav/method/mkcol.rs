use async_trait::async_trait;
use http::request::Parts;
use http::{header, Response, StatusCode};

use stratus_store::{DavError, Result};

use super::{require_unlocked, with_kind, DavMethod};
use crate::dav::codec::{empty_body, read_body, Body, HttpResponse};
use crate::dav::conditional;
use crate::dav::context::RequestContext;

pub struct MkcolMethod;

#[async_trait]
impl DavMethod for MkcolMethod {
    async fn run(&self, ctx: &RequestContext, parts: &Parts, body: Body) -> Result<HttpResponse> {
        let content = read_body(body, ctx.options.max_xml_body).await?;
        if !content.is_empty() {
            return Err(DavError::MediaTypeNotSupported);
        }
        if ctx.mount.lookup(&ctx.path).await?.is_some() {
            return Err(DavError::ResourceExists);
        }
        conditional::check(ctx, parts, None).await?;

        let path = with_kind(&ctx.path, true);
        require_unlocked(ctx, &ctx.mount, &path, parts, false).await?;
        let res = ctx.mount.adapter.new_collection(&path, &ctx.mount.prefix).await?;
        res.create(&ctx.user).await?;
        tracing::debug!(path=%path, "collection created");

        Ok(Response::builder()
            .status(StatusCode::CREATED)
            .header(header::CONTENT_LENGTH, 0)
            .body(empty_body())?)
    }
}
