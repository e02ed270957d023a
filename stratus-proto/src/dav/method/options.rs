use async_trait::async_trait;
use http::request::Parts;
use http::{header, Response, StatusCode};

use stratus_store::Result;

use super::DavMethod;
use crate::dav::codec::{empty_body, Body, HttpResponse};
use crate::dav::context::RequestContext;

pub struct OptionsMethod;

#[async_trait]
impl DavMethod for OptionsMethod {
    async fn run(&self, ctx: &RequestContext, _parts: &Parts, _body: Body) -> Result<HttpResponse> {
        let adapter = &ctx.mount.adapter;
        let classes = adapter.compliance_classes(&ctx.path, &ctx.user).await?;
        let allowed = adapter.allowed_methods(&ctx.path, &ctx.user).await?;
        let cache = adapter.options_cache_control(&ctx.path, &ctx.user).await?;

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("DAV", classes.join(", "))
            .header(header::ALLOW, allowed.join(", "))
            .header(header::CACHE_CONTROL, cache)
            .header("MS-Author-Via", "DAV")
            .header(header::CONTENT_LENGTH, 0)
            .body(empty_body())?)
    }
}
