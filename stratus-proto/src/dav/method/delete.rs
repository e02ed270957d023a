use async_trait::async_trait;
use http::request::Parts;
use http::{Response, StatusCode};

use stratus_dav::multistatus::MultiStatus;
use stratus_dav::types::Depth;
use stratus_dav::xml::QWrite;
use stratus_store::{DavError, Result};

use super::{delete_tree, require_unlocked, DavMethod};
use crate::dav::codec::{self, empty_body, Body, HttpResponse};
use crate::dav::conditional;
use crate::dav::context::RequestContext;

pub struct DeleteMethod;

#[async_trait]
impl DavMethod for DeleteMethod {
    async fn run(&self, ctx: &RequestContext, parts: &Parts, _body: Body) -> Result<HttpResponse> {
        let res = ctx.resource().await?;
        if codec::depth(parts, Depth::Infinity)? != Depth::Infinity {
            return Err(DavError::BadRequest("DELETE requires Depth: infinity".into()));
        }
        if ctx.mount.is_root(&ctx.path) {
            return Err(DavError::Forbidden("the mount root can not be deleted".into()));
        }
        conditional::check(ctx, parts, Some(res.as_ref())).await?;
        require_unlocked(ctx, &ctx.mount, &res.canonical_path(), parts, false).await?;

        let tokens = conditional::submitted_tokens(parts)?;
        let mut report = MultiStatus::new();
        let gone = delete_tree(ctx, &ctx.mount, res, &tokens, Some(&mut report)).await?;

        if gone && report.is_empty() {
            return Ok(Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(empty_body())?);
        }
        tracing::debug!(path=%ctx.path, failures = report.len(), "partial delete");
        codec::serialize(StatusCode::MULTI_STATUS, &report.qwrite()).await
    }
}
