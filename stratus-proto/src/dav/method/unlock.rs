use async_trait::async_trait;
use http::request::Parts;
use http::{Response, StatusCode};

use stratus_dav::types::Violation;
use stratus_dav::xml::QWrite;
use stratus_store::{DavError, Result};

use super::DavMethod;
use crate::dav::codec::{self, empty_body, Body, HttpResponse};
use crate::dav::conditional;
use crate::dav::context::RequestContext;

pub struct UnlockMethod;

#[async_trait]
impl DavMethod for UnlockMethod {
    async fn run(&self, ctx: &RequestContext, parts: &Parts, _body: Body) -> Result<HttpResponse> {
        let token = codec::lock_token(parts)?
            .ok_or_else(|| DavError::BadRequest("UNLOCK requires a Lock-Token".into()))?;
        let res = ctx.resource().await?;
        conditional::check(ctx, parts, Some(res.as_ref())).await?;

        let lock = res
            .locks()
            .await?
            .into_iter()
            .find(|l| l.token == token && !l.provisional);
        let lock = match lock {
            Some(l) => l,
            None => {
                tracing::debug!(path=%ctx.path, token=%token, "token does not lock the resource");
                return codec::serialize(
                    StatusCode::CONFLICT,
                    &Violation::LockTokenMatchesRequestUri.qwrite(),
                )
                .await;
            }
        };
        if lock.username != ctx.user.username {
            return Err(DavError::Forbidden(format!(
                "lock is owned by {}",
                lock.username
            )));
        }

        res.delete_lock(&lock.token).await?;
        ctx.mount.locks.release();
        tracing::info!(token=%lock.token, root=%lock.root, "lock removed");
        Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(empty_body())?)
    }
}
