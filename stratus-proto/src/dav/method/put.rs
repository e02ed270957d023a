use async_trait::async_trait;
use http::request::Parts;
use http::{header, Response, StatusCode};

use stratus_store::resource::encode_path;
use stratus_store::{DavError, Result};

use super::{require_unlocked, DavMethod};
use crate::dav::codec::{body_stream, empty_body, header, origin, quote_etag, Body, HttpResponse};
use crate::dav::compress;
use crate::dav::conditional;
use crate::dav::context::RequestContext;

pub struct PutMethod;

#[async_trait]
impl DavMethod for PutMethod {
    async fn run(&self, ctx: &RequestContext, parts: &Parts, body: Body) -> Result<HttpResponse> {
        if ctx.path.ends_with('/') {
            return Err(DavError::MethodNotSupported);
        }
        if header(parts, "Content-Range")?.is_some() {
            return Err(DavError::BadRequest("partial PUT is not supported".into()));
        }

        let existing = ctx.mount.lookup(&ctx.path).await?;
        if let Some(res) = &existing {
            if res.is_collection().await? {
                return Err(DavError::MethodNotSupported);
            }
        }
        conditional::check(ctx, parts, existing.as_deref()).await?;
        require_unlocked(ctx, &ctx.mount, &ctx.path, parts, existing.is_some()).await?;

        let content = compress::decode(body_stream(body), header(parts, "Content-Encoding")?)?;
        let media_type = header(parts, "Content-Type")?.map(str::to_string);

        let created = existing.is_none();
        let res = match existing {
            Some(res) => res,
            None => {
                let res = ctx.mount.adapter.new_resource(&ctx.path, &ctx.mount.prefix).await?;
                res.create(&ctx.user).await?;
                res
            }
        };

        if let Err(e) = res.set_stream(content, media_type, &ctx.user).await {
            if created {
                if let Err(cleanup) = res.delete(&ctx.user).await {
                    tracing::warn!(path=%ctx.path, err=%cleanup, "unable to remove partial resource");
                }
            }
            return Err(e);
        }

        let etag = quote_etag(&res.etag().await?);
        tracing::debug!(path=%ctx.path, created, "content stored");
        let response = Response::builder().header(header::ETAG, etag);
        match created {
            true => {
                let location = origin(parts)
                    .map(|o| res.canonical_url(&o))
                    .unwrap_or_else(|| encode_path(&res.canonical_path()));
                Ok(response
                    .status(StatusCode::CREATED)
                    .header(header::CONTENT_LOCATION, location)
                    .body(empty_body())?)
            }
            false => Ok(response.status(StatusCode::NO_CONTENT).body(empty_body())?),
        }
    }
}
