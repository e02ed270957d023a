use std::collections::VecDeque;

use async_trait::async_trait;
use http::request::Parts;
use http::StatusCode;

use stratus_dav::encoder;
use stratus_dav::multistatus::{MultiStatus, PropStat, Status};
use stratus_dav::types::{Depth, PropFind, PropValue};
use stratus_dav::xml::QWrite;
use stratus_store::resource::encode_path;
use stratus_store::{DavError, Properties, Resource, Result};

use super::{authorize, DavMethod};
use crate::dav::codec::{self, Body, HttpResponse};
use crate::dav::conditional;
use crate::dav::context::RequestContext;
use crate::dav::error::status_of;
use crate::dav::lock;
use crate::dav::router::Mount;

const LOCKDISCOVERY: &str = "lockdiscovery";

pub struct PropfindMethod;

#[async_trait]
impl DavMethod for PropfindMethod {
    async fn run(&self, ctx: &RequestContext, parts: &Parts, body: Body) -> Result<HttpResponse> {
        let depth = codec::depth(parts, Depth::Infinity)?;
        let request = codec::deserialize::<PropFind>(body, ctx.options.max_xml_body)
            .await?
            .unwrap_or(PropFind::AllProp(vec![]));

        let root = ctx.resource().await?;
        conditional::check(ctx, parts, Some(root.as_ref())).await?;

        let mut ms = MultiStatus::new();
        let mut queue: VecDeque<(Box<dyn Resource>, usize)> = VecDeque::from([(root, 0)]);
        while let Some((res, level)) = queue.pop_front() {
            let path = res.canonical_path();
            let mount = ctx.mount_of(&path)?;
            if let Err(e) = authorize(&mount, &path, &parts.method, &ctx.user).await {
                ms.add_status(Status::new(encode_path(&path), status_of(&e)));
                continue;
            }
            ms.add_status(describe(ctx, &mount, res.as_ref(), &request).await?);

            let descend = match depth {
                Depth::Zero => false,
                Depth::One => level == 0,
                Depth::Infinity => true,
            };
            if descend && res.is_collection().await? {
                match res.internal_members(&ctx.user).await {
                    Ok(members) => queue.extend(members.into_iter().map(|m| (m, level + 1))),
                    Err(DavError::Unauthorized) | Err(DavError::Forbidden(_)) => {
                        tracing::debug!(path=%path, "members hidden from listing");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::debug!(path=%ctx.path, responses = ms.len(), "propfind");
        codec::serialize(StatusCode::MULTI_STATUS, &ms.qwrite()).await
    }
}

/// Code a property lookup failure is reported under
fn bucket(err: &DavError) -> StatusCode {
    match err {
        DavError::PropertyNotFound | DavError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
        DavError::Forbidden(_) | DavError::PropertyIsProtected => StatusCode::FORBIDDEN,
        DavError::Unauthorized => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn lockdiscovery(mount: &Mount, path: &str) -> Result<PropValue> {
    let active = lock::discovery(mount, path).await?;
    Ok(PropValue::of(&encoder::lockdiscovery(&active)))
}

/// The response entry of one resource
async fn describe(ctx: &RequestContext, mount: &Mount, res: &dyn Resource, request: &PropFind) -> Result<Status> {
    let path = res.canonical_path();
    let props = res.properties().await?;
    let mut status = Status::new(encode_path(&path), StatusCode::OK);

    match request {
        PropFind::PropName => {
            let mut names = props.list_by_user(&ctx.user).await?;
            names.push(LOCKDISCOVERY.to_string());
            let found = names
                .into_iter()
                .fold(PropStat::new(StatusCode::OK), |acc, n| acc.with_prop(n, None));
            status.add_propstat(found);
        }
        PropFind::AllProp(include) => {
            let mut found = PropStat::new(StatusCode::OK);
            for (name, value) in props.get_all_by_user(&ctx.user).await? {
                found = found.with_prop(name, Some(value));
            }
            found = found.with_prop(LOCKDISCOVERY, Some(lockdiscovery(mount, &path).await?));
            status.add_propstat(found);
            for name in include.iter() {
                if status.propstats().iter().any(|p| p.names().any(|n| n == name)) {
                    continue;
                }
                status.add_propstat(lookup(ctx, mount, res, props.as_ref(), name).await);
            }
        }
        PropFind::Prop(names) => {
            for name in names.iter() {
                status.add_propstat(lookup(ctx, mount, res, props.as_ref(), name).await);
            }
        }
    }
    Ok(status)
}

async fn lookup(
    ctx: &RequestContext,
    mount: &Mount,
    res: &dyn Resource,
    props: &dyn Properties,
    name: &str,
) -> PropStat {
    let value = match name {
        LOCKDISCOVERY => lockdiscovery(mount, &res.canonical_path()).await,
        _ => props.get_by_user(name, &ctx.user).await,
    };
    match value {
        Ok(v) => PropStat::new(StatusCode::OK).with_prop(name, Some(v)),
        Err(e) => {
            let code = bucket(&e);
            if code == StatusCode::INTERNAL_SERVER_ERROR {
                tracing::error!(name, err=%e, "property lookup failed");
            }
            PropStat::new(code).with_prop(name, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_failures_are_bucketed() {
        assert_eq!(bucket(&DavError::PropertyNotFound), StatusCode::NOT_FOUND);
        assert_eq!(bucket(&DavError::PropertyIsProtected), StatusCode::FORBIDDEN);
        assert_eq!(bucket(&DavError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(bucket(&DavError::Locked), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
