use async_trait::async_trait;
use http::request::Parts;
use http::StatusCode;

use stratus_dav::multistatus::{MultiStatus, PropStat, Status};
use stratus_dav::types::{PropertyUpdate, Violation};
use stratus_dav::xml::QWrite;
use stratus_store::resource::encode_path;
use stratus_store::{DavError, Result};

use super::{require_unlocked, DavMethod};
use crate::dav::codec::{self, Body, HttpResponse};
use crate::dav::conditional;
use crate::dav::context::RequestContext;
use crate::dav::error::status_of;

pub struct ProppatchMethod;

#[async_trait]
impl DavMethod for ProppatchMethod {
    async fn run(&self, ctx: &RequestContext, parts: &Parts, body: Body) -> Result<HttpResponse> {
        let res = ctx.resource().await?;
        conditional::check(ctx, parts, Some(res.as_ref())).await?;
        require_unlocked(ctx, &ctx.mount, &res.canonical_path(), parts, true).await?;

        let PropertyUpdate(instructions) =
            codec::deserialize::<PropertyUpdate>(body, ctx.options.max_xml_body)
                .await?
                .ok_or_else(|| DavError::BadRequest("PROPPATCH requires a body".into()))?;

        let props = res.properties().await?;
        let mut protected = props.list_live().await?;
        protected.push("lockdiscovery".to_string());
        let names: Vec<&str> = instructions.iter().map(|i| i.name()).collect();

        let mut status = Status::new(encode_path(&res.canonical_path()), StatusCode::OK);
        if names.iter().any(|n| protected.iter().any(|p| p == n)) {
            for name in names {
                status.add_propstat(match protected.iter().any(|p| p == name) {
                    true => refused(name, StatusCode::FORBIDDEN)
                        .with_error(Violation::CannotModifyProtectedProperty),
                    false => refused(name, StatusCode::FAILED_DEPENDENCY),
                });
            }
        } else {
            match props.run_instructions_by_user(&instructions, &ctx.user).await {
                Ok(None) => {
                    for name in names {
                        status.add_propstat(PropStat::new(StatusCode::OK).with_prop(name, None));
                    }
                }
                Ok(Some(errors)) => {
                    for name in names {
                        let propstat = match errors.iter().find(|(n, _)| n == name) {
                            Some((_, DavError::PropertyIsProtected)) => {
                                refused(name, StatusCode::FORBIDDEN)
                                    .with_error(Violation::CannotModifyProtectedProperty)
                            }
                            Some((_, e)) => refused(name, status_of(e)),
                            None => refused(name, StatusCode::FAILED_DEPENDENCY),
                        };
                        status.add_propstat(propstat);
                    }
                }
                Err(e) => {
                    tracing::debug!(path=%ctx.path, err=%e, "property update failed");
                    let code = status_of(&e);
                    for name in names {
                        status.add_propstat(refused(name, code));
                    }
                }
            }
        }

        let mut ms = MultiStatus::new();
        ms.add_status(status);
        codec::serialize(StatusCode::MULTI_STATUS, &ms.qwrite()).await
    }
}

fn refused(name: &str, code: StatusCode) -> PropStat {
    PropStat::new(code).with_prop(name, None)
}
