use std::sync::Arc;

use async_trait::async_trait;
use http::request::Parts;
use http::{Response, StatusCode};

use stratus_dav::multistatus::MultiStatus;
use stratus_dav::types::{Depth, Instruction};
use stratus_dav::xml::QWrite;
use stratus_store::{DavError, Resource, Result};

use super::{
    authorize, delete_one, delete_tree, failure, is_below, require_unlocked, undeletable, verb,
    with_kind, DavMethod,
};
use crate::dav::codec::{self, empty_body, Body, HttpResponse};
use crate::dav::conditional;
use crate::dav::context::RequestContext;
use crate::dav::lock::{self as locks, LockPermission};
use crate::dav::router::Mount;

/// COPY, and MOVE when `remove_source` is set
pub struct CopyMoveMethod {
    pub remove_source: bool,
}

/// One resource to transfer
struct Job {
    src: Box<dyn Resource>,
    dest: String,
    top: bool,
}

/// Settings shared by every job of a request
struct Transfer<'a> {
    ctx: &'a RequestContext,
    dest_mount: Arc<Mount>,
    tokens: Vec<String>,
    depth: Depth,
    overwrite: bool,
    remove_source: bool,
}

#[async_trait]
impl DavMethod for CopyMoveMethod {
    async fn run(&self, ctx: &RequestContext, parts: &Parts, _body: Body) -> Result<HttpResponse> {
        let verb_name = match self.remove_source {
            true => "MOVE",
            false => "COPY",
        };
        let dest = codec::destination(parts)?
            .ok_or_else(|| DavError::BadRequest(format!("{} requires a Destination", verb_name)))?;
        let depth = codec::depth(parts, Depth::Infinity)?;
        if depth == Depth::One || (self.remove_source && depth == Depth::Zero) {
            return Err(DavError::BadRequest(format!("invalid Depth for {}", verb_name)));
        }
        let overwrite = codec::overwrite(parts)?;

        let src = ctx.resource().await?;
        let src_path = src.canonical_path();
        let collection = src.is_collection().await?;
        let dest = with_kind(&dest, collection);
        let dest_mount = ctx
            .router
            .resolve(&dest)
            .ok_or_else(|| DavError::BadGateway(dest.clone()))?;

        if dest == src_path || is_below(&dest, &src_path) || is_below(&src_path, &dest) {
            return Err(DavError::Forbidden("source and destination overlap".into()));
        }
        if self.remove_source && ctx.mount.is_root(&src_path) {
            return Err(DavError::Forbidden("the mount root can not be moved".into()));
        }
        conditional::check(ctx, parts, Some(src.as_ref())).await?;
        if self.remove_source {
            require_unlocked(ctx, &ctx.mount, &src_path, parts, false).await?;
        }

        let existing = dest_mount.lookup(&dest).await?;
        if existing.is_some() && !overwrite {
            return Err(DavError::PreconditionFailed);
        }
        require_unlocked(ctx, &dest_mount, &dest, parts, false).await?;
        authorize(&dest_mount, &dest, &kind_verb(collection)?, &ctx.user).await?;

        let transfer = Transfer {
            ctx,
            dest_mount,
            tokens: conditional::submitted_tokens(parts)?,
            depth,
            overwrite,
            remove_source: self.remove_source,
        };
        let replaced = existing.is_some();
        if let Some(target) = existing {
            let blocked = transfer.clear(target, collection).await?;
            if !blocked.is_empty() {
                tracing::debug!(dest=%dest, blocked = blocked.len(), "destination can not be replaced");
                return codec::serialize(StatusCode::MULTI_STATUS, &blocked.qwrite()).await;
            }
        }

        let ms = transfer.run(src, dest).await?;
        tracing::debug!(from=%src_path, verb=verb_name, failures = ms.len(), "transfer done");
        if !ms.is_empty() {
            return codec::serialize(StatusCode::MULTI_STATUS, &ms.qwrite()).await;
        }
        let status = match replaced {
            true => StatusCode::NO_CONTENT,
            false => StatusCode::CREATED,
        };
        Ok(Response::builder().status(status).body(empty_body())?)
    }
}

/// Authorization asked on the destination
fn kind_verb(collection: bool) -> Result<http::Method> {
    match collection {
        true => verb("MKCOL"),
        false => Ok(http::Method::PUT),
    }
}

impl<'a> Transfer<'a> {
    /// Make room at the destination, members of a collection are removed
    /// unless locked.
    ///
    /// A collection replaced by a file goes as a whole or not at all: the
    /// members blocking it are returned and nothing is deleted.
    async fn clear(&self, target: Box<dyn Resource>, src_collection: bool) -> Result<MultiStatus> {
        let user = &self.ctx.user;
        let target_collection = target.is_collection().await?;
        if target_collection && !src_collection {
            let blocked = undeletable(self.ctx, &self.dest_mount, target.as_ref(), &self.tokens).await?;
            if !blocked.is_empty() {
                return Ok(blocked);
            }
        }
        if target_collection {
            let members = match target.internal_members(user).await {
                Ok(m) => m,
                Err(DavError::Unauthorized) | Err(DavError::Forbidden(_)) => vec![],
                Err(e) => return Err(e),
            };
            for member in members {
                delete_tree(self.ctx, &self.dest_mount, member, &self.tokens, None).await?;
            }
        }
        if !src_collection || !target_collection {
            delete_one(self.ctx, &self.dest_mount, target.as_ref(), &self.tokens).await?;
        }
        Ok(MultiStatus::new())
    }

    async fn run(&self, src: Box<dyn Resource>, dest: String) -> Result<MultiStatus> {
        let mut ms = MultiStatus::new();
        let mut failed: Vec<String> = vec![];
        let mut emptied: Vec<Box<dyn Resource>> = vec![];

        let mut stack = vec![Job { src, dest, top: true }];
        while let Some(job) = stack.pop() {
            match self.one(&job).await {
                Ok(Some(children)) => {
                    stack.extend(children);
                    if self.remove_source {
                        emptied.push(job.src);
                    }
                }
                Ok(None) => (),
                Err(e) if job.top => return Err(e),
                Err(e) => {
                    tracing::debug!(dest=%job.dest, err=%e, "transfer failed");
                    ms.add_status(failure(&job.dest, &e));
                    failed.push(job.src.canonical_path());
                }
            }
        }

        // Source collections of a MOVE, deepest first
        for res in emptied.into_iter().rev() {
            let path = res.canonical_path();
            if failed.iter().any(|f| f == &path || is_below(f, &path)) {
                continue;
            }
            if let Err(e) = delete_one(self.ctx, &self.ctx.mount, res.as_ref(), &self.tokens).await {
                ms.add_status(failure(&path, &e));
                failed.push(path);
            }
        }
        Ok(ms)
    }

    /// Transfer a single resource. Collections return the jobs of their
    /// members, `None` means nothing is left to do.
    async fn one(&self, job: &Job) -> Result<Option<Vec<Job>>> {
        let ctx = self.ctx;
        let user = &ctx.user;
        let src = job.src.as_ref();
        let src_path = src.canonical_path();
        let collection = src.is_collection().await?;
        let mount = &self.dest_mount;

        if !job.top {
            authorize(mount, &job.dest, &kind_verb(collection)?, user).await?;
            if mount.lookup(&job.dest).await?.is_some() {
                if !self.overwrite {
                    return Err(DavError::PreconditionFailed);
                }
                if locks::permission_on(mount, &job.dest, user, &self.tokens).await? != LockPermission::Full {
                    return Err(DavError::Locked);
                }
            }
            if self.remove_source
                && locks::permission_on(&ctx.mount, &src_path, user, &self.tokens).await? != LockPermission::Full
            {
                return Err(DavError::Locked);
            }
        }

        if Arc::ptr_eq(&ctx.mount, mount) {
            if self.remove_source && !collection {
                src.move_to(&job.dest, &mount.prefix, user).await?;
                return Ok(None);
            }
            src.copy(&job.dest, &mount.prefix, user).await?;
        } else {
            self.copy_across(src, &job.dest, collection).await?;
            if self.remove_source && !collection {
                delete_one(ctx, &ctx.mount, src, &self.tokens).await?;
                return Ok(None);
            }
        }

        if !collection {
            return Ok(None);
        }
        if self.depth == Depth::Zero {
            return Ok(Some(vec![]));
        }
        let members = match src.internal_members(user).await {
            Ok(m) => m,
            Err(DavError::Unauthorized) | Err(DavError::Forbidden(_)) => {
                tracing::debug!(path=%src_path, "members hidden, not transferred");
                vec![]
            }
            Err(e) => return Err(e),
        };
        let base = with_kind(&job.dest, true);
        Ok(Some(
            members
                .into_iter()
                .map(|m| {
                    let dest = with_kind(&format!("{}{}", base, m.canonical_name()), m.canonical_path().ends_with('/'));
                    Job { src: m, dest, top: false }
                })
                .collect(),
        ))
    }

    /// Copy between two adapters: content, media type and dead properties
    async fn copy_across(&self, src: &dyn Resource, dest: &str, collection: bool) -> Result<()> {
        let user = &self.ctx.user;
        let mount = &self.dest_mount;
        let target = match mount.lookup(dest).await? {
            Some(t) => t,
            None => {
                let t = match collection {
                    true => mount.adapter.new_collection(dest, &mount.prefix).await?,
                    false => mount.adapter.new_resource(dest, &mount.prefix).await?,
                };
                t.create(user).await?;
                t
            }
        };
        if !collection {
            let content = src.stream(None, user).await?;
            target.set_stream(content, src.media_type().await?, user).await?;
        }

        let from = src.properties().await?;
        let mut instructions = vec![];
        for name in from.list_dead().await? {
            let value = from.get_by_user(&name, user).await?;
            instructions.push(Instruction::Set(name, value));
        }
        if instructions.is_empty() {
            return Ok(());
        }
        let to = target.properties().await?;
        if let Some(errors) = to.run_instructions_by_user(&instructions, user).await? {
            tracing::warn!(dest, refused = errors.len(), "dead properties not copied");
        }
        Ok(())
    }
}
