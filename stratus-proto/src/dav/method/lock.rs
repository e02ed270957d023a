use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use http::request::Parts;
use http::{HeaderValue, StatusCode};

use stratus_dav::encoder;
use stratus_dav::multistatus::{MultiStatus, Status};
use stratus_dav::types::{Depth, Href, LockInfo, LockScope, Timeout, Violation};
use stratus_dav::xml::{QRead, QWrite};
use stratus_store::resource::encode_path;
use stratus_store::{DavError, Lock, Resource, Result};

use super::{authorize, DavMethod};
use crate::dav::codec::{self, Body, HttpResponse};
use crate::dav::conditional;
use crate::dav::context::{DavOptions, RequestContext};
use crate::dav::lock::{self as locks, LockPermission};
use crate::dav::router::Mount;

pub struct LockMethod;

#[async_trait]
impl DavMethod for LockMethod {
    async fn run(&self, ctx: &RequestContext, parts: &Parts, body: Body) -> Result<HttpResponse> {
        let depth = codec::depth(parts, Depth::Infinity)?;
        if depth == Depth::One {
            return Err(DavError::BadRequest("LOCK accepts Depth 0 or infinity".into()));
        }
        let timeout = negotiate_timeout(&codec::timeouts(parts)?, &ctx.options);

        let info = codec::read_xml(body, ctx.options.max_xml_body).await?;
        let existing = ctx.mount.lookup(&ctx.path).await?;
        let checked = conditional::check(ctx, parts, existing.as_deref()).await;

        match info {
            None => match checked {
                Err(DavError::PreconditionFailed) => refresh_refused(ctx).await,
                Err(e) => Err(e),
                Ok(()) => refresh(ctx, parts, timeout).await,
            },
            Some(root) => {
                checked?;
                let info = LockInfo::qread(&root)?;
                create(ctx, parts, info, depth, timeout, existing).await
            }
        }
    }
}

/// Lifetime granted for the first `Timeout` entry the client sent
fn negotiate_timeout(requested: &[Timeout], options: &DavOptions) -> Option<Duration> {
    match requested.first() {
        None | Some(Timeout::Infinite) => options.max_lock_timeout,
        Some(Timeout::Seconds(secs)) => {
            let wanted = Duration::from_secs(*secs as u64).max(options.min_lock_timeout);
            Some(options.max_lock_timeout.map_or(wanted, |max| wanted.min(max)))
        }
    }
}

/// Whether a new lock of `scope` may be set under `permission`
fn grants(permission: LockPermission, scope: LockScope, exists: bool) -> bool {
    match permission {
        LockPermission::Full => true,
        LockPermission::SharedOnly => scope == LockScope::Shared,
        LockPermission::ContentOnly => exists,
        LockPermission::Denied => false,
    }
}

async fn respond(status: StatusCode, lock: &Lock) -> Result<HttpResponse> {
    let active = lock.active(Href(encode_path(&lock.root)), Utc::now());
    let mut response = codec::serialize(status, &encoder::lock_response(&[active])).await?;
    let token: HeaderValue = format!("<{}>", lock.token)
        .parse()
        .map_err(anyhow::Error::from)?;
    response.headers_mut().insert("Lock-Token", token);
    Ok(response)
}

async fn refresh(ctx: &RequestContext, parts: &Parts, timeout: Option<Duration>) -> Result<HttpResponse> {
    let tokens = conditional::submitted_tokens(parts)?;
    let set = locks::lock_set(&ctx.mount, &ctx.path).await?;
    let found = set
        .resource_locks()
        .find(|l| l.username == ctx.user.username && tokens.contains(&l.token))
        .cloned();

    let mut lock = match found {
        Some(l) => l,
        None => return refresh_refused(ctx).await,
    };
    lock.date = Utc::now();
    lock.timeout = timeout;
    ctx.mount.handle(&lock.root).await?.save_lock(&lock).await?;
    tracing::info!(token=%lock.token, root=%lock.root, ?timeout, "lock refreshed");
    respond(StatusCode::OK, &lock).await
}

/// A refresh without a matching lock: 412 for the request URI
async fn refresh_refused(ctx: &RequestContext) -> Result<HttpResponse> {
    tracing::debug!(path=%ctx.path, "no lock to refresh");
    let mut ms = MultiStatus::new();
    ms.add_status(Status::new(encode_path(&ctx.path), StatusCode::PRECONDITION_FAILED));
    codec::serialize(StatusCode::MULTI_STATUS, &ms.qwrite()).await
}

async fn create(
    ctx: &RequestContext,
    parts: &Parts,
    info: LockInfo,
    depth: Depth,
    timeout: Option<Duration>,
    existing: Option<Box<dyn Resource>>,
) -> Result<HttpResponse> {
    let mount = &ctx.mount;
    let tokens = conditional::submitted_tokens(parts)?;
    let exists = existing.is_some();

    let (guard, set) = mount.locks.acquire(mount, &ctx.path).await?;
    let permission = locks::permission(&set, &ctx.user, &tokens, true);
    if !grants(permission, info.lockscope, exists) {
        tracing::debug!(path=%ctx.path, ?permission, "lock refused");
        return Err(DavError::Locked);
    }

    let target = match existing {
        Some(res) => res,
        None => mount.handle(&ctx.path).await?,
    };
    let mut lock = target.create_lock_for_user(&ctx.user).await?;
    lock.scope = info.lockscope;
    lock.depth = depth;
    lock.owner = info.owner;
    lock.timeout = timeout;
    lock.provisional = true;
    target.save_lock(&lock).await?;
    let provisional = Provisional::new(mount.clone(), &lock);
    drop(guard);

    let outcome = validate(ctx, parts, &tokens, target.as_ref(), &lock, exists).await;
    let conflicts = match outcome {
        Ok(ms) => ms,
        Err(e) => {
            provisional.abandon().await;
            return Err(e);
        }
    };
    if !conflicts.is_empty() {
        provisional.abandon().await;
        tracing::debug!(path=%ctx.path, conflicts = conflicts.len(), "lock conflicts below target");
        return codec::serialize(StatusCode::MULTI_STATUS, &conflicts.qwrite()).await;
    }

    if !exists {
        if let Err(e) = target.create(&ctx.user).await {
            provisional.abandon().await;
            return Err(e);
        }
    }
    lock.provisional = false;
    if let Err(e) = target.save_lock(&lock).await {
        provisional.abandon().await;
        return Err(e);
    }
    provisional.commit();

    tracing::info!(token=%lock.token, root=%lock.root, scope=lock.scope.as_str(), depth=lock.depth.as_str(), "lock granted");
    match exists {
        true => respond(StatusCode::OK, &lock).await,
        false => respond(StatusCode::CREATED, &lock).await,
    }
}

/// A saved provisional lock. It is deleted when the guard goes away
/// without [`Provisional::commit`], including when the request future is
/// dropped halfway.
struct Provisional {
    mount: Arc<Mount>,
    root: String,
    token: String,
    armed: bool,
}

impl Provisional {
    fn new(mount: Arc<Mount>, lock: &Lock) -> Self {
        Self {
            mount,
            root: lock.root.clone(),
            token: lock.token.clone(),
            armed: true,
        }
    }

    async fn abandon(mut self) {
        self.armed = false;
        discard(&self.mount, &self.root, &self.token).await;
    }

    /// The lock was saved as committed
    fn commit(mut self) {
        self.armed = false;
        self.mount.locks.release();
    }
}

impl Drop for Provisional {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (mount, root, token) = (self.mount.clone(), self.root.clone(), self.token.clone());
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                tracing::debug!(token=%token, "LOCK interrupted, discarding provisional lock");
                rt.spawn(async move { discard(&mount, &root, &token).await });
            }
            Err(e) => tracing::error!(token=%token, err=%e, "provisional lock left behind"),
        }
    }
}

async fn discard(mount: &Mount, root: &str, token: &str) {
    let deleted = match mount.handle(root).await {
        Ok(res) => res.delete_lock(token).await,
        Err(e) => Err(e),
    };
    if let Err(e) = deleted {
        tracing::error!(token, err=%e, "unable to delete provisional lock");
    }
    mount.locks.release();
}

/// Check the provisional `lock` against the committed locks around it.
///
/// An upward conflict is an error, conflicts with members of the locked
/// collection are collected in the returned multistatus.
async fn validate(
    ctx: &RequestContext,
    parts: &Parts,
    tokens: &[String],
    target: &dyn Resource,
    lock: &Lock,
    exists: bool,
) -> Result<MultiStatus> {
    let mut ms = MultiStatus::new();
    let set = locks::lock_set(&ctx.mount, &ctx.path).await?;
    if !grants(locks::permission(&set, &ctx.user, tokens, true), lock.scope, exists) {
        return Err(DavError::Locked);
    }
    if lock.depth != Depth::Infinity || !exists || !target.is_collection().await? {
        return Ok(ms);
    }

    let now = Utc::now();
    let mut queue: VecDeque<Box<dyn Resource>> = VecDeque::new();
    queue.extend(members(ctx, target).await?);
    while let Some(res) = queue.pop_front() {
        let path = res.canonical_path();
        if let Err(e) = authorize(&ctx.mount, &path, &parts.method, &ctx.user).await {
            ms.add_status(super::failure(&path, &e));
            continue;
        }
        for other in res.locks().await? {
            if other.is_expired(now) {
                res.delete_lock(&other.token).await?;
                continue;
            }
            if other.provisional || other.token == lock.token {
                continue;
            }
            if other.scope == LockScope::Exclusive || lock.scope == LockScope::Exclusive {
                ms.add_status(
                    Status::new(encode_path(&path), StatusCode::LOCKED)
                        .with_error(Violation::NoConflictingLock(vec![Href(encode_path(&other.root))])),
                );
                break;
            }
        }
        if res.is_collection().await? {
            queue.extend(members(ctx, res.as_ref()).await?);
        }
    }

    if !ms.is_empty() {
        ms.add_status(Status::new(
            encode_path(&target.canonical_path()),
            StatusCode::FAILED_DEPENDENCY,
        ));
    }
    Ok(ms)
}

/// Members of a collection, an unreadable listing counts as empty
async fn members(ctx: &RequestContext, res: &dyn Resource) -> Result<Vec<Box<dyn Resource>>> {
    match res.internal_members(&ctx.user).await {
        Ok(m) => Ok(m),
        Err(DavError::Unauthorized) | Err(DavError::Forbidden(_)) => Ok(vec![]),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_store::memory::MemoryAdapter;
    use stratus_store::User;
    use stratus_user::login::anonymous::AnonymousAuthenticator;

    #[test]
    fn timeouts_are_clamped() {
        let options = DavOptions::default();
        assert_eq!(negotiate_timeout(&[], &options), Some(Duration::from_secs(3 * 3600)));
        assert_eq!(negotiate_timeout(&[Timeout::Infinite], &options), Some(Duration::from_secs(3 * 3600)));
        assert_eq!(negotiate_timeout(&[Timeout::Seconds(1)], &options), Some(Duration::from_secs(10)));
        assert_eq!(negotiate_timeout(&[Timeout::Seconds(600), Timeout::Infinite], &options), Some(Duration::from_secs(600)));

        let unbounded = DavOptions {
            max_lock_timeout: None,
            ..DavOptions::default()
        };
        assert_eq!(negotiate_timeout(&[Timeout::Infinite], &unbounded), None);
        assert_eq!(negotiate_timeout(&[Timeout::Seconds(99999)], &unbounded), Some(Duration::from_secs(99999)));
    }

    fn mount() -> Arc<Mount> {
        Arc::new(Mount::new(
            "/",
            Arc::new(MemoryAdapter::new()),
            Arc::new(AnonymousAuthenticator::new("Test")),
        ))
    }

    async fn saved_provisional(mount: &Mount) -> Lock {
        let root = mount.handle("/").await.unwrap();
        let lock = root.create_lock_for_user(&User::new("alice")).await.unwrap();
        assert!(lock.provisional);
        root.save_lock(&lock).await.unwrap();
        lock
    }

    #[tokio::test]
    async fn interrupted_lock_is_discarded() {
        let mount = mount();
        let lock = saved_provisional(&mount).await;
        drop(Provisional::new(mount.clone(), &lock));

        let root = mount.handle("/").await.unwrap();
        for _ in 0..100 {
            if root.locks().await.unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(root.locks().await.unwrap().is_empty());
        let (_gate, set) = mount.locks.acquire(&mount, "/w").await.unwrap();
        assert!(set.pending.is_empty());
    }

    #[tokio::test]
    async fn abandoned_and_committed_locks() {
        let mount = mount();
        let root = mount.handle("/").await.unwrap();

        let lock = saved_provisional(&mount).await;
        Provisional::new(mount.clone(), &lock).abandon().await;
        assert!(root.locks().await.unwrap().is_empty());

        let mut lock = saved_provisional(&mount).await;
        let guard = Provisional::new(mount.clone(), &lock);
        lock.provisional = false;
        root.save_lock(&lock).await.unwrap();
        guard.commit();
        tokio::task::yield_now().await;
        assert_eq!(root.locks().await.unwrap().len(), 1);
    }

    #[test]
    fn lock_grants() {
        assert!(grants(LockPermission::Full, LockScope::Exclusive, false));
        assert!(grants(LockPermission::SharedOnly, LockScope::Shared, true));
        assert!(!grants(LockPermission::SharedOnly, LockScope::Exclusive, true));
        assert!(grants(LockPermission::ContentOnly, LockScope::Exclusive, true));
        assert!(!grants(LockPermission::ContentOnly, LockScope::Exclusive, false));
        assert!(!grants(LockPermission::Denied, LockScope::Shared, true));
    }
}
