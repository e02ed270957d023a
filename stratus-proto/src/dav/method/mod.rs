pub mod copy_move;
pub mod delete;
pub mod get_head;
pub mod lock;
pub mod mkcol;
pub mod options;
pub mod propfind;
pub mod proppatch;
pub mod put;
pub mod unlock;

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use http::request::Parts;
use http::{Method, StatusCode};

use stratus_dav::multistatus::{MultiStatus, Status};
use stratus_dav::types::{Href, Violation};
use stratus_store::resource::encode_path;
use stratus_store::{DavError, Resource, Result, User};

use super::codec::{Body, HttpResponse};
use super::conditional;
use super::context::RequestContext;
use super::error::status_of;
use super::lock::{self as locks, LockPermission};
use super::router::Mount;

/// Handler of one HTTP verb
#[async_trait]
pub trait DavMethod: Send + Sync {
    async fn run(&self, ctx: &RequestContext, parts: &Parts, body: Body) -> Result<HttpResponse>;
}

/// A method outside of the HTTP core set, such as MKCOL
pub fn verb(name: &str) -> Result<Method> {
    Method::from_bytes(name.as_bytes()).map_err(|e| DavError::Internal(e.into()))
}

/// The refusal matching the identity of the caller
pub fn denied(user: &User) -> DavError {
    match user.is_anonymous() {
        true => DavError::Unauthorized,
        false => DavError::Forbidden(format!("{} is not authorized", user.username)),
    }
}

pub async fn authorize(mount: &Mount, path: &str, method: &Method, user: &User) -> Result<()> {
    match mount.adapter.is_authorized(path, method, user).await? {
        true => Ok(()),
        false => Err(denied(user)),
    }
}

/// Refuse with `Locked` unless the caller may change `path`.
/// `content` accepts a locked parent membership.
pub async fn require_unlocked(ctx: &RequestContext, mount: &Mount, path: &str, parts: &Parts, content: bool) -> Result<()> {
    let tokens = conditional::submitted_tokens(parts)?;
    let permission = locks::permission_on(mount, path, &ctx.user, &tokens).await?;
    let allowed = match permission {
        LockPermission::Full => true,
        LockPermission::ContentOnly => content,
        LockPermission::Denied | LockPermission::SharedOnly => false,
    };
    match allowed {
        true => Ok(()),
        false => {
            tracing::debug!(path, ?permission, "refused by lock");
            Err(DavError::Locked)
        }
    }
}

/// Multistatus entry of a failed resource
pub fn failure(path: &str, err: &DavError) -> Status {
    let href = encode_path(path);
    match err {
        DavError::Locked => Status::new(href.clone(), StatusCode::LOCKED)
            .with_error(Violation::LockTokenSubmitted(vec![Href(href)])),
        e => Status::new(href, status_of(e)),
    }
}

/// Collections are seen with a trailing `/`, files without
pub fn with_kind(path: &str, collection: bool) -> String {
    match (collection, path.ends_with('/')) {
        (true, true) | (false, false) => path.to_string(),
        (true, false) => format!("{}/", path),
        (false, true) => path.trim_end_matches('/').to_string(),
    }
}

/// Whether `path` lies strictly below the collection `ancestor`
pub fn is_below(path: &str, ancestor: &str) -> bool {
    let ancestor = with_kind(ancestor, true);
    path.len() > ancestor.len() && path.starts_with(&ancestor)
}

/// Delete a single resource with its locks
async fn delete_one(ctx: &RequestContext, mount: &Mount, res: &dyn Resource, tokens: &[String]) -> Result<()> {
    let path = res.canonical_path();
    authorize(mount, &path, &Method::DELETE, &ctx.user).await?;
    if locks::permission_on(mount, &path, &ctx.user, tokens).await? != LockPermission::Full {
        return Err(DavError::Locked);
    }
    for lock in res.locks().await? {
        res.delete_lock(&lock.token).await?;
    }
    res.delete(&ctx.user).await
}

/// Delete a whole tree, members first.
///
/// A resource that can not be deleted keeps its ancestors alive. Failures
/// go to `report` when given. Returns whether `root` is gone.
pub async fn delete_tree(
    ctx: &RequestContext,
    mount: &Mount,
    root: Box<dyn Resource>,
    tokens: &[String],
    mut report: Option<&mut MultiStatus>,
) -> Result<bool> {
    let root_path = root.canonical_path();
    let mut kept: HashSet<String> = HashSet::new();
    let mut order: Vec<Box<dyn Resource>> = vec![];
    let mut queue = VecDeque::from([root]);
    while let Some(res) = queue.pop_front() {
        if res.is_collection().await? {
            match res.internal_members(&ctx.user).await {
                Ok(members) => queue.extend(members),
                Err(e @ (DavError::Unauthorized | DavError::Forbidden(_))) => {
                    let path = res.canonical_path();
                    tracing::debug!(path=%path, "members hidden, collection kept");
                    if let Some(ms) = report.as_deref_mut() {
                        ms.add_status(failure(&path, &e));
                    }
                    kept.extend(locks::ancestors(mount, &path));
                    kept.insert(path);
                }
                Err(e) => return Err(e),
            }
        }
        order.push(res);
    }

    let mut root_gone = false;
    for res in order.iter().rev() {
        let path = res.canonical_path();
        if kept.contains(&path) {
            continue;
        }
        match delete_one(ctx, mount, res.as_ref(), tokens).await {
            Ok(()) => {
                tracing::debug!(path=%path, "deleted");
                root_gone |= path == root_path;
            }
            Err(e) => {
                tracing::debug!(path=%path, err=%e, "delete failed");
                if let Some(ms) = report.as_deref_mut() {
                    ms.add_status(failure(&path, &e));
                }
                kept.extend(locks::ancestors(mount, &path));
            }
        }
    }
    Ok(root_gone)
}

/// Members below `root` that [`delete_tree`] would have to keep, each
/// with the reason. Nothing is deleted.
pub async fn undeletable(
    ctx: &RequestContext,
    mount: &Mount,
    root: &dyn Resource,
    tokens: &[String],
) -> Result<MultiStatus> {
    let mut ms = MultiStatus::new();
    let mut pending = vec![];
    list_members(ctx, root, &mut pending, &mut ms).await?;
    while let Some(res) = pending.pop() {
        let path = res.canonical_path();
        let refusal = match authorize(mount, &path, &Method::DELETE, &ctx.user).await {
            Err(e) => Some(e),
            Ok(()) => match locks::permission_on(mount, &path, &ctx.user, tokens).await? {
                LockPermission::Full => None,
                _ => Some(DavError::Locked),
            },
        };
        if let Some(e) = refusal {
            ms.add_status(failure(&path, &e));
        }
        list_members(ctx, res.as_ref(), &mut pending, &mut ms).await?;
    }
    Ok(ms)
}

async fn list_members(
    ctx: &RequestContext,
    res: &dyn Resource,
    into: &mut Vec<Box<dyn Resource>>,
    ms: &mut MultiStatus,
) -> Result<()> {
    if !res.is_collection().await? {
        return Ok(());
    }
    match res.internal_members(&ctx.user).await {
        Ok(members) => into.extend(members),
        Err(e @ (DavError::Unauthorized | DavError::Forbidden(_))) => {
            ms.add_status(failure(&res.canonical_path(), &e))
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths() {
        assert_eq!(with_kind("/a", true), "/a/");
        assert_eq!(with_kind("/a/", false), "/a");
        assert_eq!(with_kind("/a/", true), "/a/");
        assert!(is_below("/a/b", "/a"));
        assert!(is_below("/a/b/", "/a/"));
        assert!(!is_below("/a/", "/a"));
        assert!(!is_below("/ab", "/a"));
    }

    #[test]
    fn locked_failures_name_the_resource() {
        let st = failure("/a b", &DavError::Locked);
        assert_eq!(st.code, StatusCode::LOCKED);
        assert_eq!(st.href, "/a%20b");
        assert_eq!(st.error, Some(Violation::LockTokenSubmitted(vec![Href("/a%20b".into())])));
        assert_eq!(failure("/x", &DavError::Forbidden("no".into())).code, StatusCode::FORBIDDEN);
    }
}
