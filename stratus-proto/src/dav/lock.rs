use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;

use stratus_dav::types::{ActiveLock, Href, LockScope};
use stratus_store::resource::encode_path;
use stratus_store::{DavError, Lock, Result, User};

use super::router::Mount;

/// How long a LOCK request waits for concurrent LOCK requests to settle
pub const WAIT_CEILING: Duration = Duration::from_secs(60);

/// What the lock state lets a request do on a resource.
///
/// For LOCK requests `Denied` means an exclusive lock is already set,
/// `SharedOnly` that shared locks are. For every other method `Denied`
/// means a lock the caller did not submit covers the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPermission {
    Denied,
    /// The membership of the parent collection is locked: the content may
    /// change but the resource can not be created, deleted or renamed
    ContentOnly,
    Full,
    /// Only a shared lock may be added
    SharedOnly,
}

impl LockPermission {
    pub fn allows_content(&self) -> bool {
        matches!(self, Self::ContentOnly | Self::Full)
    }
}

/// Locks that apply to one path, expired ones removed
#[derive(Debug, Clone, Default)]
pub struct LockSet {
    /// Committed locks set on the resource itself
    pub direct: Vec<Lock>,
    /// Committed depth infinity locks of ancestors
    pub inherited: Vec<Lock>,
    /// Committed depth 0 locks of the parent collection
    pub members: Vec<Lock>,
    /// Provisional locks on the resource or its ancestors
    pub pending: Vec<Lock>,
}

impl LockSet {
    pub fn resource_locks(&self) -> impl Iterator<Item = &Lock> {
        self.direct.iter().chain(self.inherited.iter())
    }
}

/// Collections above `path`, nearest first, up to the mount root
pub fn ancestors(mount: &Mount, path: &str) -> Vec<String> {
    let mut out = vec![];
    if mount.is_root(path) {
        return out;
    }
    let mut current = path.trim_end_matches('/');
    while let Some((parent, _)) = current.rsplit_once('/') {
        let parent_path = format!("{}/", parent);
        let done = mount.is_root(&parent_path);
        out.push(parent_path);
        if done {
            break;
        }
        current = parent;
    }
    out
}

/// Gather the locks applying to `path`, lazily deleting expired ones
pub async fn lock_set(mount: &Mount, path: &str) -> Result<LockSet> {
    let now = Utc::now();
    let mut set = LockSet::default();

    let mut levels = vec![path.to_string()];
    levels.extend(ancestors(mount, path));
    for (distance, level) in levels.iter().enumerate() {
        let handle = mount.handle(level).await?;
        for lock in handle.locks().await? {
            if lock.is_expired(now) {
                tracing::debug!(token=%lock.token, root=%lock.root, "lock expired");
                handle.delete_lock(&lock.token).await?;
                continue;
            }
            if lock.provisional {
                set.pending.push(lock);
                continue;
            }
            match distance {
                0 => set.direct.push(lock),
                d if lock.covers(d) => set.inherited.push(lock),
                1 => set.members.push(lock),
                _ => (),
            }
        }
    }
    Ok(set)
}

/// Lock permission decision, see [`LockPermission`].
///
/// A lock is held by the caller when it belongs to them and its token was
/// submitted.
pub fn permission(set: &LockSet, user: &User, tokens: &[String], lock_method: bool) -> LockPermission {
    let held = |l: &Lock| l.username == user.username && tokens.iter().any(|t| t == &l.token);

    if lock_method {
        if set.resource_locks().any(|l| l.scope == LockScope::Exclusive) {
            return LockPermission::Denied;
        }
        if set.resource_locks().next().is_some() {
            return LockPermission::SharedOnly;
        }
    } else if set.resource_locks().any(|l| !held(l)) {
        return LockPermission::Denied;
    }

    if set.members.iter().any(|l| !held(l)) {
        return LockPermission::ContentOnly;
    }
    LockPermission::Full
}

/// Permission of `user` on `path` of `mount`
pub async fn permission_on(mount: &Mount, path: &str, user: &User, tokens: &[String]) -> Result<LockPermission> {
    let set = lock_set(mount, path).await?;
    Ok(permission(&set, user, tokens, false))
}

/// Active locks of `path`, as shown by the lockdiscovery property
pub async fn discovery(mount: &Mount, path: &str) -> Result<Vec<ActiveLock>> {
    let now = Utc::now();
    let set = lock_set(mount, path).await?;
    Ok(set
        .resource_locks()
        .map(|l| l.active(Href(encode_path(&l.root)), now))
        .collect())
}

/// Serializes the creation of provisional locks inside a mount
#[derive(Default)]
pub struct LockManager {
    gate: Mutex<()>,
    released: Notify,
}

impl LockManager {
    /// Wait until no provisional lock sits on `path` or above it.
    ///
    /// Returns the gate, held until the caller saved its own provisional
    /// lock, along with the current lock set. Gives up with
    /// `ServiceUnavailable` after [`WAIT_CEILING`].
    pub async fn acquire(&self, mount: &Mount, path: &str) -> Result<(MutexGuard<'_, ()>, LockSet)> {
        let deadline = Instant::now() + WAIT_CEILING;
        let mut attempts = 0u32;
        loop {
            let released = self.released.notified();
            let guard = self.gate.lock().await;
            let set = lock_set(mount, path).await?;
            if set.pending.is_empty() {
                return Ok((guard, set));
            }
            drop(guard);

            attempts += 1;
            let backoff = Duration::from_millis(rand::thread_rng().gen_range(100..=500));
            if Instant::now() + backoff > deadline {
                tracing::warn!(path, attempts, "provisional locks did not settle");
                return Err(DavError::ServiceUnavailable);
            }
            tracing::debug!(path, attempts, ?backoff, "waiting for provisional locks");
            tokio::select! {
                _ = released => (),
                _ = tokio::time::sleep(backoff) => (),
            }
        }
    }

    /// Wake up requests waiting in [`LockManager::acquire`]
    pub fn release(&self) {
        self.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stratus_dav::types::Depth;
    use stratus_store::memory::MemoryAdapter;
    use stratus_user::login::anonymous::AnonymousAuthenticator;

    fn lock(token: &str, user: &str, scope: LockScope, depth: Depth) -> Lock {
        let mut l = Lock::new(token, user, "/x");
        l.scope = scope;
        l.depth = depth;
        l.provisional = false;
        l
    }

    fn mount() -> Mount {
        Mount::new(
            "/",
            Arc::new(MemoryAdapter::new()),
            Arc::new(AnonymousAuthenticator::new("Test")),
        )
    }

    #[test]
    fn ancestors_stop_at_mount_root() {
        let m = mount();
        assert_eq!(ancestors(&m, "/a/b/c"), vec!["/a/b/", "/a/", "/"]);
        assert_eq!(ancestors(&m, "/a/"), vec!["/"]);
        assert!(ancestors(&m, "/").is_empty());

        let m = Mount::new("/dav/", Arc::new(MemoryAdapter::new()), Arc::new(AnonymousAuthenticator::new("Test")));
        assert_eq!(ancestors(&m, "/dav/a/b"), vec!["/dav/a/", "/dav/"]);
    }

    #[test]
    fn permission_for_regular_methods() {
        let alice = User::new("alice");
        let tok = vec!["t1".to_string()];
        let mut set = LockSet::default();
        assert_eq!(permission(&set, &alice, &[], false), LockPermission::Full);

        set.direct.push(lock("t1", "alice", LockScope::Exclusive, Depth::Zero));
        assert_eq!(permission(&set, &alice, &[], false), LockPermission::Denied);
        assert_eq!(permission(&set, &alice, &tok, false), LockPermission::Full);
        assert_eq!(permission(&set, &User::new("bob"), &tok, false), LockPermission::Denied);

        let mut set = LockSet::default();
        set.members.push(lock("t1", "alice", LockScope::Exclusive, Depth::Zero));
        assert_eq!(permission(&set, &alice, &[], false), LockPermission::ContentOnly);
        assert_eq!(permission(&set, &alice, &tok, false), LockPermission::Full);
    }

    #[test]
    fn permission_for_lock_method() {
        let alice = User::new("alice");
        let mut set = LockSet::default();
        set.inherited.push(lock("t1", "bob", LockScope::Shared, Depth::Infinity));
        assert_eq!(permission(&set, &alice, &[], true), LockPermission::SharedOnly);

        set.direct.push(lock("t2", "alice", LockScope::Exclusive, Depth::Zero));
        assert_eq!(permission(&set, &alice, &["t2".into()], true), LockPermission::Denied);
    }

    #[tokio::test]
    async fn lock_set_levels_and_expiry() {
        let m = mount();
        let user = User::new("alice");
        let adapter = m.adapter.clone();
        adapter.new_collection("/a/", "/").await.unwrap().create(&user).await.unwrap();

        let parent = m.handle("/a/").await.unwrap();
        let mut zero = parent.create_lock_for_user(&user).await.unwrap();
        zero.provisional = false;
        parent.save_lock(&zero).await.unwrap();

        let root = m.handle("/").await.unwrap();
        let mut infinite = root.create_lock_for_user(&user).await.unwrap();
        infinite.provisional = false;
        infinite.depth = Depth::Infinity;
        infinite.scope = LockScope::Shared;
        root.save_lock(&infinite).await.unwrap();

        let mut expired = root.create_lock_for_user(&user).await.unwrap();
        expired.provisional = false;
        expired.depth = Depth::Infinity;
        expired.timeout = Some(Duration::from_secs(1));
        expired.date = Utc::now() - chrono::Duration::seconds(5);
        root.save_lock(&expired).await.unwrap();

        let set = lock_set(&m, "/a/file").await.unwrap();
        assert!(set.direct.is_empty());
        assert_eq!(set.members.len(), 1);
        assert_eq!(set.members[0].token, zero.token);
        assert_eq!(set.inherited.len(), 1);
        assert_eq!(set.inherited[0].token, infinite.token);
        assert_eq!(root.locks().await.unwrap().len(), 1);

        let discovered = discovery(&m, "/a/").await.unwrap();
        assert_eq!(discovered.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_gives_up_after_the_ceiling() {
        let m = mount();
        let root = m.handle("/").await.unwrap();
        let stuck = root.create_lock_for_user(&User::new("alice")).await.unwrap();
        root.save_lock(&stuck).await.unwrap();

        let started = Instant::now();
        let outcome = m.locks.acquire(&m, "/file").await;
        assert!(matches!(outcome, Err(DavError::ServiceUnavailable)));
        assert!(started.elapsed() >= WAIT_CEILING - Duration::from_millis(500));
        assert!(started.elapsed() <= WAIT_CEILING);
    }

    #[tokio::test]
    async fn acquire_waits_for_provisional_locks() {
        let m = Arc::new(mount());
        let user = User::new("alice");
        let root = m.handle("/").await.unwrap();
        let pending = root.create_lock_for_user(&user).await.unwrap();
        root.save_lock(&pending).await.unwrap();

        let waiter = {
            let m = m.clone();
            tokio::spawn(async move {
                let (_guard, set) = m.locks.acquire(&m, "/file").await.unwrap();
                set.pending.len()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        root.delete_lock(&pending.token).await.unwrap();
        m.locks.release();
        assert_eq!(waiter.await.unwrap(), 0);
    }
}
