use std::time::Duration;

use chrono::{DateTime, Utc};

use stratus_dav::types::{ActiveLock, Depth, Href, LockScope, LockType, Timeout};
use stratus_dav::xml::Element;

/// A write lock as kept by a storage backend.
///
/// Locks are created provisional while a LOCK request checks for conflicts
/// and are committed once the whole locked tree has been validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Lock {
    pub token: String,
    pub date: DateTime<Utc>,
    /// `None` never expires
    pub timeout: Option<Duration>,
    pub scope: LockScope,
    pub depth: Depth,
    pub owner: Option<Element>,
    pub username: String,
    pub provisional: bool,
    /// Decoded absolute path of the locked resource
    pub root: String,
}

impl Lock {
    pub fn new(token: impl Into<String>, username: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            date: Utc::now(),
            timeout: None,
            scope: LockScope::Exclusive,
            depth: Depth::Zero,
            owner: None,
            username: username.into(),
            provisional: true,
            root: root.into(),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let timeout = self.timeout?;
        let timeout = chrono::Duration::from_std(timeout).ok()?;
        self.date.checked_add_signed(timeout)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map_or(false, |t| t <= now)
    }

    /// Remaining lifetime, rounded up to the second
    pub fn remaining(&self, now: DateTime<Utc>) -> Timeout {
        match self.expires_at() {
            None => Timeout::Infinite,
            Some(t) => {
                let millis = (t - now).num_milliseconds();
                let secs = ((millis + 999) / 1000).clamp(0, u32::MAX as i64);
                Timeout::Seconds(secs as u32)
            }
        }
    }

    /// Whether this lock applies to a resource found `distance` levels below
    /// the locked one.
    pub fn covers(&self, distance: usize) -> bool {
        match distance {
            0 => true,
            _ => self.depth == Depth::Infinity,
        }
    }

    /// Lock discovery view, `root` is the encoded href of the locked resource
    pub fn active(&self, root: Href, now: DateTime<Utc>) -> ActiveLock {
        ActiveLock {
            lockscope: self.scope,
            locktype: LockType::Write,
            depth: self.depth,
            owner: self.owner.clone(),
            timeout: Some(self.remaining(now)),
            locktoken: Some(Href(self.token.clone())),
            lockroot: root,
        }
    }
}
