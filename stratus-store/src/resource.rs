use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::Result;
use crate::lock::Lock;
use crate::properties::Properties;
use crate::user::User;

pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Characters escaped when a decoded path is turned back into a URL path
pub const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-encode a decoded absolute path, keeping the `/` separators
pub fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH).to_string()
}

/// A handle on a stored resource, owned by exactly one adapter.
///
/// Handles may point to a resource that does not exist yet (see
/// [`crate::Adapter::new_resource`]); `create` materializes it.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Content, optionally restricted to the inclusive byte range `(start, end)`
    async fn stream(&self, range: Option<(u64, u64)>, user: &User) -> Result<ByteStream>;
    /// Replace the content
    async fn set_stream(&self, input: ByteStream, media_type: Option<String>, user: &User) -> Result<()>;

    async fn create(&self, user: &User) -> Result<()>;
    async fn delete(&self, user: &User) -> Result<()>;
    /// Copy this resource to a destination of the same adapter.
    /// Collections are copied without their members.
    async fn copy(&self, destination: &str, base: &str, user: &User) -> Result<()>;
    /// Move this resource to a destination of the same adapter
    async fn move_to(&self, destination: &str, base: &str, user: &User) -> Result<()>;

    async fn length(&self) -> Result<u64>;
    /// Strong entity tag, without the surrounding quotes
    async fn etag(&self) -> Result<String>;
    async fn media_type(&self) -> Result<Option<String>>;
    async fn last_modified(&self) -> Result<DateTime<Utc>>;
    async fn creation_date(&self) -> Result<DateTime<Utc>>;
    async fn is_collection(&self) -> Result<bool>;
    async fn internal_members(&self, user: &User) -> Result<Vec<Box<dyn Resource>>>;

    /// Last segment of the path, empty for the root of a mount
    fn canonical_name(&self) -> String;
    /// Decoded absolute path, collections end with `/`
    fn canonical_path(&self) -> String;
    /// Absolute URL of the resource under `origin` (`scheme://authority`)
    fn canonical_url(&self, origin: &str) -> String {
        format!("{}{}", origin.trim_end_matches('/'), encode_path(&self.canonical_path()))
    }

    /// Every lock set on this very resource, provisional ones included
    async fn locks(&self) -> Result<Vec<Lock>>;
    async fn locks_by_user(&self, user: &User) -> Result<Vec<Lock>> {
        let all = self.locks().await?;
        Ok(all.into_iter().filter(|l| l.username == user.username).collect())
    }
    /// A fresh provisional lock with a unique token, not saved yet
    async fn create_lock_for_user(&self, user: &User) -> Result<Lock>;
    /// Insert or update a lock, keyed by its token
    async fn save_lock(&self, lock: &Lock) -> Result<()>;
    async fn delete_lock(&self, token: &str) -> Result<()>;

    async fn properties(&self) -> Result<Box<dyn Properties>>;
}
