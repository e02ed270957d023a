use async_trait::async_trait;
use http::Method;

use crate::error::Result;
use crate::resource::Resource;
use crate::user::User;

/// A storage backend mounted under a path prefix (the base).
///
/// Every path is decoded and absolute, so it still contains the base.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn compliance_classes(&self, path: &str, user: &User) -> Result<Vec<String>>;
    async fn allowed_methods(&self, path: &str, user: &User) -> Result<Vec<String>>;
    async fn options_cache_control(&self, path: &str, user: &User) -> Result<String>;

    async fn is_authorized(&self, path: &str, method: &Method, user: &User) -> Result<bool>;

    /// An existing resource, `ResourceNotFound` otherwise
    async fn get_resource(&self, path: &str, base: &str) -> Result<Box<dyn Resource>>;
    /// A handle for a file that does not exist yet
    async fn new_resource(&self, path: &str, base: &str) -> Result<Box<dyn Resource>>;
    /// A handle for a collection that does not exist yet
    async fn new_collection(&self, path: &str, base: &str) -> Result<Box<dyn Resource>>;
}
