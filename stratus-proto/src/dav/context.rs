use std::sync::Arc;
use std::time::Duration;

use stratus_store::{DavError, Resource, Result, User};
use stratus_user::config::Config;

use super::router::{Mount, Router};

/// Engine wide settings
#[derive(Debug, Clone)]
pub struct DavOptions {
    pub production: bool,
    pub compression: bool,
    pub min_lock_timeout: Duration,
    /// `None` lets clients ask for infinite locks
    pub max_lock_timeout: Option<Duration>,
    pub max_xml_body: usize,
}

impl Default for DavOptions {
    fn default() -> Self {
        Self {
            production: false,
            compression: true,
            min_lock_timeout: Duration::from_secs(10),
            max_lock_timeout: Some(Duration::from_secs(3 * 3600)),
            max_xml_body: 1024 * 1024,
        }
    }
}

impl From<&Config> for DavOptions {
    fn from(config: &Config) -> Self {
        Self {
            production: config.production,
            compression: config.compression,
            min_lock_timeout: Duration::from_secs(config.min_lock_timeout),
            max_lock_timeout: config.max_lock_timeout.map(Duration::from_secs),
            max_xml_body: config.max_xml_body,
        }
    }
}

/// Everything a method handler knows about the request it serves
pub struct RequestContext {
    pub id: u64,
    /// Decoded absolute path of the target
    pub path: String,
    pub user: User,
    pub mount: Arc<Mount>,
    pub router: Arc<Router>,
    pub options: Arc<DavOptions>,
}

impl RequestContext {
    /// The target resource, `ResourceNotFound` when it does not exist
    pub async fn resource(&self) -> Result<Box<dyn Resource>> {
        self.mount
            .adapter
            .get_resource(&self.path, &self.mount.prefix)
            .await
    }

    /// Mount serving an arbitrary path of this server
    pub fn mount_of(&self, path: &str) -> Result<Arc<Mount>> {
        self.router
            .resolve(path)
            .ok_or_else(|| DavError::ResourceNotFound(path.to_string()))
    }
}
