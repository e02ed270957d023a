use std::sync::Arc;

use stratus_store::{Adapter, DavError, Resource, Result};
use stratus_user::login::ArcAuthenticator;

use super::lock::LockManager;
use super::plugin::Plugin;

/// A storage backend, its authenticator and its plugins, served under a
/// path prefix.
pub struct Mount {
    /// Always starts and ends with `/`
    pub prefix: String,
    pub adapter: Arc<dyn Adapter>,
    pub authenticator: ArcAuthenticator,
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub locks: LockManager,
}

impl Mount {
    pub fn new(prefix: &str, adapter: Arc<dyn Adapter>, authenticator: ArcAuthenticator) -> Self {
        let trimmed = prefix.trim_matches('/');
        let prefix = match trimmed.is_empty() {
            true => "/".to_string(),
            false => format!("/{}/", trimmed),
        };
        Self {
            prefix,
            adapter,
            authenticator,
            plugins: vec![],
            locks: LockManager::default(),
        }
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        path.starts_with(&self.prefix) || format!("{}/", path) == self.prefix
    }

    pub fn is_root(&self, path: &str) -> bool {
        path.trim_end_matches('/') == self.prefix.trim_end_matches('/')
    }

    /// The existing resource at `path`, if any
    pub async fn lookup(&self, path: &str) -> Result<Option<Box<dyn Resource>>> {
        match self.adapter.get_resource(path, &self.prefix).await {
            Ok(r) => Ok(Some(r)),
            Err(DavError::ResourceNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// A handle on `path`, created fresh when nothing is stored there.
    /// Paths ending with `/` get a collection handle.
    pub async fn handle(&self, path: &str) -> Result<Box<dyn Resource>> {
        match self.lookup(path).await? {
            Some(r) => Ok(r),
            None if path.ends_with('/') => self.adapter.new_collection(path, &self.prefix).await,
            None => self.adapter.new_resource(path, &self.prefix).await,
        }
    }
}

/// Longest prefix match routing table
#[derive(Default)]
pub struct Router {
    mounts: Vec<Arc<Mount>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(&mut self, mount: Mount) {
        tracing::info!(prefix=%mount.prefix, "mount registered");
        self.mounts.push(Arc::new(mount));
        self.mounts.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
    }

    pub fn resolve(&self, path: &str) -> Option<Arc<Mount>> {
        self.mounts.iter().find(|m| m.contains(path)).cloned()
    }

    pub fn mounts(&self) -> &[Arc<Mount>] {
        &self.mounts
    }
}
