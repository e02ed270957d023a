pub mod anonymous;
pub mod static_provider;

use std::sync::Arc;

use async_trait::async_trait;
use http::request::Parts;
use thiserror::Error;

use stratus_store::User;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or wrong credentials, the client may retry
    #[error("authentication required")]
    Unauthorized,
    /// Valid credentials without access
    #[error("access denied")]
    Forbidden,
    #[error("malformed authorization header: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Turns the credentials of a request into a user identity
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, parts: &Parts) -> Result<User, AuthError>;

    /// Called once the request is over
    async fn cleanup(&self, _user: &User) {}

    /// Realm announced in `WWW-Authenticate` challenges
    fn realm(&self) -> &str;
}

pub type ArcAuthenticator = Arc<dyn Authenticator>;
