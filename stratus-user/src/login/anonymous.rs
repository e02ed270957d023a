use async_trait::async_trait;
use http::request::Parts;

use stratus_store::User;

use super::{AuthError, Authenticator};

/// Lets everybody in as the `nobody` user
pub struct AnonymousAuthenticator {
    realm: String,
}

impl AnonymousAuthenticator {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
        }
    }
}

#[async_trait]
impl Authenticator for AnonymousAuthenticator {
    async fn authenticate(&self, _parts: &Parts) -> Result<User, AuthError> {
        Ok(User::anonymous())
    }

    fn realm(&self) -> &str {
        &self.realm
    }
}
