use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine;
use http::request::Parts;

use stratus_store::User;

use super::{AuthError, Authenticator};

/// HTTP Basic authentication against a static list of argon2 hashes
pub struct StaticAuthenticator {
    users: HashMap<String, String>,
    realm: String,
}

impl StaticAuthenticator {
    pub fn new(users: HashMap<String, String>, realm: impl Into<String>) -> Self {
        tracing::info!("{} users loaded", users.len());
        Self {
            users,
            realm: realm.into(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, parts: &Parts) -> Result<User, AuthError> {
        let (username, password) = match basic_credentials(parts)? {
            Some(creds) => creds,
            None => {
                tracing::info!("Missing authorization field");
                return Err(AuthError::Unauthorized);
            }
        };

        tracing::debug!(user=%username, "login");
        let hash = match self.users.get(&username) {
            Some(h) => h,
            None => {
                tracing::info!(user=%username, "User does not exist");
                return Err(AuthError::Unauthorized);
            }
        };

        tracing::debug!(user=%username, "verify password");
        if !verify_password(&password, hash)? {
            tracing::info!(user=%username, "Wrong credentials");
            return Err(AuthError::Unauthorized);
        }

        tracing::debug!(user=%username, "logged");
        Ok(User::new(username))
    }

    fn realm(&self) -> &str {
        &self.realm
    }
}

/// Extract the username/password pair of a Basic `Authorization` header
pub fn basic_credentials(parts: &Parts) -> Result<Option<(String, String)>, AuthError> {
    let auth_val = match parts.headers.get(http::header::AUTHORIZATION) {
        Some(hv) => hv
            .to_str()
            .map_err(|_| AuthError::BadRequest("non ASCII value".into()))?,
        None => return Ok(None),
    };

    let b64_creds_maybe_padded = match auth_val.split_once(' ') {
        Some((scheme, b64)) if scheme.eq_ignore_ascii_case("basic") => b64.trim(),
        _ => return Err(AuthError::BadRequest("unsupported authorization scheme".into())),
    };

    // base64urlencoded may have trailing equals, base64urlsafe has not
    // theoretically authorization is padded but "be liberal in what you accept"
    let b64_creds_clean = b64_creds_maybe_padded.trim_end_matches('=');

    // Decode base64
    let creds = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(b64_creds_clean)
        .map_err(|e| AuthError::BadRequest(e.to_string()))?;
    let str_creds =
        std::str::from_utf8(&creds).map_err(|e| AuthError::BadRequest(e.to_string()))?;

    // Split username and password
    let (username, password) = str_creds.split_once(':').ok_or_else(|| {
        AuthError::BadRequest(
            "missing colon, can't split decoded value into a username/password pair".into(),
        )
    })?;

    Ok(Some((username.to_string(), password.to_string())))
}

pub fn hash_password(password: &str) -> Result<String> {
    use argon2::{
        password_hash::{PasswordHasher, SaltString},
        Argon2,
    };
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    let argon2 = Argon2::default();
    Ok(argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Argon2 error: {}", e))?
        .to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    use argon2::{
        password_hash::{PasswordHash, PasswordVerifier},
        Argon2,
    };
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow!("Invalid hashed password: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(auth: Option<&str>) -> Parts {
        let mut builder = http::Request::builder().uri("/");
        if let Some(v) = auth {
            builder = builder.header(http::header::AUTHORIZATION, v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn basic(creds: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(creds)
        )
    }

    #[test]
    fn password_roundtrip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("hunter3", &hash).unwrap());
        assert!(verify_password("hunter2", "not a hash").is_err());
    }

    #[test]
    fn credentials_are_decoded_liberally() {
        let creds = basic_credentials(&parts(Some(&basic("alice:pass:word")))).unwrap();
        assert_eq!(creds, Some(("alice".into(), "pass:word".into())));

        let unpadded = basic("bob:x").trim_end_matches('=').to_string();
        let creds = basic_credentials(&parts(Some(&unpadded))).unwrap();
        assert_eq!(creds, Some(("bob".into(), "x".into())));

        assert_eq!(basic_credentials(&parts(None)).unwrap(), None);
        assert!(matches!(
            basic_credentials(&parts(Some("Bearer abc"))),
            Err(AuthError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn static_authentication() {
        let mut users = HashMap::new();
        users.insert("alice".to_string(), hash_password("secret").unwrap());
        let auth = StaticAuthenticator::new(users, "Test");

        let user = auth
            .authenticate(&parts(Some(&basic("alice:secret"))))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");

        assert!(matches!(
            auth.authenticate(&parts(Some(&basic("alice:wrong")))).await,
            Err(AuthError::Unauthorized)
        ));
        assert!(matches!(
            auth.authenticate(&parts(Some(&basic("mallory:secret")))).await,
            Err(AuthError::Unauthorized)
        ));
        assert!(matches!(
            auth.authenticate(&parts(None)).await,
            Err(AuthError::Unauthorized)
        ));
    }
}
