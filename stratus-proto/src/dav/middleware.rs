use http::request::Parts;
use http::{header, HeaderValue, Response, StatusCode};

use stratus_store::User;
use stratus_user::login::{ArcAuthenticator, AuthError};

use super::codec::{text_body, HttpResponse};

pub fn challenge(realm: &str) -> String {
    format!("Basic realm=\"{}\"", realm.replace('"', ""))
}

fn reply(status: StatusCode, txt: &'static str) -> HttpResponse {
    let mut resp = Response::new(text_body(txt));
    *resp.status_mut() = status;
    resp
}

/// Identify the caller, or build the response refusing them
pub(super) async fn auth(authenticator: &ArcAuthenticator, parts: &Parts) -> Result<User, HttpResponse> {
    match authenticator.authenticate(parts).await {
        Ok(user) => {
            tracing::debug!(user=%user.username, "authenticated");
            Ok(user)
        }
        Err(AuthError::Unauthorized) => {
            let mut resp = reply(StatusCode::UNAUTHORIZED, "Authentication required\n");
            if let Ok(v) = HeaderValue::from_str(&challenge(authenticator.realm())) {
                resp.headers_mut().insert(header::WWW_AUTHENTICATE, v);
            }
            Err(resp)
        }
        Err(AuthError::Forbidden) => {
            tracing::info!("authenticated user is not allowed here");
            Err(reply(StatusCode::FORBIDDEN, "Forbidden\n"))
        }
        Err(AuthError::BadRequest(msg)) => {
            tracing::info!(reason=%msg, "unsupported authorization field");
            Err(reply(StatusCode::BAD_REQUEST, "Unsupported Authorization field\n"))
        }
        Err(AuthError::Internal(e)) => {
            tracing::error!(err=?e, "authenticator failed");
            Err(reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal error\n"))
        }
    }
}
