use http::{header, Response, StatusCode};

use stratus_store::DavError;

use super::codec::{empty_body, text_body, HttpResponse};

/// HTTP status of an error kind.
///
/// Keep this match exhaustive: a new kind must be mapped here before the
/// engine compiles again.
pub fn status_of(err: &DavError) -> StatusCode {
    match err {
        DavError::BadRequest(_) => StatusCode::BAD_REQUEST,
        DavError::Unauthorized => StatusCode::UNAUTHORIZED,
        DavError::Forbidden(_) => StatusCode::FORBIDDEN,
        DavError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
        DavError::PropertyNotFound => StatusCode::NOT_FOUND,
        DavError::PropertyIsProtected => StatusCode::FORBIDDEN,
        DavError::MethodNotSupported => StatusCode::METHOD_NOT_ALLOWED,
        DavError::EncodingNotSupported => StatusCode::NOT_ACCEPTABLE,
        DavError::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
        DavError::ResourceExists => StatusCode::METHOD_NOT_ALLOWED,
        DavError::ResourceTreeNotComplete => StatusCode::CONFLICT,
        DavError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
        DavError::ResourceNotModified => StatusCode::NOT_MODIFIED,
        DavError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        DavError::RequestUriTooLong => StatusCode::URI_TOO_LONG,
        DavError::MediaTypeNotSupported => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        DavError::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
        DavError::Locked => StatusCode::LOCKED,
        DavError::FailedDependency => StatusCode::FAILED_DEPENDENCY,
        DavError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
        DavError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        DavError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        DavError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Renders the human readable body of an error response
pub trait ErrorResponder: Send + Sync {
    fn respond(&self, err: &DavError, status: StatusCode, production: bool) -> HttpResponse;
}

/// Plain text responder: the reason phrase, followed by the error
/// detail when not in production.
pub struct TextResponder;

impl ErrorResponder for TextResponder {
    fn respond(&self, err: &DavError, status: StatusCode, production: bool) -> HttpResponse {
        let mut resp = Response::new(empty_body());
        *resp.status_mut() = status;
        if status == StatusCode::NOT_MODIFIED {
            return resp;
        }

        let reason = status.canonical_reason().unwrap_or("Error");
        let txt = match production {
            true => format!("{}\n", reason),
            false => format!("{}\n\n{:?}\n", reason, err),
        };
        resp.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        *resp.body_mut() = text_body(txt);
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_of(resp: HttpResponse) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn taxonomy() {
        assert_eq!(status_of(&DavError::ResourceExists), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(status_of(&DavError::ResourceTreeNotComplete), StatusCode::CONFLICT);
        assert_eq!(status_of(&DavError::NotAcceptable), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(status_of(&DavError::InsufficientStorage).as_u16(), 507);
        assert_eq!(
            status_of(&DavError::Internal(anyhow::anyhow!("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn production_hides_detail() {
        let err = DavError::Forbidden("secret detail".into());
        let resp = TextResponder.respond(&err, StatusCode::FORBIDDEN, true);
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_of(resp).await, "Forbidden\n");

        let resp = TextResponder.respond(&err, StatusCode::FORBIDDEN, false);
        assert!(body_of(resp).await.contains("secret detail"));

        let resp = TextResponder.respond(&DavError::ResourceNotModified, StatusCode::NOT_MODIFIED, false);
        assert_eq!(body_of(resp).await, "");
    }
}
