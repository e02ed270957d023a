use thiserror::Error;

use stratus_dav::error::ParsingError;

/// Every failure the engine and its storage backends can signal.
///
/// The HTTP status of each kind is decided at a single place, the
/// dispatcher boundary.
#[derive(Debug, Error)]
pub enum DavError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("property not found")]
    PropertyNotFound,
    #[error("property is protected")]
    PropertyIsProtected,
    #[error("method not supported")]
    MethodNotSupported,
    #[error("content encoding not supported")]
    EncodingNotSupported,
    #[error("no acceptable representation")]
    NotAcceptable,
    #[error("resource already exists")]
    ResourceExists,
    #[error("intermediate collection missing")]
    ResourceTreeNotComplete,
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("resource not modified")]
    ResourceNotModified,
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("request URI too long")]
    RequestUriTooLong,
    #[error("media type not supported")]
    MediaTypeNotSupported,
    #[error("unprocessable entity")]
    UnprocessableEntity,
    #[error("resource is locked")]
    Locked,
    #[error("failed dependency")]
    FailedDependency,
    #[error("insufficient storage")]
    InsufficientStorage,
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DavError>;

impl From<ParsingError> for DavError {
    fn from(value: ParsingError) -> Self {
        Self::BadRequest(format!("malformed XML body: {}", value))
    }
}

impl From<std::io::Error> for DavError {
    fn from(value: std::io::Error) -> Self {
        Self::Internal(value.into())
    }
}

impl From<http::Error> for DavError {
    fn from(value: http::Error) -> Self {
        Self::Internal(value.into())
    }
}
