use async_trait::async_trait;
use http::request::Parts;
use http::{header, Method, Response, StatusCode};

use stratus_store::User;

use super::codec::{text_body, HttpResponse};
use super::context::RequestContext;

/// Outcome of a hook
pub enum Flow {
    Continue,
    /// Stop processing and send this response
    Respond(HttpResponse),
}

/// Hooks run by the dispatcher around every request of a mount, in this
/// order: `prepare`, `before_auth`, `after_auth`, `begin`,
/// `before_method`, `after_method`. `close` runs last, whatever happened.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn prepare(&self, _parts: &Parts) -> Flow {
        Flow::Continue
    }
    async fn before_auth(&self, _parts: &Parts) -> Flow {
        Flow::Continue
    }
    async fn after_auth(&self, _parts: &Parts, _user: &User) -> Flow {
        Flow::Continue
    }
    async fn begin(&self, _ctx: &RequestContext, _parts: &Parts) -> Flow {
        Flow::Continue
    }
    async fn before_method(&self, _ctx: &RequestContext, _parts: &Parts) -> Flow {
        Flow::Continue
    }
    async fn after_method(&self, _ctx: &RequestContext, _parts: &Parts, _status: StatusCode) -> Flow {
        Flow::Continue
    }
    async fn close(&self, _parts: &Parts, _status: StatusCode) {}
}

pub const SAFE_METHODS: &str = "OPTIONS, GET, HEAD, PROPFIND";

pub fn is_safe(method: &Method) -> bool {
    matches!(method.as_str(), "OPTIONS" | "GET" | "HEAD" | "PROPFIND")
}

/// Refuses every method that could change the mount
pub struct ReadOnly;

#[async_trait]
impl Plugin for ReadOnly {
    fn name(&self) -> &str {
        "read-only"
    }

    async fn begin(&self, ctx: &RequestContext, parts: &Parts) -> Flow {
        if is_safe(&parts.method) {
            return Flow::Continue;
        }
        tracing::debug!(method=%parts.method, mount=%ctx.mount.prefix, "write refused on read-only mount");
        let resp = Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(header::ALLOW, SAFE_METHODS)
            .body(text_body("Method Not Allowed\n"));
        match resp {
            Ok(r) => Flow::Respond(r),
            Err(e) => {
                tracing::error!(err=?e, "unable to build response");
                Flow::Continue
            }
        }
    }
}
