use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use http::request::Parts;
use http::{header, HeaderValue, Method, Request, StatusCode};
use tracing::Instrument;

use stratus_store::{DavError, Result};

use super::codec::{self, empty_body, Body, HttpResponse};
use super::context::{DavOptions, RequestContext};
use super::error::{status_of, ErrorResponder, TextResponder};
use super::method::{self, verb, DavMethod};
use super::middleware;
use super::plugin::Flow;
use super::router::{Mount, Router};

/// Entry point of every request: routing, plugin hooks, authentication,
/// method dispatch and the single error to status boundary.
pub struct Dispatcher {
    router: Arc<Router>,
    options: Arc<DavOptions>,
    methods: HashMap<Method, Box<dyn DavMethod>>,
    responder: Box<dyn ErrorResponder>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(router: Router, options: DavOptions) -> Result<Self> {
        let mut dispatcher = Self {
            router: Arc::new(router),
            options: Arc::new(options),
            methods: HashMap::new(),
            responder: Box::new(TextResponder),
            next_id: AtomicU64::new(1),
        };
        dispatcher.register(Method::GET, method::get_head::GetMethod);
        dispatcher.register(Method::HEAD, method::get_head::GetMethod);
        dispatcher.register(Method::PUT, method::put::PutMethod);
        dispatcher.register(Method::DELETE, method::delete::DeleteMethod);
        dispatcher.register(Method::OPTIONS, method::options::OptionsMethod);
        dispatcher.register(verb("MKCOL")?, method::mkcol::MkcolMethod);
        dispatcher.register(verb("PROPFIND")?, method::propfind::PropfindMethod);
        dispatcher.register(verb("PROPPATCH")?, method::proppatch::ProppatchMethod);
        dispatcher.register(verb("LOCK")?, method::lock::LockMethod);
        dispatcher.register(verb("UNLOCK")?, method::unlock::UnlockMethod);
        dispatcher.register(
            verb("COPY")?,
            method::copy_move::CopyMoveMethod { remove_source: false },
        );
        dispatcher.register(
            verb("MOVE")?,
            method::copy_move::CopyMoveMethod { remove_source: true },
        );
        Ok(dispatcher)
    }

    pub fn with_responder(mut self, responder: impl ErrorResponder + 'static) -> Self {
        self.responder = Box::new(responder);
        self
    }

    /// Add or replace the handler of a method
    pub fn register(&mut self, method: Method, handler: impl DavMethod + 'static) {
        self.methods.insert(method, Box::new(handler));
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn handle(&self, req: Request<Body>) -> HttpResponse {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!("request", id, method = %req.method(), path = %req.uri().path());
        self.serve(id, req).instrument(span).await
    }

    async fn serve(&self, id: u64, req: Request<Body>) -> HttpResponse {
        let (parts, body) = req.into_parts();

        let routed = codec::decode_path(parts.uri.path()).and_then(|path| {
            match self.router.resolve(&path) {
                Some(mount) => Ok((path, mount)),
                None => Err(DavError::ResourceNotFound(path)),
            }
        });
        let (path, mount) = match routed {
            Ok(v) => v,
            Err(e) => return self.error(&parts, None, e).await,
        };

        let response = self.pipeline(id, &mount, path, &parts, body).await;
        for plugin in mount.plugins.iter() {
            plugin.close(&parts, response.status()).await;
        }
        tracing::info!(status = response.status().as_u16(), "done");
        response
    }

    async fn pipeline(&self, id: u64, mount: &Arc<Mount>, path: String, parts: &Parts, body: Body) -> HttpResponse {
        for plugin in mount.plugins.iter() {
            if let Flow::Respond(r) = plugin.prepare(parts).await {
                tracing::debug!(plugin = plugin.name(), "answered in prepare");
                return r;
            }
        }
        for plugin in mount.plugins.iter() {
            if let Flow::Respond(r) = plugin.before_auth(parts).await {
                tracing::debug!(plugin = plugin.name(), "answered before authentication");
                return r;
            }
        }

        let user = match middleware::auth(&mount.authenticator, parts).await {
            Ok(u) => u,
            Err(resp) => return resp,
        };
        for plugin in mount.plugins.iter() {
            if let Flow::Respond(r) = plugin.after_auth(parts, &user).await {
                tracing::debug!(plugin = plugin.name(), "answered after authentication");
                mount.authenticator.cleanup(&user).await;
                return r;
            }
        }

        let ctx = RequestContext {
            id,
            path,
            user,
            mount: mount.clone(),
            router: self.router.clone(),
            options: self.options.clone(),
        };
        let response = self.run(&ctx, parts, body).await;
        mount.authenticator.cleanup(&ctx.user).await;
        response
    }

    async fn run(&self, ctx: &RequestContext, parts: &Parts, body: Body) -> HttpResponse {
        let plugins = &ctx.mount.plugins;
        for plugin in plugins.iter() {
            if let Flow::Respond(r) = plugin.begin(ctx, parts).await {
                tracing::debug!(plugin = plugin.name(), "answered at begin");
                return r;
            }
        }

        let handler = match self.methods.get(&parts.method) {
            Some(h) => h,
            None => return self.error(parts, Some(ctx), DavError::MethodNotSupported).await,
        };
        if let Err(e) = method::authorize(&ctx.mount, &ctx.path, &parts.method, &ctx.user).await {
            return self.error(parts, Some(ctx), e).await;
        }
        for plugin in plugins.iter() {
            if let Flow::Respond(r) = plugin.before_method(ctx, parts).await {
                tracing::debug!(plugin = plugin.name(), "answered before method");
                return r;
            }
        }

        let response = match handler.run(ctx, parts, body).await {
            Ok(r) => r,
            Err(e) => self.error(parts, Some(ctx), e).await,
        };
        let status = response.status();
        for plugin in plugins.iter() {
            if let Flow::Respond(r) = plugin.after_method(ctx, parts, status).await {
                tracing::debug!(plugin = plugin.name(), "answered after method");
                return r;
            }
        }
        response
    }

    /// Turn an error into its response
    async fn error(&self, parts: &Parts, ctx: Option<&RequestContext>, err: DavError) -> HttpResponse {
        let status = status_of(&err);
        match status.is_server_error() {
            true => tracing::error!(err=?err, status = status.as_u16(), "request failed"),
            false => tracing::debug!(err=%err, status = status.as_u16(), "request refused"),
        }

        let mut resp = self.responder.respond(&err, status, self.options.production);
        if parts.method == Method::HEAD {
            *resp.body_mut() = empty_body();
        }
        let ctx = match ctx {
            Some(c) => c,
            None => return resp,
        };

        if status == StatusCode::UNAUTHORIZED {
            let challenge = middleware::challenge(ctx.mount.authenticator.realm());
            if let Ok(v) = HeaderValue::from_str(&challenge) {
                resp.headers_mut().insert(header::WWW_AUTHENTICATE, v);
            }
        }
        if status == StatusCode::METHOD_NOT_ALLOWED {
            match ctx.mount.adapter.allowed_methods(&ctx.path, &ctx.user).await {
                Ok(allowed) => {
                    if let Ok(v) = HeaderValue::from_str(&allowed.join(", ")) {
                        resp.headers_mut().insert(header::ALLOW, v);
                    }
                }
                Err(e) => tracing::warn!(err=%e, "unable to list allowed methods"),
            }
        }
        resp
    }
}
