pub mod codec;
pub mod compress;
pub mod conditional;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod lock;
pub mod method;
mod middleware;
pub mod plugin;
pub mod range;
pub mod router;

pub use context::{DavOptions, RequestContext};
pub use dispatcher::Dispatcher;
pub use router::{Mount, Router};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use http_body_util::BodyExt;
use hyper::server::conn::http1 as http;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;

use stratus_store::memory::MemoryAdapter;
use stratus_user::config::{AuthKind, Backend, Config};
use stratus_user::login::anonymous::AnonymousAuthenticator;
use stratus_user::login::static_provider::StaticAuthenticator;
use stratus_user::login::ArcAuthenticator;

use plugin::ReadOnly;

pub struct Server {
    bind_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    pub fn new(config: &Config) -> Result<Self> {
        let authenticator: ArcAuthenticator = match config.auth.kind {
            AuthKind::Static => Arc::new(StaticAuthenticator::new(
                config.auth.users.clone(),
                config.auth.realm.as_str(),
            )),
            AuthKind::Anonymous => Arc::new(AnonymousAuthenticator::new(config.auth.realm.as_str())),
        };

        if config.mounts.is_empty() {
            bail!("no mount configured, nothing to serve");
        }
        let mut router = Router::new();
        for mc in config.mounts.iter() {
            let adapter = match mc.backend {
                Backend::Memory => {
                    let adapter = match mc.quota {
                        Some(q) => MemoryAdapter::with_quota(q),
                        None => MemoryAdapter::new(),
                    };
                    adapter.deny_anonymous_writes(mc.deny_anonymous_writes)
                }
            };
            let mut mount = Mount::new(&mc.prefix, Arc::new(adapter), authenticator.clone());
            if mc.read_only {
                mount = mount.with_plugin(Arc::new(ReadOnly));
            }
            router.mount(mount);
        }

        let dispatcher = Dispatcher::new(router, DavOptions::from(config))?;
        Ok(Self {
            bind_addr: config.bind_addr,
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub async fn run(self, mut must_exit: watch::Receiver<bool>) -> Result<()> {
        let tcp = TcpListener::bind(self.bind_addr).await?;
        tracing::info!("DAV server listening on {:#}", self.bind_addr);

        let mut connections = FuturesUnordered::new();
        while !*must_exit.borrow() {
            let wait_conn_finished = async {
                if connections.is_empty() {
                    futures::future::pending().await
                } else {
                    connections.next().await
                }
            };
            let (socket, remote_addr) = tokio::select! {
                a = tcp.accept() => a?,
                _ = wait_conn_finished => continue,
                _ = must_exit.changed() => continue,
            };
            tracing::info!("Accepted connection from {}", remote_addr);

            let dispatcher = self.dispatcher.clone();
            let conn = tokio::spawn(async move {
                let service = service_fn(|req: Request<hyper::body::Incoming>| {
                    let dispatcher = dispatcher.clone();
                    async move {
                        let req = req.map(|b| {
                            b.map_err(|e| io::Error::new(io::ErrorKind::Other, e))
                                .boxed_unsync()
                        });
                        Ok::<_, std::convert::Infallible>(dispatcher.handle(req).await)
                    }
                });
                match http::Builder::new()
                    .serve_connection(TokioIo::new(socket), service)
                    .await
                {
                    Err(e) => tracing::warn!(err=?e, "connection failed"),
                    Ok(()) => tracing::trace!("connection terminated with success"),
                }
            });
            connections.push(conn);
        }
        drop(tcp);

        tracing::info!("Server shutting down, draining remaining connections...");
        while connections.next().await.is_some() {}

        Ok(())
    }
}
