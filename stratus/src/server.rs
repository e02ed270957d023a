use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use stratus_proto::dav;
use stratus_user::config::Config;

pub struct Server {
    dav_server: dav::Server,
}

impl Server {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            dav_server: dav::Server::new(config)?,
        })
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting Stratus...");

        let (exit_signal, provoke_exit) = watch_ctrl_c();
        if let Err(err) = self.dav_server.run(exit_signal).await {
            tracing::error!("Error: {}", err);
            let _ = provoke_exit.send(true);
            return Err(err);
        }

        Ok(())
    }
}

pub fn watch_ctrl_c() -> (watch::Receiver<bool>, Arc<watch::Sender<bool>>) {
    let (send_cancel, watch_cancel) = watch::channel(false);
    let send_cancel = Arc::new(send_cancel);
    let send_cancel_2 = send_cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(err=%e, "failed to install CTRL+C signal handler");
            return;
        }
        tracing::info!("Received CTRL+C, shutting down.");
        let _ = send_cancel.send(true);
    });
    (watch_cancel, send_cancel_2)
}
