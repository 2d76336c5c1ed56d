use std::{future::Future, net::SocketAddr};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    hub::{Hub, HubConfig},
    ws,
};

pub struct Server {
    listener: TcpListener,
    config: HubConfig,
}

impl Server {
    pub fn new(listener: TcpListener, config: HubConfig) -> Self {
        Self { listener, config }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves websocket clients until `shutdown` resolves, then stops the hub
    /// and waits for it to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server { listener, config } = self;
        let token = CancellationToken::new();

        let (hub, handle) = Hub::new(&config, token.clone());
        let hub_task = tokio::spawn(hub.run());

        let cancel = token.clone();
        let served = axum::serve(listener, ws::router(handle))
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("server shutting down");
                cancel.cancel();
            })
            .await;

        token.cancel();
        hub_task.await.context("hub task failed")?;
        served.context("http server failed")
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}
