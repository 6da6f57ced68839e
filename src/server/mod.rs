pub mod api;

use std::error::Error;
use std::net::SocketAddr;

use log::{ error, info };

use self::api::AppState;

pub struct Server {
    addr: String,
    state: AppState,
}

impl Server {
    pub fn new(addr: String, state: AppState) -> Self {
        Self { addr, state }
    }

    /// Serves the chat proxy until Ctrl-C.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                return Err(e.into());
            }
        };
        info!("Chat proxy listening on: http://{}/api/chat", listener.local_addr()?);

        let app = api::router(self.state.clone());
        axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

        info!("Chat proxy stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
