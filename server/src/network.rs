//! Server network layer accepting websocket connections and handing them to the hub

use crate::auth::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::Hub;
use crate::session::Session;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;

/// Listening socket plus the hub every accepted connection registers with
pub struct Server {
    listener: TcpListener,
    hub: Arc<Hub>,
}

impl Server {
    /// Binds the configured address, opening the credential store the
    /// configuration names
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let credentials: Arc<dyn CredentialStore> = match &config.credentials_path {
            Some(path) => Arc::new(FileCredentialStore::open(path)?),
            None => {
                info!("No credential file configured, accounts are kept in memory");
                Arc::new(MemoryCredentialStore::new())
            }
        };

        Self::with_credentials(config, credentials).await
    }

    pub async fn with_credentials(
        config: ServerConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ServerError> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            hub: Hub::new(config, credentials),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Starts the hub and accepts connections until the task is dropped
    pub async fn run(self) -> Result<(), ServerError> {
        tokio::spawn(Arc::clone(&self.hub).run());
        info!("Server started successfully");

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    tokio::spawn(handle_connection(Arc::clone(&self.hub), stream, addr));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn handle_connection(hub: Arc<Hub>, stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }

    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    info!("New websocket connection from {}", addr);

    let session = Session::new(Arc::clone(&hub), Some(addr));
    hub.register(Arc::clone(&session));
    session.serve(socket).await;

    info!("Connection from {} finished", addr);
}
