use log::{error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;

use crate::auth::CredentialStore;
use crate::client::{ClientRegistry, SharedRegistry, handle_client};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::protocol::responses;

/// How long `run` waits for sessions to say goodbye after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    credentials: Arc<CredentialStore>,
    registry: SharedRegistry,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

/// Requests an orderly stop of a running `Server`.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }
}

impl Server {
    /// Binds the control listener. Credentials are loaded by the caller and
    /// shared read-only with every session.
    pub async fn bind(
        config: ServerConfig,
        credentials: CredentialStore,
    ) -> Result<Self, ServerError> {
        let addr = config.control_socket();
        let listener = TcpListener::bind(addr.as_str())
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server bound to {}", listener.local_addr()?);

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            listener,
            config: Arc::new(config),
            credentials: Arc::new(credentials),
            registry: Arc::new(Mutex::new(ClientRegistry::new())),
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Number of sessions currently in the session table.
    pub async fn active_sessions(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Accepts connections until shutdown is requested, then gives live
    /// sessions a grace period to send their goodbye.
    pub async fn run(&self) -> Result<(), ServerError> {
        info!(
            "Starting miniftpd on {} (max {} clients, {} users)",
            self.local_addr()?,
            self.config.max_clients,
            self.credentials.len()
        );

        let mut shutdown = self.shutdown_tx.subscribe();
        let mut sessions = JoinSet::new();

        while !*shutdown.borrow_and_update() {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer, &mut sessions).await,
                    Err(e) => error!("Error accepting connection: {}", e),
                },
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(
            "Shutting down, waiting for {} session(s)",
            self.active_sessions().await
        );
        let drain = async { while sessions.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Aborting sessions still running after {:?}", SHUTDOWN_GRACE);
            sessions.abort_all();
        }
        Ok(())
    }

    /// Registers a new connection and spawns its session, or turns it away
    /// with 421 when the table is full.
    async fn admit(&self, mut stream: TcpStream, peer: SocketAddr, sessions: &mut JoinSet<()>) {
        let mut registry = self.registry.lock().await;
        if registry.len() >= self.config.max_clients {
            drop(registry);
            warn!(
                "Rejecting {}: {} clients already connected",
                peer, self.config.max_clients
            );
            sessions.spawn(async move {
                let _ = stream.write_all(responses::CLOSING.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
            return;
        }
        let id = registry.register(peer);
        info!("Accepted {} as client {} ({} connected)", peer, id, registry.len());
        drop(registry);

        sessions.spawn(handle_client(
            stream,
            peer,
            id,
            Arc::clone(&self.config),
            Arc::clone(&self.credentials),
            Arc::clone(&self.registry),
            self.shutdown_tx.subscribe(),
        ));
    }
}
