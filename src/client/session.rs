//! Client session management
//!
//! `Session` is the per-connection protocol state: the control writer, the
//! user context, the optional data transfer, the passive listener and the
//! idle clock. Command handlers mutate it; the driver in `handler` owns it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::auth::CredentialStore;
use crate::client::registry::{ClientRegistry, ConnectionId};
use crate::client::state::UserContext;
use crate::config::ServerConfig;
use crate::error::FtpError;
use crate::transfer::{DataTransfer, TransferSettings};

/// Session table shared between the accept loop and every session.
pub type SharedRegistry = Arc<Mutex<ClientRegistry>>;

/// Protocol state of one control connection.
pub struct Session<W> {
    id: ConnectionId,
    peer: SocketAddr,
    writer: W,
    pub(crate) user: UserContext,
    pub(crate) transfer: Option<DataTransfer>,
    pub(crate) passive_listener: Option<Arc<TcpListener>>,
    last_command: Instant,
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) credentials: Arc<CredentialStore>,
    registry: SharedRegistry,
}

impl<W: AsyncWrite + Unpin + Send> Session<W> {
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        writer: W,
        config: Arc<ServerConfig>,
        credentials: Arc<CredentialStore>,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            id,
            peer,
            writer,
            user: UserContext::new(config.home_root.clone()),
            transfer: None,
            passive_listener: None,
            last_command: Instant::now(),
            config,
            credentials,
            registry,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn user(&self) -> &UserContext {
        &self.user
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn has_transfer(&self) -> bool {
        self.transfer.is_some()
    }

    /// Sends one reply line. A failed write means the control connection
    /// is gone.
    pub async fn reply(&mut self, text: &str) -> Result<(), FtpError> {
        self.writer
            .write_all(text.as_bytes())
            .await
            .map_err(FtpError::Control)?;
        self.writer.flush().await.map_err(FtpError::Control)?;
        debug!("{} <- {}", self.peer, text.trim_end());
        Ok(())
    }

    /// Restarts the idle clock.
    pub fn touch(&mut self) {
        self.last_command = Instant::now();
    }

    /// Whether the session has been idle for at least the configured timeout.
    pub fn idle_expired(&self) -> bool {
        self.last_command.elapsed() >= self.config.idle_timeout()
    }

    pub(crate) fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            buffer_size: self.config.transfer_buffer_size,
            connect_timeout: self.config.data_connection_timeout(),
        }
    }

    /// Discards the current data transfer, closing its socket and lock.
    pub(crate) fn discard_transfer(&mut self) {
        if self.transfer.take().is_some() {
            debug!("{} data transfer discarded", self.peer);
        }
    }

    /// Records the logged-in user in the session table.
    pub(crate) async fn record_login(&self, username: &str) {
        self.registry.lock().await.set_username(self.id, username);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::registry::ClientRegistry;
    use crate::client::state::AuthState;
    use std::time::Duration;

    fn session(config: ServerConfig) -> Session<Vec<u8>> {
        let mut registry = ClientRegistry::new();
        let peer = SocketAddr::from(([127, 0, 0, 1], 5000));
        let id = registry.register(peer);
        Session::new(
            id,
            peer,
            Vec::new(),
            Arc::new(config),
            Arc::new(CredentialStore::from_plaintext([("alice", "secret")], "salt")),
            Arc::new(Mutex::new(registry)),
        )
    }

    #[tokio::test]
    async fn replies_are_written_in_order() {
        let mut session = session(ServerConfig::default());
        session.reply("220 hello\r\n").await.unwrap();
        session.reply("200 ok\r\n").await.unwrap();
        assert_eq!(session.writer(), b"220 hello\r\n200 ok\r\n");
    }

    #[tokio::test]
    async fn starts_in_home_root() {
        let session = session(ServerConfig {
            home_root: "/srv".into(),
            ..ServerConfig::default()
        });
        assert_eq!(session.user().current_dir(), std::path::Path::new("/srv"));
        assert_eq!(session.user().auth_state(), AuthState::Unauthenticated);
        assert!(!session.has_transfer());
    }

    #[tokio::test]
    async fn idle_clock_expires_and_resets() {
        let mut session = session(ServerConfig {
            idle_timeout_secs: 1,
            ..ServerConfig::default()
        });
        assert!(!session.idle_expired());
        session.last_command = Instant::now() - Duration::from_secs(2);
        assert!(session.idle_expired());
        session.touch();
        assert!(!session.idle_expired());
    }

    #[tokio::test]
    async fn login_is_recorded_in_registry() {
        let session = session(ServerConfig::default());
        session.record_login("alice").await;
        let entry = session.registry.lock().await.remove(session.id()).unwrap();
        assert_eq!(entry.username.as_deref(), Some("alice"));
    }
}
