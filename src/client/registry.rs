//! Client registry
//!
//! Tracks every live session by connection id. The accept loop consults it
//! to enforce the client limit; sessions record their login and remove
//! themselves when they end.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique id of one accepted control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the registry knows about one session.
#[derive(Debug, Clone)]
pub struct ClientEntry {
    pub peer: SocketAddr,
    pub connected_at: Instant,
    pub username: Option<String>,
}

/// Registry for tracking active clients
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ConnectionId, ClientEntry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection from `peer` and returns its id.
    pub fn register(&mut self, peer: SocketAddr) -> ConnectionId {
        let id = ConnectionId::next();
        self.clients.insert(
            id,
            ClientEntry {
                peer,
                connected_at: Instant::now(),
                username: None,
            },
        );
        id
    }

    /// Records the user a session logged in as.
    pub fn set_username(&mut self, id: ConnectionId, username: &str) {
        if let Some(entry) = self.clients.get_mut(&id) {
            entry.username = Some(username.to_string());
        }
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<ClientEntry> {
        self.clients.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
