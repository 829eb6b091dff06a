use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, interval_at};

use crate::auth::CredentialStore;
use crate::client::registry::ConnectionId;
use crate::client::session::{Session, SharedRegistry};
use crate::config::ServerConfig;
use crate::protocol::responses;
use crate::protocol::{CommandOutcome, CommandReader, execute};

/// Drives one FTP control connection until the peer quits, a fatal error
/// occurs, the idle timeout expires or the server shuts down.
///
/// - Sends the 220 greeting.
/// - Reads bounded CRLF lines and dispatches them through `execute`.
/// - Checks the idle clock every half timeout while waiting for a command.
/// - Removes its entry from the session table on exit.
pub async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    config: Arc<ServerConfig>,
    credentials: Arc<CredentialStore>,
    registry: SharedRegistry,
    mut shutdown: watch::Receiver<bool>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = CommandReader::new(read_half, config.max_command_length);
    let idle_timeout = config.idle_timeout();
    let mut session = Session::new(
        id,
        peer,
        write_half,
        config,
        credentials,
        Arc::clone(&registry),
    );

    info!("Client {} connected from {}", id, peer);

    if session.reply(responses::NEW_USER).await.is_ok() {
        let period = (idle_timeout / 2).max(Duration::from_millis(1));
        let mut idle_check = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                line = reader.next_line() => match line {
                    Ok(Some(line)) => {
                        if execute(&mut session, &line).await == CommandOutcome::Fatal {
                            let _ = session.reply(responses::CLOSING).await;
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("Connection closed by client {}", peer);
                        break;
                    }
                    Err(e) => {
                        warn!("Framing error from {}: {}", peer, e);
                        let _ = session.reply(responses::CLOSING).await;
                        break;
                    }
                },
                _ = idle_check.tick() => {
                    if session.idle_expired() {
                        info!("Client {} idle for {:?}, closing", peer, idle_timeout);
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Server shutting down, closing session with {}", peer);
                        let _ = session.reply(responses::CLOSING).await;
                        break;
                    }
                }
            }
        }
    } else {
        warn!("Failed to greet client {}", peer);
    }

    drop(session);
    if let Some(entry) = registry.lock().await.remove(id) {
        info!(
            "Client {} disconnected after {:?} (user: {})",
            id,
            entry.connected_at.elapsed(),
            entry.username.as_deref().unwrap_or("-")
        );
    }
}
