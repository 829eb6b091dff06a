//! Client management system
//!
//! Handles client connections, per-session state and the session table.

pub mod handler;
pub mod registry;
pub mod session;
pub mod state;

pub use handler::handle_client;
pub use registry::{ClientEntry, ClientRegistry, ConnectionId};
pub use session::{Session, SharedRegistry};
pub use state::{AuthState, UserContext};
