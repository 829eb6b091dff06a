pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transfer;

pub use auth::CredentialStore;
pub use config::ServerConfig;
pub use server::{Server, ShutdownHandle};
