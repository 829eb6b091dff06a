//! Authentication system
//!
//! Handles credential loading and password verification.

pub mod credentials;

pub use credentials::{CredentialStore, hash_password};
