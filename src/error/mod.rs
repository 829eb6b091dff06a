//! Error handling
//!
//! Defines error types and their mapping onto FTP replies.

pub mod types;

pub use types::*;
