//! Server core functionality
//!
//! The control listener, the accept loop and orderly shutdown.

pub mod core;

pub use core::{Server, ShutdownHandle};
