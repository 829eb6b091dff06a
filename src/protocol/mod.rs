//! FTP Protocol implementation
//!
//! Handles command framing, parsing, dispatch and reply generation.

pub mod commands;
pub mod handlers;
pub mod parser;
pub mod responses;

pub use commands::{Command, CommandLine, CommandOutcome, parse_command};
pub use handlers::execute;
pub use parser::CommandReader;
