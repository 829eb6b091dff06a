//! Transfer module for FTP server
//!
//! Handles data connections in active and passive mode, file transfers
//! under advisory locks, and directory listings.

pub mod data_channel;
pub mod listing;
pub mod modes;

pub use data_channel::{DataTransfer, TransferSettings};
pub use modes::{DataMode, open_passive_listener, parse_port_argument};
