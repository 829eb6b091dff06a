//! Error types
//!
//! Defines domain-specific error types for each module of the FTP server,
//! and the protocol-level taxonomy every command failure is mapped onto
//! before a reply goes out.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::protocol::CommandOutcome;
use crate::protocol::responses;

/// Control connection framing errors. Always fatal for the session.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("command line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("command line is not CRLF terminated")]
    MissingCrlf,

    #[error("control connection read failed: {0}")]
    Io(#[from] io::Error),
}

/// Credential file loading errors.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read credential file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed credential entry on line {line}: expected \"<username> <hash>\"")]
    MalformedLine { line: usize },
}

/// Data connection and file transfer errors.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("data connection was already attempted for this transfer")]
    AlreadyAttempted,

    #[error("data connection is not established")]
    NotConnected,

    #[error("failed to connect to {0}: {1}")]
    Connect(SocketAddr, #[source] io::Error),

    #[error("failed to accept passive data connection: {0}")]
    Accept(#[source] io::Error),

    #[error("data connection not established within {0:?}")]
    Timeout(Duration),

    #[error("no file attached to this transfer")]
    NoFile,

    #[error("failed to open {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("advisory lock on {path} unavailable: {errno}")]
    LockUnavailable {
        path: PathBuf,
        errno: nix::errno::Errno,
    },

    #[error("transfer I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Listing errors: distinguishes "nothing to list" from a failure mid-listing.
#[derive(Debug, Error)]
pub enum ListError {
    #[error("{path} is neither a directory nor a file: {source}")]
    NotApplicable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Protocol-level failure taxonomy. Every handler failure becomes one of these,
/// and the variant alone decides both the reply and the session consequence.
#[derive(Debug, Error)]
pub enum FtpError {
    #[error("not logged in")]
    NotLoggedIn,

    #[error("password sent before username")]
    NeedAccount,

    #[error("invalid username or password")]
    LoginFailed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bad sequence: {0}")]
    BadSequence(&'static str),

    #[error("unrecognized command: {0}")]
    UnknownCommand(String),

    #[error("{path} unavailable: {reason}")]
    FileUnavailable { path: PathBuf, reason: String },

    #[error("file action on {path} failed: {source}")]
    FileActionFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot open passive listener: {0}")]
    PassiveUnavailable(#[source] io::Error),

    #[error("cannot open data connection: {0}")]
    DataConnection(#[source] TransferError),

    #[error("transfer aborted: {0}")]
    TransferAborted(#[source] TransferError),

    #[error("nothing to list: {0}")]
    ListingUnavailable(#[source] ListError),

    #[error("control connection write failed: {0}")]
    Control(#[source] io::Error),
}

impl FtpError {
    /// The reply sent for this failure, or `None` when the control
    /// connection itself is gone.
    pub fn reply(&self) -> Option<&'static str> {
        match self {
            FtpError::NotLoggedIn => Some(responses::NOT_LOGGED_IN),
            FtpError::NeedAccount => Some(responses::REQUIRE_USER),
            FtpError::LoginFailed => Some(responses::LOGIN_FAIL),
            FtpError::InvalidArgument(_) => Some(responses::INVALID_PARAM),
            FtpError::BadSequence(_) => Some(responses::BAD_SEQUENCE),
            FtpError::UnknownCommand(_) => Some(responses::INVALID_COMMAND),
            FtpError::FileUnavailable { .. } => Some(responses::INVALID_PARAM),
            FtpError::FileActionFailed { .. } => Some(responses::FAILED),
            FtpError::PassiveUnavailable(_) => Some(responses::FAILED),
            FtpError::DataConnection(_) => Some(responses::DATA_LINK_FAIL),
            FtpError::TransferAborted(_) => Some(responses::FAILED),
            FtpError::ListingUnavailable(_) => Some(responses::INVALID_PARAM),
            FtpError::Control(_) => None,
        }
    }

    /// What the session does after the reply has been sent.
    pub fn outcome(&self) -> CommandOutcome {
        match self {
            FtpError::DataConnection(_)
            | FtpError::TransferAborted(_)
            | FtpError::ListingUnavailable(_) => CommandOutcome::DataConnClose,
            FtpError::Control(_) => CommandOutcome::Fatal,
            _ => CommandOutcome::Continue,
        }
    }

    pub(crate) fn file_unavailable(path: &Path, reason: impl ToString) -> Self {
        FtpError::FileUnavailable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Startup failures surfaced by the server entry points.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_connection_failures_discard_the_transfer() {
        let err = FtpError::DataConnection(TransferError::NotConnected);
        assert_eq!(err.reply(), Some(responses::DATA_LINK_FAIL));
        assert_eq!(err.outcome(), CommandOutcome::DataConnClose);

        let err = FtpError::TransferAborted(TransferError::Io(io::Error::other("reset")));
        assert_eq!(err.reply(), Some(responses::FAILED));
        assert_eq!(err.outcome(), CommandOutcome::DataConnClose);
    }

    #[test]
    fn recoverable_failures_continue() {
        assert_eq!(FtpError::NotLoggedIn.outcome(), CommandOutcome::Continue);
        assert_eq!(FtpError::LoginFailed.reply(), Some(responses::LOGIN_FAIL));
        assert_eq!(
            FtpError::BadSequence("RNTO without RNFR").reply(),
            Some(responses::BAD_SEQUENCE)
        );
        assert_eq!(
            FtpError::file_unavailable(Path::new("/tmp/x"), "missing").reply(),
            Some(responses::INVALID_PARAM)
        );
    }

    #[test]
    fn passive_listener_failure_keeps_the_session_going() {
        let err = FtpError::PassiveUnavailable(io::Error::from(io::ErrorKind::AddrInUse));
        assert_eq!(err.reply(), Some(responses::FAILED));
        assert_eq!(err.outcome(), CommandOutcome::Continue);
    }

    #[test]
    fn control_failures_are_fatal_without_reply() {
        let err = FtpError::Control(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(err.reply(), None);
        assert_eq!(err.outcome(), CommandOutcome::Fatal);
    }
}
