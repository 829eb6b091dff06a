//! Module `state`
//!
//! Defines `UserContext`: the per-session authentication state, working
//! directory and pending rename source, plus the path resolution every
//! path-taking command goes through.

use std::path::{Path, PathBuf};

/// Where a session stands in the USER/PASS exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AwaitingPassword,
    Authenticated,
}

/// Authentication and navigation state of one connected client. Paths are
/// kept as raw OS strings so client-supplied names reach the filesystem
/// unchanged.
#[derive(Debug, Clone)]
pub struct UserContext {
    username: Option<String>,
    is_logged_in: bool,
    current_dir: PathBuf,
    rename_from: Option<PathBuf>,
}

impl UserContext {
    /// A fresh, unauthenticated context whose working directory is `home`.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            username: None,
            is_logged_in: false,
            current_dir: home.into(),
            rename_from: None,
        }
    }

    pub fn auth_state(&self) -> AuthState {
        match (&self.username, self.is_logged_in) {
            (_, true) => AuthState::Authenticated,
            (Some(_), false) => AuthState::AwaitingPassword,
            (None, false) => AuthState::Unauthenticated,
        }
    }

    /// Username accepted by USER, pending or logged in.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    pub fn rename_from(&self) -> Option<&Path> {
        self.rename_from.as_deref()
    }

    /// Records the username accepted by USER; login still requires PASS.
    pub fn set_pending_user(&mut self, username: &str) {
        self.username = Some(username.to_string());
    }

    /// Marks the pending user as logged in and moves to `home`.
    pub fn log_in(&mut self, home: impl Into<PathBuf>) {
        self.is_logged_in = true;
        self.current_dir = home.into();
    }

    pub fn set_current_dir(&mut self, dir: PathBuf) {
        self.current_dir = dir;
    }

    pub fn set_rename_from(&mut self, path: PathBuf) {
        self.rename_from = Some(path);
    }

    pub fn take_rename_from(&mut self) -> Option<PathBuf> {
        self.rename_from.take()
    }

    /// Moves to the parent of the working directory. The parent of a
    /// top-level entry is `/`, and `/` is its own parent.
    pub fn change_to_parent(&mut self) {
        self.current_dir = match self.current_dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("/"),
        };
    }

    /// Resolves `path` against the working directory. Absolute paths are
    /// returned as-is; no `..` collapsing and no existence check.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.current_dir.join(path)
    }
}
