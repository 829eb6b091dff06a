//! Credential storage and verification
//!
//! The store is built once at startup from a line-oriented
//! `<username> <hex-sha256>` file and then shared read-only by every
//! session behind an `Arc`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, info};
use sha2::{Digest, Sha256};

use crate::error::CredentialError;

/// Immutable username -> salted-hash snapshot.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    users: HashMap<String, String>,
    salt: String,
}

impl CredentialStore {
    /// Loads the credential file at `path`.
    pub fn load(path: &Path, salt: &str) -> Result<Self, CredentialError> {
        let contents = fs::read_to_string(path).map_err(|source| CredentialError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::parse(&contents, salt)?;
        info!(
            "Loaded {} user(s) from {}",
            store.users.len(),
            path.display()
        );
        Ok(store)
    }

    /// Parses credential file contents. Blank lines are skipped; every other
    /// line must hold a username and a hash separated by one space.
    pub fn parse(contents: &str, salt: &str) -> Result<Self, CredentialError> {
        let mut users = HashMap::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let (username, hash) = line
                .split_once(' ')
                .filter(|(user, hash)| !user.is_empty() && !hash.is_empty())
                .ok_or(CredentialError::MalformedLine { line: idx + 1 })?;
            debug!("Registered user {}", username);
            users.insert(username.to_string(), hash.to_string());
        }
        Ok(Self {
            users,
            salt: salt.to_string(),
        })
    }

    /// Builds a store from plaintext pairs, hashing each password.
    pub fn from_plaintext<'a>(
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
        salt: &str,
    ) -> Self {
        let users = entries
            .into_iter()
            .map(|(user, password)| (user.to_string(), hash_password(password, salt)))
            .collect();
        Self {
            users,
            salt: salt.to_string(),
        }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// True iff `username` is known and `password` hashes to its stored value.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(stored) => hash_password(password, &self.salt) == *stored,
            None => false,
        }
    }
}

/// Lowercase hex SHA-256 of `password` followed by `salt`.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}
