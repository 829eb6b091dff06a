//! Configuration management for miniftpd
//!
//! Settings come from an optional TOML file layered under `MINIFTPD_*`
//! environment overrides. Every key has a default, so the server runs with no
//! configuration file at all. The control port is supplied on the command line.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_NAME: &str = "miniftpd";

/// Complete server configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind the control listener
    pub bind_address: String,

    /// Port for the control listener (set from the command line)
    pub control_port: u16,

    /// Host quad advertised in PASV replies
    pub passive_host: Ipv4Addr,

    /// Directory holding one home directory per user
    pub home_root: String,

    /// Path of the `<username> <hash>` credential file
    pub credentials_file: PathBuf,

    /// Shared salt appended to passwords before hashing
    pub password_salt: String,

    /// Idle time after the last recognized command before a session is closed
    pub idle_timeout_secs: u64,

    /// Maximum control line length, CRLF included
    pub max_command_length: usize,

    /// Chunk size for data connection copies
    pub transfer_buffer_size: usize,

    /// Bound on one accept/connect attempt; 0 waits forever
    pub data_connection_timeout_secs: u64,

    /// Runtime worker threads shared by all sessions
    pub worker_threads: usize,

    /// Maximum concurrent sessions
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            control_port: 2121,
            passive_host: Ipv4Addr::LOCALHOST,
            home_root: "/home".to_string(),
            credentials_file: PathBuf::from("./users.txt"),
            password_salt: "scutech".to_string(),
            idle_timeout_secs: 1800,
            max_command_length: 1024,
            transfer_buffer_size: 2048,
            data_connection_timeout_secs: 30,
            worker_threads: 4,
            max_clients: 64,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `path` (or `./miniftpd.toml` if present) with
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("MINIFTPD").try_parsing(true))
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Message(
                "worker_threads must be greater than 0".into(),
            ));
        }

        if self.max_command_length < 3 {
            return Err(ConfigError::Message(
                "max_command_length must leave room for a verb and CRLF".into(),
            ));
        }

        if self.transfer_buffer_size == 0 {
            return Err(ConfigError::Message(
                "transfer_buffer_size must be greater than 0".into(),
            ));
        }

        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "idle_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.max_clients == 0 {
            return Err(ConfigError::Message(
                "max_clients must be greater than 0".into(),
            ));
        }

        if !self.home_root.starts_with('/') {
            return Err(ConfigError::Message(
                "home_root must be an absolute path".into(),
            ));
        }

        Ok(())
    }

    /// Get bind address and control port as socket address
    pub fn control_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.control_port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// `None` means a data connection attempt may wait indefinitely.
    pub fn data_connection_timeout(&self) -> Option<Duration> {
        match self.data_connection_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Home directory of `username`, used as the working directory after login.
    pub fn home_for(&self, username: &str) -> String {
        format!("{}/{}", self.home_root.trim_end_matches('/'), username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.idle_timeout(), Duration::from_secs(1800));
        assert_eq!(config.passive_host, Ipv4Addr::new(127, 0, 0, 1));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "home_root = \"/srv/ftp\"\nidle_timeout_secs = 60\npassive_host = \"10.0.0.5\""
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.home_root, "/srv/ftp");
        assert_eq!(config.idle_timeout_secs, 60);
        assert_eq!(config.passive_host, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(config.max_command_length, 1024);
    }

    #[test]
    fn relative_home_root_is_rejected() {
        let config = ServerConfig {
            home_root: "home".into(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = ServerConfig {
            worker_threads: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn home_is_joined_once() {
        let config = ServerConfig {
            home_root: "/home/".into(),
            ..ServerConfig::default()
        };
        assert_eq!(config.home_for("alice"), "/home/alice");
    }

    #[test]
    fn zero_data_timeout_means_unbounded() {
        let config = ServerConfig {
            data_connection_timeout_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.data_connection_timeout(), None);
    }
}
