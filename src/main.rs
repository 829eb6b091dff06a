//! miniftpd - Entry Point
//!
//! Parses the command line, loads configuration and credentials, builds the
//! worker pool and runs the server until `quit` is typed on stdin.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use miniftpd::{CredentialStore, Server, ServerConfig, ShutdownHandle};

/// Multi-client FTP server.
#[derive(Debug, Parser)]
#[command(name = "miniftpd", version, about)]
struct Cli {
    /// Control port to listen on
    port: u16,

    /// Configuration file (defaults to ./miniftpd.toml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            writeln!(
                buf,
                "[{}] [{}] {}",
                timestamp,
                record.level(),
                record.args()
            )
        })
        .init();

    let mut config =
        ServerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.control_port = cli.port;

    let credentials = CredentialStore::load(&config.credentials_file, &config.password_salt)
        .with_context(|| {
            format!(
                "Failed to load credentials from {}",
                config.credentials_file.display()
            )
        })?;
    if credentials.is_empty() {
        warn!(
            "No users in {}, every login will be refused",
            config.credentials_file.display()
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(async move {
        let server = Server::bind(config, credentials)
            .await
            .context("Failed to start server")?;
        tokio::spawn(watch_stdin(server.shutdown_handle()));
        server.run().await.context("Server failed")?;
        info!("Server stopped");
        Ok::<(), anyhow::Error>(())
    })
}

/// Triggers shutdown when a `quit` line arrives on stdin. EOF is ignored so
/// the server keeps running when detached from a terminal.
async fn watch_stdin(handle: ShutdownHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim() == "quit" => {
                info!("Received quit on stdin");
                handle.shutdown();
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                return;
            }
        }
    }
}
