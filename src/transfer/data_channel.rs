//! Module `data_channel`
//!
//! `DataTransfer` owns everything one RETR, STOR or LIST needs: the data
//! connection (active or passive), the local file and the advisory lock on
//! it. Dropping the transfer closes the socket, the file and the lock.

use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use nix::fcntl::{Flock, FlockArg};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{ListError, TransferError};
use crate::transfer::listing::format_entry;
use crate::transfer::modes::DataMode;

/// Tuning shared by every transfer of a session.
#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    pub buffer_size: usize,
    /// Bound on the single accept/connect attempt; `None` waits forever.
    pub connect_timeout: Option<Duration>,
}

/// Retried rather than treated as a failure.
fn is_transient(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock)
}

/// One data-connection-bound operation.
#[derive(Debug)]
pub struct DataTransfer {
    mode: DataMode,
    settings: TransferSettings,
    attempted: bool,
    stream: Option<TcpStream>,
    file_path: Option<PathBuf>,
    file: Option<std::fs::File>,
    lock: Option<Flock<std::fs::File>>,
}

impl DataTransfer {
    /// Active mode: the server will connect out to `addr`.
    pub fn active(addr: SocketAddr, settings: TransferSettings) -> Self {
        Self::with_mode(DataMode::Active(addr), settings)
    }

    /// Passive mode: the server will accept one connection on `listener`.
    pub fn passive(listener: Arc<TcpListener>, settings: TransferSettings) -> Self {
        Self::with_mode(DataMode::Passive(listener), settings)
    }

    fn with_mode(mode: DataMode, settings: TransferSettings) -> Self {
        Self {
            mode,
            settings,
            attempted: false,
            stream: None,
            file_path: None,
            file: None,
            lock: None,
        }
    }

    pub fn mode(&self) -> &DataMode {
        &self.mode
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Establishes the data connection. Only one attempt is made per
    /// transfer, successful or not.
    pub async fn connect(&mut self) -> Result<(), TransferError> {
        if self.attempted {
            return Err(TransferError::AlreadyAttempted);
        }
        self.attempted = true;

        let attempt = establish(&self.mode);

        let stream = match self.settings.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| TransferError::Timeout(limit))??,
            None => attempt.await?,
        };

        self.stream = Some(stream);
        Ok(())
    }

    /// Opens `path` for reading (RETR).
    pub fn open_source(&mut self, path: &Path) -> Result<(), TransferError> {
        let file = std::fs::File::open(path).map_err(|source| TransferError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
        self.attach_file(path, file);
        Ok(())
    }

    /// Opens `path` for appending, creating it if needed (STOR).
    pub fn open_destination(&mut self, path: &Path) -> Result<(), TransferError> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|source| TransferError::FileOpen {
                path: path.to_path_buf(),
                source,
            })?;
        self.attach_file(path, file);
        Ok(())
    }

    fn attach_file(&mut self, path: &Path, file: std::fs::File) {
        debug!("Attached {} to data transfer", path.display());
        self.file_path = Some(path.to_path_buf());
        self.file = Some(file);
        self.lock = None;
    }

    /// Takes a non-blocking advisory lock on the attached file and returns
    /// an async handle on it. The lock lives as long as the transfer.
    fn lock_file(&mut self, arg: FlockArg) -> Result<tokio::fs::File, TransferError> {
        let file = self.file.take().ok_or(TransferError::NoFile)?;
        let guard = Flock::lock(file, arg).map_err(|(_, errno)| TransferError::LockUnavailable {
            path: self.file_path.clone().unwrap_or_default(),
            errno,
        })?;
        let handle = guard.try_clone()?;
        self.lock = Some(guard);
        Ok(tokio::fs::File::from_std(handle))
    }

    /// Streams the attached file to the peer under a shared lock.
    pub async fn send_file(&mut self) -> Result<u64, TransferError> {
        let mut file = self.lock_file(FlockArg::LockSharedNonblock)?;
        let stream = self.stream.as_mut().ok_or(TransferError::NotConnected)?;
        let mut buf = vec![0u8; self.settings.buffer_size];
        let mut total = 0u64;

        loop {
            let n = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if is_transient(&e) => continue,
                Err(e) => return Err(e.into()),
            };
            write_all(stream, &buf[..n]).await?;
            total += n as u64;
        }

        stream.shutdown().await?;
        debug!("Sent {} bytes over data connection", total);
        Ok(total)
    }

    /// Appends everything the peer sends to the attached file under an
    /// exclusive lock, until the peer closes the connection.
    pub async fn receive_file(&mut self) -> Result<u64, TransferError> {
        let mut file = self.lock_file(FlockArg::LockExclusiveNonblock)?;
        let stream = self.stream.as_mut().ok_or(TransferError::NotConnected)?;
        let mut buf = vec![0u8; self.settings.buffer_size];
        let mut total = 0u64;

        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if is_transient(&e) => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(&buf[..n]).await?;
            total += n as u64;
        }

        file.flush().await?;
        debug!("Received {} bytes over data connection", total);
        Ok(total)
    }

    /// Sends one listing line per entry of `dir`, starting with `.` and
    /// `..`. Fails with `NotApplicable` when `dir` cannot be enumerated.
    pub async fn list_directory(&mut self, dir: &Path) -> Result<usize, ListError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|source| ListError::NotApplicable {
                path: dir.to_path_buf(),
                source,
            })?;
        let stream = self.stream.as_mut().ok_or(TransferError::NotConnected)?;
        let mut sent = 0;

        for special in [".", ".."] {
            let metadata = tokio::fs::metadata(dir.join(special))
                .await
                .map_err(TransferError::from)?;
            write_all(stream, &format_entry(OsStr::new(special), &metadata)).await?;
            sent += 1;
        }

        while let Some(entry) = entries.next_entry().await.map_err(TransferError::from)? {
            let metadata = tokio::fs::metadata(entry.path())
                .await
                .map_err(TransferError::from)?;
            write_all(stream, &format_entry(&entry.file_name(), &metadata)).await?;
            sent += 1;
        }

        stream.shutdown().await.map_err(TransferError::from)?;
        Ok(sent)
    }

    /// Sends a single listing line for `path`. Fails with `NotApplicable`
    /// when `path` cannot be stat'ed.
    pub async fn list_file(&mut self, path: &Path) -> Result<(), ListError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|source| ListError::NotApplicable {
                path: path.to_path_buf(),
                source,
            })?;
        let stream = self.stream.as_mut().ok_or(TransferError::NotConnected)?;
        let name = path.file_name().unwrap_or(path.as_os_str());

        write_all(stream, &format_entry(name, &metadata)).await?;
        stream.shutdown().await.map_err(TransferError::from)?;
        Ok(())
    }
}

impl Drop for DataTransfer {
    fn drop(&mut self) {
        if self.lock.is_some() || self.stream.is_some() {
            debug!(
                "Releasing data transfer for {}",
                self.file_path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "listing".to_string())
            );
        }
    }
}

async fn establish(mode: &DataMode) -> Result<TcpStream, TransferError> {
    match mode {
        DataMode::Active(addr) => {
            let stream = TcpStream::connect(*addr)
                .await
                .map_err(|e| TransferError::Connect(*addr, e))?;
            info!("Active data connection established to {}", addr);
            Ok(stream)
        }
        DataMode::Passive(listener) => {
            let (stream, peer) = listener.accept().await.map_err(TransferError::Accept)?;
            info!("Passive data connection accepted from {}", peer);
            Ok(stream)
        }
    }
}

/// Writes the whole chunk, retrying transient failures.
async fn write_all(stream: &mut TcpStream, mut chunk: &[u8]) -> Result<(), TransferError> {
    while !chunk.is_empty() {
        match stream.write(chunk).await {
            Ok(0) => {
                warn!("Data connection closed by peer mid-transfer");
                return Err(TransferError::Io(ErrorKind::WriteZero.into()));
            }
            Ok(n) => chunk = &chunk[n..],
            Err(e) if is_transient(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
