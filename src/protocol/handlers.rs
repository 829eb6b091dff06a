//! Command handlers module for miniftpd.
//!
//! `execute` takes one control line, dispatches it to the handler for its
//! verb and applies the reply and session consequence of the result.
//! Handlers send their own success replies; failures come back as
//! `FtpError` and are turned into a reply here.

use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::AsyncWrite;

use crate::client::{AuthState, Session};
use crate::error::{FtpError, ListError, TransferError};
use crate::protocol::responses;
use crate::protocol::{Command, CommandLine, CommandOutcome, parse_command};
use crate::transfer::{DataTransfer, open_passive_listener, parse_port_argument};

type HandlerResult = Result<CommandOutcome, FtpError>;

/// Runs one control line against `session` and returns what the driver
/// should do next. Every path except `Fatal` has sent exactly one reply.
pub async fn execute<W>(session: &mut Session<W>, line: &[u8]) -> CommandOutcome
where
    W: AsyncWrite + Unpin + Send,
{
    let CommandLine { verb, argument } = parse_command(line);
    let verb = String::from_utf8_lossy(verb);

    let result = match Command::from_verb(&verb) {
        Some(command) => {
            match argument {
                Some(_) if command == Command::Pass => {
                    debug!("{} -> PASS ****", session.peer())
                }
                Some(arg) => debug!(
                    "{} -> {} {}",
                    session.peer(),
                    command.verb(),
                    String::from_utf8_lossy(arg)
                ),
                None => debug!("{} -> {}", session.peer(), command.verb()),
            }
            session.touch();
            dispatch(session, command, argument).await
        }
        None => Err(FtpError::UnknownCommand(verb.to_string())),
    };

    match result {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("{} {}: {}", session.peer(), verb, err);
            let outcome = err.outcome();
            if let Some(reply) = err.reply() {
                if session.reply(reply).await.is_err() {
                    return CommandOutcome::Fatal;
                }
            }
            if outcome == CommandOutcome::DataConnClose {
                session.discard_transfer();
            }
            outcome
        }
    }
}

async fn dispatch<W>(
    session: &mut Session<W>,
    command: Command,
    argument: Option<&[u8]>,
) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    match command {
        Command::User => handle_user(session, argument).await,
        Command::Pass => handle_pass(session, argument).await,
        Command::Retr => transfer_file(session, argument, Direction::Retrieve).await,
        Command::Stor => transfer_file(session, argument, Direction::Store).await,
        Command::List => handle_list(session, argument).await,
        Command::Quit => handle_quit(session),
        _ if session.user.auth_state() != AuthState::Authenticated => {
            Err(FtpError::NotLoggedIn)
        }
        Command::Pwd => handle_pwd(session).await,
        Command::Cwd => handle_cwd(session, argument).await,
        Command::Cdup => handle_cdup(session).await,
        Command::Port => handle_port(session, argument).await,
        Command::Pasv => handle_pasv(session).await,
        Command::Type => handle_type(session, argument).await,
        Command::Rnfr => handle_rnfr(session, argument).await,
        Command::Rnto => handle_rnto(session, argument).await,
        Command::Dele => handle_dele(session, argument).await,
        Command::Rmd => handle_rmd(session, argument).await,
        Command::Mkd => handle_mkd(session, argument).await,
    }
}

/// The argument of a command that needs one; empty counts as missing.
fn required(argument: Option<&[u8]>) -> Result<&[u8], FtpError> {
    match argument {
        Some(arg) if !arg.is_empty() => Ok(arg),
        _ => Err(FtpError::InvalidArgument("missing argument".into())),
    }
}

/// A required argument that must be text (user names, passwords, PORT).
fn required_text(argument: Option<&[u8]>) -> Result<&str, FtpError> {
    std::str::from_utf8(required(argument)?)
        .map_err(|_| FtpError::InvalidArgument("argument is not valid UTF-8".into()))
}

/// A required path argument, octets passed to the filesystem unchanged.
fn required_path(argument: Option<&[u8]>) -> Result<&Path, FtpError> {
    required(argument).map(|arg| Path::new(OsStr::from_bytes(arg)))
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

fn handle_quit<W>(session: &mut Session<W>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    info!("Client {} requested to quit", session.peer());
    Ok(CommandOutcome::Fatal)
}

/// USER: a known name becomes the pending user; an unknown one changes
/// nothing.
async fn handle_user<W>(session: &mut Session<W>, argument: Option<&[u8]>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    if session.user.auth_state() == AuthState::Authenticated {
        session.reply(responses::LOGIN_SUCCESS).await?;
        return Ok(CommandOutcome::Ok);
    }

    let username = required_text(argument)?;
    if !session.credentials.contains(username) {
        return Err(FtpError::LoginFailed);
    }

    session.user.set_pending_user(username);
    session.reply(responses::REQUIRE_PASS).await?;
    Ok(CommandOutcome::Ok)
}

async fn handle_pass<W>(session: &mut Session<W>, argument: Option<&[u8]>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let username = match (session.user.auth_state(), session.user.username()) {
        (AuthState::Unauthenticated, _) | (_, None) => return Err(FtpError::NeedAccount),
        (_, Some(username)) => username.to_owned(),
    };
    let password = required_text(argument)?;

    if !session.credentials.verify(&username, password) {
        return Err(FtpError::LoginFailed);
    }

    let home = session.config.home_for(&username);
    session.user.log_in(home);
    session.record_login(&username).await;
    info!("User {} logged in from {}", username, session.peer());

    session.reply(responses::LOGIN_SUCCESS).await?;
    Ok(CommandOutcome::Ok)
}

async fn handle_pwd<W>(session: &mut Session<W>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let reply = responses::current_directory(&session.user.current_dir().to_string_lossy());
    session.reply(&reply).await?;
    Ok(CommandOutcome::Ok)
}

/// CWD does not check that the target exists.
async fn handle_cwd<W>(session: &mut Session<W>, argument: Option<&[u8]>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let target = session.user.resolve(required_path(argument)?);
    session.user.set_current_dir(target);
    session.reply(responses::COMMON_SUCCESS).await?;
    Ok(CommandOutcome::Ok)
}

async fn handle_cdup<W>(session: &mut Session<W>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    session.user.change_to_parent();
    session.reply(responses::COMMON_SUCCESS).await?;
    Ok(CommandOutcome::Ok)
}

/// PORT drops any passive listener and pending transfer.
async fn handle_port<W>(session: &mut Session<W>, argument: Option<&[u8]>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let arg = required_text(argument)?;
    let addr = parse_port_argument(arg)
        .ok_or_else(|| FtpError::InvalidArgument(format!("bad PORT address {arg}")))?;

    session.passive_listener = None;
    session.discard_transfer();
    session.transfer = Some(DataTransfer::active(addr.into(), session.transfer_settings()));
    info!("Client {} set active mode to {}", session.peer(), addr);

    session.reply(responses::COMMON_SUCCESS).await?;
    Ok(CommandOutcome::Ok)
}

/// PASV opens the session's listener once and reuses it afterwards.
async fn handle_pasv<W>(session: &mut Session<W>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let listener = match session.passive_listener.clone() {
        Some(listener) => listener,
        None => {
            let listener = open_passive_listener()
                .await
                .map_err(FtpError::PassiveUnavailable)?;
            let listener = Arc::new(listener);
            session.passive_listener = Some(Arc::clone(&listener));
            listener
        }
    };
    let port = listener
        .local_addr()
        .map_err(FtpError::PassiveUnavailable)?
        .port();

    session.discard_transfer();
    session.transfer = Some(DataTransfer::passive(listener, session.transfer_settings()));
    info!("Client {} entered passive mode on port {}", session.peer(), port);

    let reply = responses::passive_mode(session.config.passive_host, port);
    session.reply(&reply).await?;
    Ok(CommandOutcome::Ok)
}

/// Only image (binary) type is supported.
async fn handle_type<W>(session: &mut Session<W>, argument: Option<&[u8]>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let arg = required(argument)?;
    if !arg.starts_with(b"I") && !arg.starts_with(b"i") {
        return Err(FtpError::InvalidArgument(format!(
            "unsupported type {}",
            String::from_utf8_lossy(arg)
        )));
    }
    session.reply(responses::COMMON_SUCCESS).await?;
    Ok(CommandOutcome::Ok)
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Retrieve,
    Store,
}

impl Direction {
    fn verb(self) -> &'static str {
        match self {
            Direction::Retrieve => "RETR",
            Direction::Store => "STOR",
        }
    }
}

/// RETR and STOR. The local file is opened before any data connection is
/// attempted, so a missing source never touches the network.
async fn transfer_file<W>(
    session: &mut Session<W>,
    argument: Option<&[u8]>,
    direction: Direction,
) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let transfer = session
        .transfer
        .as_mut()
        .ok_or(FtpError::BadSequence("transfer requested before PORT or PASV"))?;
    let path = session.user.resolve(required_path(argument)?);

    let opened = match direction {
        Direction::Retrieve => transfer.open_source(&path),
        Direction::Store => transfer.open_destination(&path),
    };
    opened.map_err(|e| file_open_failed(&path, e))?;

    let mut transfer = session
        .transfer
        .take()
        .ok_or(FtpError::BadSequence("transfer requested before PORT or PASV"))?;
    debug!(
        "{} {} opening {} data connection",
        session.peer(),
        direction.verb(),
        if transfer.mode().is_passive() { "passive" } else { "active" }
    );
    transfer.connect().await.map_err(FtpError::DataConnection)?;
    session.reply(responses::CONNECTION_READY).await?;

    let moved = match direction {
        Direction::Retrieve => transfer.send_file().await,
        Direction::Store => transfer.receive_file().await,
    }
    .map_err(FtpError::TransferAborted)?;
    drop(transfer);

    info!(
        "{} {} {} completed: {} bytes",
        session.peer(),
        direction.verb(),
        path.display(),
        moved
    );
    session.touch();
    session.reply(responses::COMMON_SUCCESS).await?;
    Ok(CommandOutcome::Ok)
}

fn file_open_failed(path: &Path, err: TransferError) -> FtpError {
    let source = match err {
        TransferError::FileOpen { source, .. } => source,
        other => io::Error::other(other),
    };
    FtpError::FileActionFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// LIST lists the working directory when no path is given. A path that is
/// not a directory is listed as a single file.
async fn handle_list<W>(session: &mut Session<W>, argument: Option<&[u8]>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let mut transfer = session
        .transfer
        .take()
        .ok_or(FtpError::BadSequence("LIST requested before PORT or PASV"))?;
    let path: PathBuf = match argument.filter(|arg| !arg.is_empty()) {
        Some(arg) => session.user.resolve(Path::new(OsStr::from_bytes(arg))),
        None => session.user.current_dir().to_path_buf(),
    };

    transfer.connect().await.map_err(FtpError::DataConnection)?;
    session.reply(responses::CONNECTION_READY).await?;

    let target = path.as_path();
    match transfer.list_directory(target).await {
        Ok(entries) => debug!("Listed {} entries of {}", entries, path.display()),
        Err(ListError::NotApplicable { .. }) => {
            transfer.list_file(target).await.map_err(listing_failed)?
        }
        Err(err) => return Err(listing_failed(err)),
    }
    drop(transfer);

    session.reply(responses::COMMON_SUCCESS).await?;
    Ok(CommandOutcome::Ok)
}

fn listing_failed(err: ListError) -> FtpError {
    match err {
        err @ ListError::NotApplicable { .. } => FtpError::ListingUnavailable(err),
        ListError::Transfer(err) => FtpError::TransferAborted(err),
    }
}

async fn handle_rnfr<W>(session: &mut Session<W>, argument: Option<&[u8]>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let source = session.user.resolve(required_path(argument)?);
    if !exists(&source).await {
        return Err(FtpError::file_unavailable(&source, "no such file"));
    }
    session.user.set_rename_from(source);
    session.reply(responses::COMMON_SUCCESS).await?;
    Ok(CommandOutcome::Ok)
}

/// RNTO keeps the pending source when the rename fails.
async fn handle_rnto<W>(session: &mut Session<W>, argument: Option<&[u8]>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let Some(source) = session.user.rename_from().map(Path::to_path_buf) else {
        return Err(FtpError::BadSequence("RNTO without RNFR"));
    };
    let target = session.user.resolve(required_path(argument)?);

    tokio::fs::rename(&source, &target)
        .await
        .map_err(|e| FtpError::FileActionFailed {
            path: source.clone(),
            source: e,
        })?;
    session.user.take_rename_from();
    info!("Renamed {} to {}", source.display(), target.display());

    session.reply(responses::COMMON_SUCCESS).await?;
    Ok(CommandOutcome::Ok)
}

async fn handle_dele<W>(session: &mut Session<W>, argument: Option<&[u8]>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let path = session.user.resolve(required_path(argument)?);
    if !exists(&path).await {
        return Err(FtpError::file_unavailable(&path, "no such file"));
    }
    tokio::fs::remove_file(&path)
        .await
        .map_err(|source| FtpError::FileActionFailed {
            path: path.clone(),
            source,
        })?;
    info!("Deleted {}", path.display());

    session.reply(responses::COMMON_SUCCESS).await?;
    Ok(CommandOutcome::Ok)
}

/// RMD removes empty directories only.
async fn handle_rmd<W>(session: &mut Session<W>, argument: Option<&[u8]>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let path = session.user.resolve(required_path(argument)?);
    match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Err(FtpError::file_unavailable(&path, "not a directory")),
        Err(e) => return Err(FtpError::file_unavailable(&path, e)),
    }
    tokio::fs::remove_dir(&path)
        .await
        .map_err(|source| FtpError::FileActionFailed {
            path: path.clone(),
            source,
        })?;
    info!("Removed directory {}", path.display());

    session.reply(responses::FILE_SUCCESS).await?;
    Ok(CommandOutcome::Ok)
}

async fn handle_mkd<W>(session: &mut Session<W>, argument: Option<&[u8]>) -> HandlerResult
where
    W: AsyncWrite + Unpin + Send,
{
    let path = session.user.resolve(required_path(argument)?);
    tokio::fs::create_dir(&path)
        .await
        .map_err(|source| FtpError::FileActionFailed {
            path: path.clone(),
            source,
        })?;
    info!("Created directory {}", path.display());

    session.reply(responses::MKD_SUCCESS).await?;
    Ok(CommandOutcome::Ok)
}
