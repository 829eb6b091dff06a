//! Module `commands`
//!
//! Defines the FTP verbs this server understands, how a raw control line is
//! split into verb and argument, and the outcome every command reports back
//! to the session driver.

/// Represents an FTP command verb received from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    User,
    Pass,
    Pwd,
    Cwd,
    Cdup,
    Port,
    Pasv,
    Type,
    Retr,
    Stor,
    List,
    Rnfr,
    Rnto,
    Dele,
    Rmd,
    Mkd,
    Quit,
}

impl Command {
    /// Looks up a verb case-insensitively. Unknown verbs yield `None`.
    pub fn from_verb(verb: &str) -> Option<Self> {
        let command = match verb.to_ascii_uppercase().as_str() {
            "USER" => Command::User,
            "PASS" => Command::Pass,
            "PWD" => Command::Pwd,
            "CWD" => Command::Cwd,
            "CDUP" => Command::Cdup,
            "PORT" => Command::Port,
            "PASV" => Command::Pasv,
            "TYPE" => Command::Type,
            "RETR" => Command::Retr,
            "STOR" => Command::Stor,
            "LIST" => Command::List,
            "RNFR" => Command::Rnfr,
            "RNTO" => Command::Rnto,
            "DELE" => Command::Dele,
            "RMD" => Command::Rmd,
            "MKD" => Command::Mkd,
            "QUIT" => Command::Quit,
            _ => return None,
        };
        Some(command)
    }

    /// Canonical upper-case verb, used in logs.
    pub fn verb(self) -> &'static str {
        match self {
            Command::User => "USER",
            Command::Pass => "PASS",
            Command::Pwd => "PWD",
            Command::Cwd => "CWD",
            Command::Cdup => "CDUP",
            Command::Port => "PORT",
            Command::Pasv => "PASV",
            Command::Type => "TYPE",
            Command::Retr => "RETR",
            Command::Stor => "STOR",
            Command::List => "LIST",
            Command::Rnfr => "RNFR",
            Command::Rnto => "RNTO",
            Command::Dele => "DELE",
            Command::Rmd => "RMD",
            Command::Mkd => "MKD",
            Command::Quit => "QUIT",
        }
    }
}

/// Outcome of executing one command. The reply has always been sent
/// already (except for `Fatal`, where the driver sends the goodbye).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Success.
    Ok,
    /// Recoverable failure.
    Continue,
    /// Discard the data transfer, keep the session.
    DataConnClose,
    /// Close the control connection.
    Fatal,
}

/// A control line split into verb and raw argument.
#[derive(Debug, PartialEq, Eq)]
pub struct CommandLine<'a> {
    pub verb: &'a [u8],
    /// Everything after the first space, untrimmed and byte-for-byte.
    /// `None` when the line has no space at all.
    pub argument: Option<&'a [u8]>,
}

/// Splits a control line (CRLF already stripped) at its first space.
pub fn parse_command(line: &[u8]) -> CommandLine<'_> {
    match line.iter().position(|&b| b == b' ') {
        Some(idx) => CommandLine {
            verb: &line[..idx],
            argument: Some(&line[idx + 1..]),
        },
        None => CommandLine {
            verb: line,
            argument: None,
        },
    }
}
