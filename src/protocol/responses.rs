//! FTP Response handling
//!
//! Reply texts sent on the control connection. Every reply is a single
//! `<code> <text>\r\n` line.

use std::net::Ipv4Addr;

pub const CONNECTION_READY: &str = "150 Data connection already open; transfer starting\r\n";

pub const COMMON_SUCCESS: &str = "200 Command okay\r\n";
pub const NEW_USER: &str = "220 Service ready for new user\r\n";
pub const LOGIN_SUCCESS: &str = "230 User logged in, proceed\r\n";
pub const FILE_SUCCESS: &str = "250 Requested file action okay, completed\r\n";
pub const MKD_SUCCESS: &str = "257 making directory OK\r\n";

pub const REQUIRE_PASS: &str = "331 User name okay, need password\r\n";
pub const REQUIRE_USER: &str = "332 Need account for login\r\n";

pub const CLOSING: &str = "421 Service not available, closing control connection\r\n";
pub const DATA_LINK_FAIL: &str = "425 Can't open data connection\r\n";
pub const LOGIN_FAIL: &str = "430 Invalid username or password\r\n";

pub const INVALID_COMMAND: &str = "500 Syntax error, command unrecognized\r\n";
pub const FAILED: &str = "500 Command failed\r\n";
pub const INVALID_PARAM: &str = "501 Syntax error in parameters or argument\r\n";
pub const BAD_SEQUENCE: &str = "503 Bad sequence of commands\r\n";
pub const NOT_LOGGED_IN: &str = "530 Not logged in\r\n";

/// Format an FTP response message
pub fn format_response(code: u16, message: &str) -> String {
    format!("{} {}\r\n", code, message)
}

/// 257 reply carrying the quoted working directory.
pub fn current_directory(path: &str) -> String {
    format_response(257, &format!("\"{}\" is your working directory", path))
}

/// 227 reply advertising `host` and `port` as `(h1,h2,h3,h4,p1,p2)`.
pub fn passive_mode(host: Ipv4Addr, port: u16) -> String {
    let [h1, h2, h3, h4] = host.octets();
    let [p1, p2] = port.to_be_bytes();
    format_response(
        227,
        &format!("Entering Passive Mode. ({h1},{h2},{h3},{h4},{p1},{p2})"),
    )
}
