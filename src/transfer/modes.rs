//! FTP Transfer modes
//!
//! Handles active and passive mode addressing: the PORT argument codec and
//! the passive listener a PASV command opens.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::TcpListener;

/// How the data connection of one transfer gets established.
#[derive(Debug, Clone)]
pub enum DataMode {
    /// Server connects out to the address supplied by PORT.
    Active(SocketAddr),
    /// Server accepts on the listener opened by PASV.
    Passive(Arc<TcpListener>),
}

impl DataMode {
    pub fn is_passive(&self) -> bool {
        matches!(self, DataMode::Passive(_))
    }
}

/// Parses a PORT argument `h1,h2,h3,h4,p1,p2`; port = p1 * 256 + p2.
pub fn parse_port_argument(arg: &str) -> Option<SocketAddrV4> {
    let fields = arg
        .trim()
        .split(',')
        .map(|field| field.trim().parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .ok()?;

    match fields.as_slice() {
        [h1, h2, h3, h4, p1, p2] => Some(SocketAddrV4::new(
            Ipv4Addr::new(*h1, *h2, *h3, *h4),
            u16::from_be_bytes([*p1, *p2]),
        )),
        _ => None,
    }
}

/// Opens the ephemeral listener used for passive data connections.
pub async fn open_passive_listener() -> io::Result<TcpListener> {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_argument() {
        let addr = parse_port_argument("192,168,1,20,19,137").unwrap();
        assert_eq!(*addr.ip(), Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(addr.port(), 19 * 256 + 137);
    }

    #[test]
    fn rejects_malformed_port_arguments() {
        assert!(parse_port_argument("127,0,0,1,4").is_none());
        assert!(parse_port_argument("127,0,0,1,4,1,9").is_none());
        assert!(parse_port_argument("127,0,0,256,4,1").is_none());
        assert!(parse_port_argument("a,b,c,d,e,f").is_none());
        assert!(parse_port_argument("").is_none());
    }

    #[tokio::test]
    async fn passive_listener_gets_an_ephemeral_port() {
        let listener = open_passive_listener().await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
