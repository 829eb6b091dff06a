use std::ffi::OsStr;
use std::fs;
use std::net::SocketAddr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use miniftpd::{CredentialStore, Server, ServerConfig, ShutdownHandle};
use nix::fcntl::{Flock, FlockArg};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    root: TempDir,
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("alice")).unwrap();

        let mut config = ServerConfig {
            bind_address: "127.0.0.1".into(),
            control_port: 0,
            home_root: root.path().to_string_lossy().into_owned(),
            ..ServerConfig::default()
        };
        tweak(&mut config);

        let credentials =
            CredentialStore::from_plaintext([("alice", "wonderland")], &config.password_salt);
        let server = Server::bind(config, credentials).await.unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(async move {
            server.run().await.unwrap();
        });

        Self {
            root,
            addr,
            shutdown,
            task,
        }
    }

    fn home(&self) -> String {
        format!("{}/alice", self.root.path().display())
    }

    async fn connect(&self) -> Client {
        let mut client = Client::open(self.addr).await;
        assert!(client.reply().await.starts_with("220 "));
        client
    }

    async fn login(&self) -> Client {
        let mut client = self.connect().await;
        assert!(client.send("USER alice").await.starts_with("331 "));
        assert!(client.send("PASS wonderland").await.starts_with("230 "));
        client
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn open(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn write_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn command(&mut self, line: &str) {
        self.write_raw(format!("{line}\r\n").as_bytes()).await;
    }

    /// Next reply line with CRLF stripped; empty string on EOF.
    async fn reply(&mut self) -> String {
        let mut line = String::new();
        timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        line.trim_end_matches("\r\n").to_string()
    }

    async fn send(&mut self, line: &str) -> String {
        self.command(line).await;
        self.reply().await
    }

    /// Sends PASV and returns the advertised data address.
    async fn pasv(&mut self) -> SocketAddr {
        let reply = self.send("PASV").await;
        assert!(reply.starts_with("227 "), "{reply}");
        let start = reply.find('(').unwrap() + 1;
        let end = reply.find(')').unwrap();
        let fields: Vec<u16> = reply[start..end]
            .split(',')
            .map(|f| f.parse().unwrap())
            .collect();
        assert_eq!(&fields[..4], &[127u16, 0, 0, 1]);
        SocketAddr::from(([127, 0, 0, 1], fields[4] * 256 + fields[5]))
    }

    async fn closed(&mut self) -> bool {
        let mut rest = Vec::new();
        matches!(
            timeout(WAIT, self.reader.read_to_end(&mut rest)).await,
            Ok(Ok(0))
        )
    }
}

async fn read_all(mut stream: TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut data))
        .await
        .unwrap()
        .unwrap();
    data
}

#[tokio::test]
async fn login_pwd_pasv_list_scenario() {
    let server = TestServer::start().await;
    fs::write(format!("{}/notes.txt", server.home()), b"hello").unwrap();
    fs::create_dir(format!("{}/docs", server.home())).unwrap();

    let mut client = server.login().await;
    assert_eq!(
        client.send("PWD").await,
        format!("257 \"{}\" is your working directory", server.home())
    );

    let data_addr = client.pasv().await;
    let data = TcpStream::connect(data_addr).await.unwrap();
    assert!(client.send("LIST").await.starts_with("150 "));
    let listing = String::from_utf8(read_all(data).await).unwrap();
    assert!(client.reply().await.starts_with("200 "));

    let lines: Vec<&str> = listing.split_terminator("\r\n").collect();
    assert_eq!(lines.len(), 4, "{listing}");
    assert!(lines.iter().any(|l| l.ends_with(" .")));
    assert!(lines.iter().any(|l| l.ends_with(" ..")));
    assert!(lines.iter().any(|l| l.starts_with('d') && l.ends_with(" docs")));
    assert!(lines.iter().any(|l| l.starts_with('-') && l.ends_with(" notes.txt")));
}

#[tokio::test]
async fn bad_password_is_refused() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    assert!(client.send("PASS wonderland").await.starts_with("332 "));
    assert!(client.send("USER nobody").await.starts_with("430 "));
    assert!(client.send("USER alice").await.starts_with("331 "));
    assert!(client.send("PASS wrong").await.starts_with("430 "));
    assert!(client.send("PWD").await.starts_with("530 "));
}

#[tokio::test]
async fn active_mode_retr() {
    let server = TestServer::start().await;
    fs::write(format!("{}/report.bin", server.home()), b"active bytes").unwrap();
    let mut client = server.login().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let [p1, p2] = listener.local_addr().unwrap().port().to_be_bytes();
    assert!(client.send(&format!("PORT 127,0,0,1,{p1},{p2}")).await.starts_with("200 "));

    client.command("RETR report.bin").await;
    let (data, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    assert!(client.reply().await.starts_with("150 "));
    assert_eq!(read_all(data).await, b"active bytes");
    assert!(client.reply().await.starts_with("200 "));
}

#[tokio::test]
async fn stor_then_retr_is_byte_identical() {
    let server = TestServer::start().await;
    let mut client = server.login().await;
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 251) as u8).collect();

    let data_addr = client.pasv().await;
    let mut upload = TcpStream::connect(data_addr).await.unwrap();
    assert!(client.send("STOR fresh.bin").await.starts_with("150 "));
    upload.write_all(&payload).await.unwrap();
    drop(upload);
    assert!(client.reply().await.starts_with("200 "));

    let data_addr = client.pasv().await;
    let download = TcpStream::connect(data_addr).await.unwrap();
    assert!(client.send("RETR fresh.bin").await.starts_with("150 "));
    assert_eq!(read_all(download).await, payload);
    assert!(client.reply().await.starts_with("200 "));
}

#[tokio::test]
async fn non_utf8_file_names_keep_their_octets() {
    let server = TestServer::start().await;
    let home = server.home();
    let mut client = server.login().await;

    client.write_raw(b"MKD caf\xe9\r\n").await;
    assert!(client.reply().await.starts_with("257 "));
    let dir = Path::new(&home).join(OsStr::from_bytes(b"caf\xe9"));
    assert!(dir.is_dir());
    assert!(!Path::new(&home).join("caf\u{fffd}").exists());

    let data_addr = client.pasv().await;
    let mut upload = TcpStream::connect(data_addr).await.unwrap();
    client.write_raw(b"STOR caf\xe9/men\xfc.txt\r\n").await;
    assert!(client.reply().await.starts_with("150 "));
    upload.write_all(b"latin-1 bytes").await.unwrap();
    drop(upload);
    assert!(client.reply().await.starts_with("200 "));
    assert_eq!(
        fs::read(dir.join(OsStr::from_bytes(b"men\xfc.txt"))).unwrap(),
        b"latin-1 bytes"
    );

    let data_addr = client.pasv().await;
    let download = TcpStream::connect(data_addr).await.unwrap();
    client.write_raw(b"RETR caf\xe9/men\xfc.txt\r\n").await;
    assert!(client.reply().await.starts_with("150 "));
    assert_eq!(read_all(download).await, b"latin-1 bytes");
    assert!(client.reply().await.starts_with("200 "));
}

#[tokio::test]
async fn retr_without_port_or_pasv_is_rejected() {
    let server = TestServer::start().await;
    let mut client = server.login().await;
    assert!(client.send("RETR missing.bin").await.starts_with("503 "));
    assert!(client.send("PWD").await.starts_with("257 "));
}

#[tokio::test]
async fn rnto_without_rnfr_leaves_files_alone() {
    let server = TestServer::start().await;
    let original = format!("{}/keep.txt", server.home());
    fs::write(&original, b"keep").unwrap();

    let mut client = server.login().await;
    assert!(client.send("RNTO moved.txt").await.starts_with("503 "));
    assert_eq!(fs::read(&original).unwrap(), b"keep");
    assert!(fs::metadata(format!("{}/moved.txt", server.home())).is_err());
}

#[tokio::test]
async fn idle_session_is_closed() {
    let server = TestServer::start_with(|config| config.idle_timeout_secs = 1).await;
    let mut client = server.login().await;
    assert!(client.closed().await);
}

#[tokio::test]
async fn overlong_line_closes_session() {
    let server = TestServer::start_with(|config| config.max_command_length = 32).await;
    let mut client = server.connect().await;
    client
        .write_raw(format!("USER {}\r\n", "a".repeat(64)).as_bytes())
        .await;
    assert!(client.reply().await.starts_with("421 "));
    assert!(client.closed().await);
}

#[tokio::test]
async fn bare_lf_closes_session() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    client.write_raw(b"PWD\n").await;
    assert!(client.reply().await.starts_with("421 "));
    assert!(client.closed().await);
}

#[tokio::test]
async fn quit_says_goodbye() {
    let server = TestServer::start().await;
    let mut client = server.login().await;
    assert!(client.send("QUIT").await.starts_with("421 "));
    assert!(client.closed().await);
}

#[tokio::test]
async fn locked_file_aborts_transfer() {
    let server = TestServer::start().await;
    let path = format!("{}/busy.bin", server.home());
    fs::write(&path, b"busy").unwrap();
    let holder = Flock::lock(fs::File::open(&path).unwrap(), FlockArg::LockExclusiveNonblock)
        .unwrap();

    let mut client = server.login().await;
    let data_addr = client.pasv().await;
    let data = TcpStream::connect(data_addr).await.unwrap();
    assert!(client.send("RETR busy.bin").await.starts_with("150 "));
    assert!(client.reply().await.starts_with("500 "));
    assert!(read_all(data).await.is_empty());
    drop(holder);

    assert!(client.send("RETR busy.bin").await.starts_with("503 "));
}

#[tokio::test]
async fn clients_beyond_the_limit_are_turned_away() {
    let server = TestServer::start_with(|config| config.max_clients = 1).await;
    let mut first = server.connect().await;

    let mut second = Client::open(server.addr).await;
    assert!(second.reply().await.starts_with("421 "));
    assert!(second.closed().await);

    assert!(first.send("USER alice").await.starts_with("331 "));
}

#[tokio::test]
async fn shutdown_closes_live_sessions() {
    let server = TestServer::start().await;
    let mut client = server.login().await;

    server.shutdown.shutdown();
    assert!(client.reply().await.starts_with("421 "));
    assert!(client.closed().await);
    timeout(WAIT, server.task).await.unwrap().unwrap();
}
