use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ssh2::{ErrorCode, Session};

use crate::error::SessionError;
use crate::model::{AuthMaterial, SessionProfile};

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const OUTGOING_LIMIT: usize = 64 * 1024;
const PEEK_BUFFER_SIZE: usize = 4096;
const PTY_TERM: &str = "vt100";
const PTY_SIZE: (u32, u32, u32, u32) = (80, 24, 0, 0);

// libssh2 session error codes used to classify failures.
const LIBSSH2_ERROR_SOCKET_NONE: i32 = -1;
const LIBSSH2_ERROR_BANNER_RECV: i32 = -2;
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_PASSWORD_EXPIRED: i32 = -15;
const LIBSSH2_ERROR_FILE: i32 = -16;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

/// Everything needed to reach a host, resolved from a profile at connect time.
#[derive(Debug, Clone)]
pub(crate) struct ConnectTarget {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) username: String,
    pub(crate) auth: AuthMaterial,
}

impl ConnectTarget {
    pub(crate) fn from_profile(profile: &SessionProfile) -> Self {
        Self {
            host: profile.host.clone(),
            port: profile.port,
            username: profile.username.clone(),
            auth: profile.auth_material(),
        }
    }
}

pub(crate) trait Connector: Send + Sync {
    fn connect(
        &self,
        target: &ConnectTarget,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>, SessionError>;
}

pub(crate) trait Transport: Send {
    fn open_interactive_channel(&mut self) -> Result<Box<dyn ShellChannel>, SessionError>;
    fn close(&mut self);
}

/// Interactive shell stream. Reads never block; `data_ready` reports whether `read`
/// would return bytes right now.
pub(crate) trait ShellChannel: Send {
    fn data_ready(&mut self) -> io::Result<bool>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
    fn close(&mut self);
    fn is_closed(&self) -> bool;
    fn exit_status_ready(&self) -> bool;
}

pub(crate) type ChannelHandle = Arc<Mutex<Box<dyn ShellChannel>>>;

#[derive(Debug, Default)]
pub(crate) struct Ssh2Connector;

impl Connector for Ssh2Connector {
    fn connect(
        &self,
        target: &ConnectTarget,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>, SessionError> {
        let tcp = connect_tcp(&target.host, target.port, timeout)?;
        tcp.set_read_timeout(Some(timeout)).ok();
        tcp.set_write_timeout(Some(timeout)).ok();

        let mut session = Session::new()
            .map_err(|err| SessionError::UnknownFailure(format!("create session: {err}")))?;
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(classify)?;

        match &target.auth {
            AuthMaterial::Password(password) => {
                session
                    .userauth_password(&target.username, password)
                    .map_err(classify)?;
            }
            AuthMaterial::KeyFile(path) => {
                let path = expand_tilde(path);
                if !path.exists() {
                    return Err(SessionError::AuthenticationFailure(format!(
                        "Private key not found at {}",
                        path.display()
                    )));
                }
                session
                    .userauth_pubkey_file(&target.username, None, &path, None)
                    .map_err(classify)?;
            }
        }

        if !session.authenticated() {
            return Err(SessionError::AuthenticationFailure(
                "server rejected credentials".to_string(),
            ));
        }
        tracing::debug!(host = %target.host, port = target.port, "ssh session authenticated");
        Ok(Box::new(Ssh2Transport { session }))
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, SessionError> {
    let addresses = (host, port)
        .to_socket_addrs()
        .map_err(|err| SessionError::NetworkFailure(format!("resolve {host}: {err}")))?;
    let mut last_err = None;
    for addr in addresses {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    let reason = last_err
        .map(|err| err.to_string())
        .unwrap_or_else(|| "no addresses resolved".to_string());
    Err(SessionError::NetworkFailure(format!(
        "connect {host}:{port}: {reason}"
    )))
}

pub(crate) fn classify(err: ssh2::Error) -> SessionError {
    let message = err.message().to_string();
    match err.code() {
        ErrorCode::Session(
            LIBSSH2_ERROR_AUTHENTICATION_FAILED
            | LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED
            | LIBSSH2_ERROR_PASSWORD_EXPIRED
            | LIBSSH2_ERROR_FILE,
        ) => SessionError::AuthenticationFailure(message),
        ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_NONE
            | LIBSSH2_ERROR_BANNER_RECV
            | LIBSSH2_ERROR_SOCKET_SEND
            | LIBSSH2_ERROR_TIMEOUT
            | LIBSSH2_ERROR_SOCKET_DISCONNECT
            | LIBSSH2_ERROR_SOCKET_RECV,
        ) => SessionError::NetworkFailure(message),
        _ => SessionError::ProtocolFailure(message),
    }
}

struct Ssh2Transport {
    session: Session,
}

impl Transport for Ssh2Transport {
    fn open_interactive_channel(&mut self) -> Result<Box<dyn ShellChannel>, SessionError> {
        let mut channel = self.session.channel_session().map_err(classify)?;
        channel
            .request_pty(PTY_TERM, None, Some(PTY_SIZE))
            .map_err(classify)?;
        channel.shell().map_err(classify)?;
        self.session.set_blocking(false);
        Ok(Box::new(Ssh2Channel {
            channel,
            pending: Vec::new(),
            outgoing: Outgoing::default(),
            closed: false,
        }))
    }

    fn close(&mut self) {
        self.session
            .disconnect(None, "session closed by client", None)
            .ok();
    }
}

/// Input the channel has not accepted yet. It is handed over without waiting,
/// on later writes and whenever the reader polls.
#[derive(Debug, Default)]
struct Outgoing {
    bytes: Vec<u8>,
}

impl Outgoing {
    fn queue(&mut self, data: &[u8]) -> io::Result<()> {
        if self.bytes.len() + data.len() > OUTGOING_LIMIT {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "remote is not accepting input",
            ));
        }
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    fn drain_into(&mut self, sink: &mut impl Write) -> io::Result<()> {
        while !self.bytes.is_empty() {
            match sink.write(&self.bytes) {
                Ok(0) => break,
                Ok(count) => {
                    self.bytes.drain(..count);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        match sink.flush() {
            Err(err) if err.kind() != io::ErrorKind::WouldBlock => Err(err),
            _ => Ok(()),
        }
    }
}

struct Ssh2Channel {
    channel: ssh2::Channel,
    pending: Vec<u8>,
    outgoing: Outgoing,
    closed: bool,
}

impl Ssh2Channel {
    fn fill_pending(&mut self) -> io::Result<()> {
        self.outgoing.drain_into(&mut self.channel)?;
        let mut buffer = [0u8; PEEK_BUFFER_SIZE];
        match self.channel.read(&mut buffer) {
            Ok(0) => {}
            Ok(count) => {
                self.pending.extend_from_slice(&buffer[..count]);
                return Ok(());
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(err),
        }
        match self.channel.stderr().read(&mut buffer) {
            Ok(count) => self.pending.extend_from_slice(&buffer[..count]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(err),
        }
        Ok(())
    }
}

impl ShellChannel for Ssh2Channel {
    fn data_ready(&mut self) -> io::Result<bool> {
        if self.closed {
            return Ok(false);
        }
        if self.pending.is_empty() {
            self.fill_pending()?;
        }
        Ok(!self.pending.is_empty() || self.channel.eof())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            self.fill_pending()?;
        }
        let count = buf.len().min(self.pending.len());
        buf[..count].copy_from_slice(&self.pending[..count]);
        self.pending.drain(..count);
        Ok(count)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "channel closed",
            ));
        }
        self.outgoing.queue(data)?;
        self.outgoing.drain_into(&mut self.channel)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.channel.close().ok();
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn exit_status_ready(&self) -> bool {
        self.channel.eof() && self.pending.is_empty()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::model::FailureKind;

    #[derive(Default)]
    struct ShellState {
        incoming: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        closed: bool,
        exited: bool,
        hung_up: bool,
        broken: bool,
        transport_closed: bool,
    }

    /// Test handle onto a scripted remote shell; clones share state with the channel.
    #[derive(Clone, Default)]
    pub(crate) struct MockShell {
        state: Arc<Mutex<ShellState>>,
    }

    impl MockShell {
        pub(crate) fn push_output(&self, data: &str) {
            self.push_bytes(data.as_bytes());
        }

        pub(crate) fn push_bytes(&self, data: &[u8]) {
            self.state.lock().incoming.push_back(data.to_vec());
        }

        pub(crate) fn written(&self) -> String {
            String::from_utf8_lossy(&self.state.lock().written).into_owned()
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.state.lock().closed
        }

        pub(crate) fn transport_closed(&self) -> bool {
            self.state.lock().transport_closed
        }

        pub(crate) fn exit(&self) {
            self.state.lock().exited = true;
        }

        pub(crate) fn hang_up(&self) {
            self.state.lock().hung_up = true;
        }

        pub(crate) fn break_reads(&self) {
            self.state.lock().broken = true;
        }

        pub(crate) fn channel(&self) -> Box<dyn ShellChannel> {
            Box::new(MockChannel {
                shell: self.clone(),
            })
        }
    }

    struct MockChannel {
        shell: MockShell,
    }

    impl ShellChannel for MockChannel {
        fn data_ready(&mut self) -> io::Result<bool> {
            let state = self.shell.state.lock();
            if state.broken {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock read failure"));
            }
            Ok(!state.incoming.is_empty() || state.hung_up)
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.shell.state.lock();
            let Some(mut chunk) = state.incoming.pop_front() else {
                return Ok(0);
            };
            let count = buf.len().min(chunk.len());
            buf[..count].copy_from_slice(&chunk[..count]);
            if count < chunk.len() {
                let rest = chunk.split_off(count);
                state.incoming.push_front(rest);
            }
            Ok(count)
        }

        fn write(&mut self, data: &[u8]) -> io::Result<()> {
            let mut state = self.shell.state.lock();
            if state.closed {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed"));
            }
            state.written.extend_from_slice(data);
            Ok(())
        }

        fn close(&mut self) {
            self.shell.state.lock().closed = true;
        }

        fn is_closed(&self) -> bool {
            self.shell.state.lock().closed
        }

        fn exit_status_ready(&self) -> bool {
            self.shell.state.lock().exited
        }
    }

    struct MockTransport {
        shell: MockShell,
    }

    impl Transport for MockTransport {
        fn open_interactive_channel(&mut self) -> Result<Box<dyn ShellChannel>, SessionError> {
            Ok(self.shell.channel())
        }

        fn close(&mut self) {
            self.shell.state.lock().transport_closed = true;
        }
    }

    enum Behaviour {
        Shell(MockShell),
        Fail(FailureKind, String),
    }

    /// Connector keyed by host name. Unknown hosts fail with a network error.
    #[derive(Default)]
    pub(crate) struct MockConnector {
        hosts: Mutex<HashMap<String, Behaviour>>,
        attempts: AtomicUsize,
    }

    impl MockConnector {
        pub(crate) fn accept(&self, host: &str) -> MockShell {
            let shell = MockShell::default();
            self.hosts
                .lock()
                .insert(host.to_string(), Behaviour::Shell(shell.clone()));
            shell
        }

        pub(crate) fn reject(&self, host: &str, kind: FailureKind, message: &str) {
            self.hosts
                .lock()
                .insert(host.to_string(), Behaviour::Fail(kind, message.to_string()));
        }

        pub(crate) fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl Connector for MockConnector {
        fn connect(
            &self,
            target: &ConnectTarget,
            _timeout: Duration,
        ) -> Result<Box<dyn Transport>, SessionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.hosts.lock().get(&target.host) {
                Some(Behaviour::Shell(shell)) => Ok(Box::new(MockTransport {
                    shell: shell.clone(),
                })),
                Some(Behaviour::Fail(kind, message)) => Err(match kind {
                    FailureKind::Authentication => {
                        SessionError::AuthenticationFailure(message.clone())
                    }
                    FailureKind::Network => SessionError::NetworkFailure(message.clone()),
                    FailureKind::Protocol => SessionError::ProtocolFailure(message.clone()),
                    FailureKind::Unknown => SessionError::UnknownFailure(message.clone()),
                }),
                None => Err(SessionError::NetworkFailure(format!(
                    "unknown host {}",
                    target.host
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/etc/key"), PathBuf::from("/etc/key"));
    }

    #[test]
    fn target_carries_profile_auth() {
        let mut profile = SessionProfile::new("db1", "10.0.0.5", "alice");
        profile.port = 2200;
        profile.secret = Some("s3cr3t".into());
        let target = ConnectTarget::from_profile(&profile);
        assert_eq!(target.port, 2200);
        assert_eq!(target.auth, AuthMaterial::Password("s3cr3t".into()));
    }

    #[test]
    fn unresolvable_host_is_a_network_failure() {
        let target = ConnectTarget {
            host: "host.invalid".to_string(),
            port: 22,
            username: "u".to_string(),
            auth: AuthMaterial::Password(String::new()),
        };
        let result = Ssh2Connector.connect(&target, Duration::from_millis(200));
        assert!(matches!(result, Err(SessionError::NetworkFailure(_))));
    }

    /// Accepts at most `room` bytes, then reports a full buffer.
    struct Backlogged {
        room: usize,
        taken: Vec<u8>,
    }

    impl Write for Backlogged {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let count = buf.len().min(self.room);
            self.room -= count;
            self.taken.extend_from_slice(&buf[..count]);
            Ok(count)
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    #[test]
    fn full_channel_keeps_the_rest_without_waiting() {
        let mut sink = Backlogged {
            room: 3,
            taken: Vec::new(),
        };
        let mut outgoing = Outgoing::default();
        outgoing.queue(b"uptime\n").unwrap();
        outgoing.drain_into(&mut sink).unwrap();
        assert_eq!(sink.taken, b"upt");
        assert_eq!(outgoing.bytes, b"ime\n");

        sink.room = 64;
        outgoing.drain_into(&mut sink).unwrap();
        assert_eq!(sink.taken, b"uptime\n");
        assert!(outgoing.bytes.is_empty());
    }

    #[test]
    fn outgoing_backlog_is_bounded() {
        let mut outgoing = Outgoing::default();
        outgoing.queue(&vec![b'x'; OUTGOING_LIMIT]).unwrap();
        let err = outgoing.queue(b"\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(outgoing.bytes.len(), OUTGOING_LIMIT);
    }

    #[test]
    fn mock_channel_splits_large_chunks() {
        let shell = mock::MockShell::default();
        shell.push_output("abcdef");
        let mut channel = shell.channel();
        let mut buf = [0u8; 4];
        assert!(channel.data_ready().unwrap());
        assert_eq!(channel.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(channel.read(&mut buf).unwrap(), 2);
        assert!(!channel.data_ready().unwrap());
    }
}
