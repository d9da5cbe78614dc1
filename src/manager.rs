use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::error::SessionError;
use crate::history::CommandHistory;
use crate::model::{Catalog, ConnectFailure, ConnectionState};
use crate::reader::{ReaderEvent, spawn_reader};
use crate::ssh::{
    CONNECT_TIMEOUT, ChannelHandle, ConnectTarget, Connector, ShellChannel, Transport,
};

/// Receives cleaned output on the dispatch thread.
pub(crate) trait DeliverySink {
    fn deliver(&mut self, session: &str, text: &str);

    fn session_closed(&mut self, _session: &str) {}
}

struct LiveLink {
    generation: u64,
    transport: Box<dyn Transport>,
    channel: ChannelHandle,
    reader: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SessionEntry {
    state: ConnectionState,
    link: Option<LiveLink>,
}

/// Owns every session's connection state, live channel and reader thread.
pub(crate) struct ConnectionManager {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    history: Mutex<CommandHistory>,
    events_tx: Sender<ReaderEvent>,
    events_rx: Mutex<Receiver<ReaderEvent>>,
    next_generation: AtomicU64,
}

impl ConnectionManager {
    pub(crate) fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_timeout(connector, CONNECT_TIMEOUT)
    }

    pub(crate) fn with_timeout(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            connector,
            connect_timeout,
            sessions: Mutex::new(HashMap::new()),
            history: Mutex::new(CommandHistory::default()),
            events_tx,
            events_rx: Mutex::new(events_rx),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Opens a shell for `name`. Blocks for at most the connect timeout; the session
    /// map is not locked while the handshake runs.
    pub(crate) fn connect(&self, name: &str, catalog: &Catalog) -> Result<(), SessionError> {
        let profile = catalog
            .get(name)
            .ok_or_else(|| SessionError::ProfileNotFound(name.to_string()))?;
        {
            let mut sessions = self.sessions.lock();
            let entry = sessions.entry(name.to_string()).or_default();
            if matches!(
                entry.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                tracing::debug!(session = %name, state = ?entry.state, "connect ignored, session active");
                return Ok(());
            }
            entry.state = ConnectionState::Connecting;
        }

        tracing::info!(session = %name, target = %profile.label(), "connecting");
        let target = ConnectTarget::from_profile(profile);
        match self.establish(&target) {
            Ok((transport, channel)) => self.install(name, transport, channel),
            Err(err) => {
                self.mark_failed(name, &err);
                Err(err)
            }
        }
    }

    fn establish(
        &self,
        target: &ConnectTarget,
    ) -> Result<(Box<dyn Transport>, Box<dyn ShellChannel>), SessionError> {
        let mut transport = self.connector.connect(target, self.connect_timeout)?;
        match transport.open_interactive_channel() {
            Ok(channel) => Ok((transport, channel)),
            Err(err) => {
                transport.close();
                Err(err)
            }
        }
    }

    fn install(
        &self,
        name: &str,
        mut transport: Box<dyn Transport>,
        channel: Box<dyn ShellChannel>,
    ) -> Result<(), SessionError> {
        let channel: ChannelHandle = Arc::new(Mutex::new(channel));
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions
            .get_mut(name)
            .filter(|entry| entry.state == ConnectionState::Connecting)
        else {
            drop(sessions);
            channel.lock().close();
            transport.close();
            tracing::info!(session = %name, "connection abandoned before it completed");
            return Err(SessionError::UnknownFailure(
                "connection attempt was abandoned".to_string(),
            ));
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        match spawn_reader(
            name.to_string(),
            generation,
            channel.clone(),
            self.events_tx.clone(),
        ) {
            Ok(reader) => {
                entry.link = Some(LiveLink {
                    generation,
                    transport,
                    channel,
                    reader: Some(reader),
                });
                entry.state = ConnectionState::Connected;
                tracing::info!(session = %name, generation, "connected");
                Ok(())
            }
            Err(err) => {
                let err = SessionError::UnknownFailure(format!("spawn reader: {err}"));
                entry.state = ConnectionState::Failed(ConnectFailure {
                    kind: err.failure_kind(),
                    message: err.to_string(),
                });
                drop(sessions);
                channel.lock().close();
                transport.close();
                Err(err)
            }
        }
    }

    fn mark_failed(&self, name: &str, err: &SessionError) {
        tracing::warn!(session = %name, error = %err, "connection failed");
        let mut sessions = self.sessions.lock();
        if let Some(entry) = sessions.get_mut(name) {
            if entry.state == ConnectionState::Connecting {
                entry.state = ConnectionState::Failed(ConnectFailure {
                    kind: err.failure_kind(),
                    message: err.to_string(),
                });
            }
        }
    }

    /// Writes `command` plus a newline and records it in the session's history.
    pub(crate) fn send(&self, name: &str, command: &str) -> Result<(), SessionError> {
        let channel = {
            let sessions = self.sessions.lock();
            sessions
                .get(name)
                .filter(|entry| entry.state == ConnectionState::Connected)
                .and_then(|entry| entry.link.as_ref())
                .map(|link| link.channel.clone())
        }
        .ok_or_else(|| SessionError::NotConnected(name.to_string()))?;

        {
            let mut channel = channel.lock();
            if channel.is_closed() {
                return Err(SessionError::NotConnected(name.to_string()));
            }
            let mut payload = String::with_capacity(command.len() + 1);
            payload.push_str(command);
            payload.push('\n');
            channel
                .write(payload.as_bytes())
                .map_err(|err| SessionError::ProtocolFailure(format!("send to {name}: {err}")))?;
        }
        tracing::debug!(session = %name, command, "sent command");
        self.history.lock().append(name, command);
        Ok(())
    }

    /// Closes the live channel and transport. Profile and history are kept.
    pub(crate) fn disconnect(&self, name: &str) -> Result<(), SessionError> {
        let link = {
            let mut sessions = self.sessions.lock();
            sessions.get_mut(name).and_then(|entry| {
                let link = entry.link.take();
                if link.is_some() {
                    entry.state = ConnectionState::Disconnected;
                }
                link
            })
        };
        let link = link.ok_or_else(|| SessionError::NotConnected(name.to_string()))?;
        self.teardown(name, link);
        Ok(())
    }

    /// Drops everything the manager knows about `name`, closing any live link.
    pub(crate) fn abandon(&self, name: &str) {
        let entry = self.sessions.lock().remove(name);
        if let Some(link) = entry.and_then(|entry| entry.link) {
            self.teardown(name, link);
        }
        tracing::debug!(session = %name, "session state discarded");
    }

    fn teardown(&self, name: &str, mut link: LiveLink) {
        link.channel.lock().close();
        link.transport.close();
        if let Some(reader) = link.reader.take() {
            if reader.join().is_err() {
                tracing::error!(session = %name, "reader thread panicked");
            }
        }
        tracing::info!(session = %name, generation = link.generation, "disconnected");
    }

    pub(crate) fn shutdown(&self) {
        let names: Vec<String> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, entry)| entry.link.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            let _ = self.disconnect(&name);
        }
    }

    pub(crate) fn state(&self, name: &str) -> ConnectionState {
        self.sessions
            .lock()
            .get(name)
            .map(|entry| entry.state.clone())
            .unwrap_or_default()
    }

    pub(crate) fn connected_sessions(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, entry)| entry.state == ConnectionState::Connected)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub(crate) fn history(&self) -> MutexGuard<'_, CommandHistory> {
        self.history.lock()
    }

    /// Drains reader events into `sink`. Call from the dispatch loop only.
    pub(crate) fn pump(&self, sink: &mut dyn DeliverySink) -> usize {
        let events: Vec<ReaderEvent> = self.events_rx.lock().try_iter().collect();
        let count = events.len();
        for event in events {
            match event {
                ReaderEvent::Output { session, text } => sink.deliver(&session, &text),
                ReaderEvent::Closed {
                    session,
                    generation,
                } => {
                    if self.reader_finished(&session, generation) {
                        sink.session_closed(&session);
                    }
                }
            }
        }
        count
    }

    fn reader_finished(&self, name: &str, generation: u64) -> bool {
        let link = {
            let mut sessions = self.sessions.lock();
            let Some(entry) = sessions.get_mut(name) else {
                return false;
            };
            if entry.link.as_ref().map(|link| link.generation) != Some(generation) {
                return false;
            }
            entry.state = ConnectionState::Disconnected;
            entry.link.take()
        };
        match link {
            Some(link) => {
                self.teardown(name, link);
                true
            }
            None => false,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
