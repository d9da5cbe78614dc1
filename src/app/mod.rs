use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::app::connections::PendingConnect;
use crate::app::console::Console;
use crate::app::constants::STATUS_READY;
use crate::cipher::{CredentialCipher, EncryptionKey};
use crate::manager::ConnectionManager;
use crate::model::Catalog;
use crate::ssh::Connector;
use crate::storage::{AppPaths, SessionStore};

mod commands;
mod connections;
mod console;
mod constants;
mod handlers;
pub(crate) mod logging;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mode {
    Normal,
    /// A connect failed; waiting for retry, abandon or dismiss.
    ConfirmRetry(String),
}

pub(crate) struct App<W: Write> {
    pub(crate) paths: AppPaths,
    pub(crate) store: SessionStore,
    pub(crate) catalog: Catalog,
    pub(crate) manager: Arc<ConnectionManager>,
    pub(crate) console: Console<W>,
    pub(crate) mode: Mode,
    pub(crate) status: String,
    pending_connects: Vec<PendingConnect>,
}

impl<W: Write> App<W> {
    pub(crate) fn load(paths: AppPaths, connector: Arc<dyn Connector>, out: W) -> Result<Self> {
        let key = EncryptionKey::load_or_create(&paths.key).context("load encryption key")?;
        let store = SessionStore::new(paths.sessions.clone(), CredentialCipher::new(&key));
        let catalog = store.load().context("load sessions")?;
        tracing::info!(count = catalog.len(), path = %store.path().display(), "loaded sessions");
        Ok(Self {
            paths,
            store,
            catalog,
            manager: Arc::new(ConnectionManager::new(connector)),
            console: Console::new(out),
            mode: Mode::Normal,
            status: String::new(),
            pending_connects: vec![],
        })
    }

    pub(crate) fn start(&mut self) {
        self.set_status(STATUS_READY);
    }

    pub(crate) fn pump_output(&mut self) -> usize {
        self.manager.pump(&mut self.console)
    }

    /// Disconnects every session and writes the catalog back.
    pub(crate) fn shutdown(&mut self) {
        self.manager.shutdown();
        if let Err(err) = self.save() {
            tracing::error!(error = %err, "failed to save sessions on exit");
        }
        tracing::info!("shut down");
    }
}
