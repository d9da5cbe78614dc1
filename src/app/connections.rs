use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use anyhow::{Context, Result, bail};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use crate::app::commands::ProfileArgs;
use crate::app::constants::{NO_ACTIVE_SESSION_MESSAGE, NO_SESSIONS_MESSAGE};
use crate::app::{App, Mode};
use crate::error::SessionError;
use crate::model::{
    ConnectionState, ImportMode, SessionProfile, duplicate_name, filter_names,
};

pub(crate) struct PendingConnect {
    session: String,
    result: Receiver<Result<(), SessionError>>,
}

impl<W: Write> App<W> {
    /// Starts a handshake on a worker thread; the outcome arrives via `poll_connects`.
    pub(crate) fn start_connect(&mut self, name: &str) {
        let Some(profile) = self.catalog.get(name) else {
            self.set_status(SessionError::ProfileNotFound(name.to_string()).to_string());
            return;
        };
        let label = profile.label();
        if self.pending_connects.iter().any(|pending| pending.session == name) {
            self.set_status(format!("Already connecting to {label}"));
            return;
        }
        if self.manager.state(name) == ConnectionState::Connected {
            self.set_status(format!("{name} is already connected"));
            return;
        }

        let (tx, rx) = mpsc::channel();
        let manager = Arc::clone(&self.manager);
        let catalog = self.catalog.clone();
        let session = name.to_string();
        let spawned = thread::Builder::new()
            .name(format!("connect-{name}"))
            .spawn(move || {
                let _ = tx.send(manager.connect(&session, &catalog));
            });
        match spawned {
            Ok(_) => {
                self.pending_connects.push(PendingConnect {
                    session: name.to_string(),
                    result: rx,
                });
                self.set_status(format!("Connecting to {label}..."));
            }
            Err(err) => self.set_status(format!("Could not start connection: {err}")),
        }
    }

    pub(crate) fn poll_connects(&mut self) {
        let mut finished = Vec::new();
        self.pending_connects
            .retain(|pending| match pending.result.try_recv() {
                Ok(result) => {
                    finished.push((pending.session.clone(), Some(result)));
                    false
                }
                Err(TryRecvError::Empty) => true,
                Err(TryRecvError::Disconnected) => {
                    finished.push((pending.session.clone(), None));
                    false
                }
            });
        for (session, result) in finished {
            match result {
                Some(Ok(())) => {
                    self.set_status(format!("Connected to {session}"));
                    self.console.activate(&session);
                }
                Some(Err(err)) => self.connect_failed(&session, &err),
                None => self.set_status(format!("Connection worker for {session} stopped")),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn has_pending_connects(&self) -> bool {
        !self.pending_connects.is_empty()
    }

    fn connect_failed(&mut self, session: &str, err: &SessionError) {
        self.set_status(format!("Connection to {session} failed: {err}"));
        if self.mode == Mode::Normal
            && matches!(self.manager.state(session), ConnectionState::Failed(_))
        {
            self.mode = Mode::ConfirmRetry(session.to_string());
            self.set_status(format!(
                "Retry {session}? [r]etry, [a]bandon, Esc to leave it failed"
            ));
        }
    }

    pub(crate) fn retry_connect(&mut self, session: &str) {
        self.mode = Mode::Normal;
        self.start_connect(session);
    }

    pub(crate) fn abandon_connect(&mut self, session: &str) {
        self.mode = Mode::Normal;
        self.manager.abandon(session);
        self.console.forget(session);
        self.set_status(format!("Abandoned {session}"));
    }

    pub(crate) fn disconnect_session(&mut self, name: Option<String>) {
        let Some(name) = name.or_else(|| self.console.active().map(str::to_string)) else {
            self.set_status(NO_ACTIVE_SESSION_MESSAGE);
            return;
        };
        match self.manager.disconnect(&name) {
            Ok(()) => self.set_status(format!("Disconnected {name}")),
            Err(err) => self.set_status(err.to_string()),
        }
    }

    pub(crate) fn use_session(&mut self, name: &str) {
        if self.manager.state(name) != ConnectionState::Connected
            && self.console.transcript(name).is_none()
        {
            self.set_status(SessionError::NotConnected(name.to_string()).to_string());
            return;
        }
        self.console.activate(name);
    }

    pub(crate) fn cycle_session(&mut self, forward: bool) {
        let connected = self.manager.connected_sessions();
        if connected.is_empty() {
            self.set_status(NO_ACTIVE_SESSION_MESSAGE);
            return;
        }
        let current = self
            .console
            .active()
            .and_then(|active| connected.iter().position(|name| name == active));
        let next = match (current, forward) {
            (None, true) => 0,
            (None, false) => connected.len() - 1,
            (Some(index), true) => (index + 1) % connected.len(),
            (Some(index), false) => (index + connected.len() - 1) % connected.len(),
        };
        self.console.activate(&connected[next]);
    }

    pub(crate) fn list_profiles(&mut self, filter: Option<&str>) {
        if self.catalog.is_empty() {
            self.set_status(NO_SESSIONS_MESSAGE);
            return;
        }
        let names = filter_names(&self.catalog, filter.unwrap_or_default());
        let lines: Vec<String> = names
            .iter()
            .filter_map(|name| self.catalog.get(*name))
            .map(|profile| {
                let marker = if self.console.active() == Some(profile.name.as_str()) {
                    '*'
                } else {
                    ' '
                };
                format!(
                    "{marker} {:<20} {:<32} {}",
                    profile.name,
                    profile.label(),
                    self.manager.state(&profile.name).describe()
                )
            })
            .collect();
        if lines.is_empty() {
            self.set_status("No sessions match");
        } else {
            self.console.print_lines(&lines);
        }
    }

    pub(crate) fn add_profile(
        &mut self,
        name: &str,
        username: &str,
        host: &str,
        port: u16,
        key_file: Option<String>,
    ) -> Result<()> {
        if self.catalog.contains_key(name) {
            bail!("Session {name} already exists");
        }
        let secret = match key_file {
            Some(_) => None,
            None => self.prompt_secret(name)?,
        };
        let mut profile = SessionProfile::new(name, host, username);
        profile.port = port;
        profile.key_file_path = key_file;
        profile.secret = secret;
        self.catalog.insert(name.to_string(), profile);
        self.save()?;
        self.set_status(format!("Saved {name}"));
        Ok(())
    }

    /// Rewrites the connection fields of a saved profile. Without a key file the
    /// password is asked for again; an empty entry keeps the stored one.
    pub(crate) fn edit_profile(&mut self, args: ProfileArgs) -> Result<()> {
        if !self.catalog.contains_key(&args.name) {
            return Err(SessionError::ProfileNotFound(args.name).into());
        }
        let secret = match args.key_file {
            Some(_) => None,
            None => self.prompt_secret(&args.name)?,
        };
        self.apply_profile_edit(args, secret)
    }

    fn apply_profile_edit(&mut self, args: ProfileArgs, secret: Option<String>) -> Result<()> {
        let profile = self
            .catalog
            .get_mut(&args.name)
            .ok_or_else(|| SessionError::ProfileNotFound(args.name.clone()))?;
        profile.username = args.username;
        profile.host = args.host;
        profile.port = args.port;
        profile.key_file_path = args.key_file;
        if secret.is_some() {
            profile.secret = secret;
        }
        self.save()?;
        let note = if self.manager.state(&args.name) == ConnectionState::Connected {
            ", reconnect to apply"
        } else {
            ""
        };
        self.set_status(format!("Updated {}{note}", args.name));
        Ok(())
    }

    /// Moves the profile only. History and connection state stay under the old name.
    pub(crate) fn rename_profile(&mut self, from: &str, to: &str) -> Result<()> {
        if self.catalog.contains_key(to) {
            bail!("Session {to} already exists");
        }
        let mut profile = self
            .catalog
            .remove(from)
            .ok_or_else(|| SessionError::ProfileNotFound(from.to_string()))?;
        profile.name = to.to_string();
        self.catalog.insert(to.to_string(), profile);
        self.save()?;
        self.set_status(format!("Renamed {from} to {to}"));
        Ok(())
    }

    pub(crate) fn duplicate_profile(&mut self, name: &str) -> Result<()> {
        let mut copy = self
            .catalog
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::ProfileNotFound(name.to_string()))?;
        copy.name = duplicate_name(&self.catalog, name);
        let copy_name = copy.name.clone();
        self.catalog.insert(copy_name.clone(), copy);
        self.save()?;
        self.set_status(format!("Duplicated {name} as {copy_name}"));
        Ok(())
    }

    pub(crate) fn delete_profile(&mut self, name: &str) -> Result<()> {
        if !self.catalog.contains_key(name) {
            return Err(SessionError::ProfileNotFound(name.to_string()).into());
        }
        self.manager.abandon(name);
        self.catalog.remove(name);
        self.manager.history().clear(name);
        self.console.forget(name);
        self.save()?;
        self.set_status(format!("Deleted {name}"));
        Ok(())
    }

    pub(crate) fn import_sessions(&mut self, path: &Path, mode: ImportMode) -> Result<()> {
        self.catalog = self
            .store
            .import(path, mode)
            .with_context(|| format!("import {}", path.display()))?;
        self.set_status(format!(
            "Imported {}, {} sessions saved",
            path.display(),
            self.catalog.len()
        ));
        Ok(())
    }

    pub(crate) fn import_profile(&mut self, path: &Path) -> Result<()> {
        let profile = self
            .store
            .import_profile(path, &self.catalog)
            .with_context(|| format!("import {}", path.display()))?;
        let name = profile.name.clone();
        self.catalog.insert(name.clone(), profile);
        self.save()?;
        self.set_status(format!("Imported {name}"));
        Ok(())
    }

    pub(crate) fn export_sessions(&mut self, path: &Path) -> Result<()> {
        self.store
            .export(path, &self.catalog)
            .with_context(|| format!("export {}", path.display()))?;
        self.set_status(format!(
            "Exported {} sessions to {}",
            self.catalog.len(),
            path.display()
        ));
        Ok(())
    }

    pub(crate) fn export_profile(&mut self, name: &str, path: &Path) -> Result<()> {
        let profile = self
            .catalog
            .get(name)
            .ok_or_else(|| SessionError::ProfileNotFound(name.to_string()))?;
        self.store
            .export_profile(path, profile)
            .with_context(|| format!("export {}", path.display()))?;
        self.set_status(format!("Exported {name} to {}", path.display()));
        Ok(())
    }

    pub(crate) fn save(&self) -> Result<()> {
        self.store.save(&self.catalog).context("save sessions")
    }

    fn prompt_secret(&mut self, name: &str) -> Result<Option<String>> {
        self.console.status(&format!("Enter the password for {name} (empty for none)"));
        disable_raw_mode().context("leave raw mode")?;
        let entered = rpassword::prompt_password("Password: ");
        enable_raw_mode().context("enter raw mode")?;
        let secret = entered.context("read password")?;
        Ok(Some(secret).filter(|secret| !secret.is_empty()))
    }
}
