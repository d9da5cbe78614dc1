use std::io::Write;

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::commands::{Command, parse_command};
use crate::app::constants::{COMMAND_PREFIX, HELP_LINES, NO_ACTIVE_SESSION_MESSAGE, STATUS_CANCELLED};
use crate::app::{App, Mode};

impl<W: Write> App<W> {
    /// Returns `true` when the user asked to quit.
    pub(crate) fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        match self.mode.clone() {
            Mode::Normal => self.handle_normal_key(key),
            Mode::ConfirmRetry(session) => {
                self.handle_confirm_retry_key(key, &session);
                Ok(false)
            }
        }
    }

    fn handle_confirm_retry_key(&mut self, key: KeyEvent, session: &str) {
        match key.code {
            KeyCode::Char('r') | KeyCode::Enter => self.retry_connect(session),
            KeyCode::Char('a') => self.abandon_connect(session),
            KeyCode::Esc => {
                self.mode = Mode::Normal;
                self.set_status(STATUS_CANCELLED);
            }
            _ => {}
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Enter => return self.submit_line(),
            KeyCode::Up => self.recall_previous(),
            KeyCode::Down => self.recall_next(),
            KeyCode::F(6) => self.cycle_session(false),
            KeyCode::F(7) => self.cycle_session(true),
            KeyCode::Backspace => self.console.pop_char(),
            KeyCode::Esc => self.console.set_input(String::new()),
            KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.console.push_char(ch)
            }
            _ => {}
        }
        Ok(false)
    }

    fn recall_previous(&mut self) {
        let Some(active) = self.console.active().map(str::to_string) else {
            return;
        };
        let recalled = self
            .manager
            .history()
            .navigate_up(&active, self.console.input());
        if let Some(command) = recalled {
            self.console.set_input(command);
        }
    }

    fn recall_next(&mut self) {
        let Some(active) = self.console.active().map(str::to_string) else {
            return;
        };
        let command = self.manager.history().navigate_down(&active);
        self.console.set_input(command);
    }

    fn submit_line(&mut self) -> Result<bool> {
        let line = self.console.take_input();
        if let Some(command) = line.trim_start().strip_prefix(COMMAND_PREFIX) {
            return match parse_command(command) {
                Ok(command) => self.run_command(command),
                Err(err) => {
                    self.set_status(err.to_string());
                    Ok(false)
                }
            };
        }
        let Some(active) = self.console.active().map(str::to_string) else {
            self.set_status(NO_ACTIVE_SESSION_MESSAGE);
            return Ok(false);
        };
        if let Err(err) = self.manager.send(&active, line.trim()) {
            self.set_status(err.to_string());
        }
        Ok(false)
    }

    pub(crate) fn run_command(&mut self, command: Command) -> Result<bool> {
        let outcome = match command {
            Command::Quit => return Ok(true),
            Command::Help => {
                self.show_help();
                Ok(())
            }
            Command::List(filter) => {
                self.list_profiles(filter.as_deref());
                Ok(())
            }
            Command::Add(args) => self.add_profile(
                &args.name,
                &args.username,
                &args.host,
                args.port,
                args.key_file,
            ),
            Command::Edit(args) => self.edit_profile(args),
            Command::Rename { from, to } => self.rename_profile(&from, &to),
            Command::Duplicate(name) => self.duplicate_profile(&name),
            Command::Delete(name) => self.delete_profile(&name),
            Command::Connect(name) => {
                self.start_connect(&name);
                Ok(())
            }
            Command::Disconnect(name) => {
                self.disconnect_session(name);
                Ok(())
            }
            Command::Use(name) => {
                self.use_session(&name);
                Ok(())
            }
            Command::Import { path, mode } => self.import_sessions(&path, mode),
            Command::ImportOne(path) => self.import_profile(&path),
            Command::Export(path) => self.export_sessions(&path),
            Command::ExportOne { name, path } => self.export_profile(&name, &path),
            Command::Clear => {
                self.console.clear_active();
                Ok(())
            }
            Command::ClearHistory { all } => {
                self.clear_history(all);
                Ok(())
            }
        };
        if let Err(err) = outcome {
            tracing::warn!(error = ?err, "command failed");
            self.set_status(format!("{err:#}"));
        }
        Ok(false)
    }

    fn clear_history(&mut self, all: bool) {
        if all {
            self.manager.history().clear_all();
            self.set_status("Cleared command history for all sessions");
            return;
        }
        let Some(active) = self.console.active().map(str::to_string) else {
            self.set_status(NO_ACTIVE_SESSION_MESSAGE);
            return;
        };
        self.manager.history().clear(&active);
        self.set_status(format!("Cleared command history for {active}"));
    }

    fn show_help(&mut self) {
        let mut lines: Vec<String> = HELP_LINES.iter().map(|line| line.to_string()).collect();
        lines.push(format!("Sessions file: {}", self.paths.sessions.display()));
        lines.push(format!("Log file: {}", self.paths.log.display()));
        self.console.print_lines(&lines);
    }
}
