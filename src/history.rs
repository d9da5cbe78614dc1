use std::collections::HashMap;

/// Commands issued in one session plus the recall cursor.
/// `cursor == entries.len()` is the fresh-entry position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct HistoryLog {
    entries: Vec<String>,
    cursor: usize,
}

impl HistoryLog {
    pub(crate) fn entries(&self) -> &[String] {
        &self.entries
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    fn append(&mut self, command: &str) {
        if command.is_empty() {
            return;
        }
        if self.entries.last().map(String::as_str) != Some(command) {
            self.entries.push(command.to_string());
        }
        self.cursor = self.entries.len();
    }

    fn navigate_up(&mut self, current_input: &str) -> Option<String> {
        let current_input = current_input.trim();
        if self.cursor == self.entries.len() && !current_input.is_empty() {
            self.entries.push(current_input.to_string());
            self.cursor = self.entries.len();
        }
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).cloned()
    }

    fn navigate_down(&mut self) -> String {
        self.cursor = (self.cursor + 1).min(self.entries.len());
        self.entries.get(self.cursor).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub(crate) struct CommandHistory {
    logs: HashMap<String, HistoryLog>,
}

impl CommandHistory {
    pub(crate) fn append(&mut self, session: &str, command: &str) {
        if command.is_empty() {
            return;
        }
        self.logs
            .entry(session.to_string())
            .or_default()
            .append(command);
    }

    /// Moves one entry back. Unsent input is kept as an entry when browsing starts.
    /// Returns `None` when already at the oldest entry.
    pub(crate) fn navigate_up(&mut self, session: &str, current_input: &str) -> Option<String> {
        self.logs
            .entry(session.to_string())
            .or_default()
            .navigate_up(current_input)
    }

    /// Moves one entry forward, yielding `""` once past the newest entry.
    pub(crate) fn navigate_down(&mut self, session: &str) -> String {
        match self.logs.get_mut(session) {
            Some(log) => log.navigate_down(),
            None => String::new(),
        }
    }

    pub(crate) fn log(&self, session: &str) -> Option<&HistoryLog> {
        self.logs.get(session)
    }

    pub(crate) fn clear(&mut self, session: &str) {
        self.logs.remove(session);
    }

    pub(crate) fn clear_all(&mut self) {
        self.logs.clear();
    }
}
