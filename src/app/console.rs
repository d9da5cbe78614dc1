use std::collections::HashMap;
use std::io::{self, Write};

use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::{ExecutableCommand, QueueableCommand};

use crate::app::constants::{IDLE_PROMPT, TRANSCRIPT_MAX_BYTES};
use crate::manager::DeliverySink;

/// Output received for one session. The text after the last newline is the
/// remote prompt and is drawn in front of the local input.
#[derive(Debug, Default)]
pub(crate) struct Transcript {
    text: String,
}

impl Transcript {
    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    fn partial_line(&self) -> &str {
        match self.text.rfind('\n') {
            Some(index) => &self.text[index + 1..],
            None => &self.text,
        }
    }

    fn push(&mut self, text: &str) {
        self.text.push_str(text);
        if self.text.len() <= TRANSCRIPT_MAX_BYTES {
            return;
        }
        let mut cut = self.text.len() - TRANSCRIPT_MAX_BYTES;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        if let Some(newline) = self.text[cut..].find('\n') {
            cut += newline + 1;
        }
        self.text.drain(..cut);
    }
}

/// Line-oriented renderer over a raw-mode terminal.
pub(crate) struct Console<W: Write> {
    out: W,
    transcripts: HashMap<String, Transcript>,
    active: Option<String>,
    input: String,
}

impl<W: Write> Console<W> {
    pub(crate) fn new(out: W) -> Self {
        Self {
            out,
            transcripts: HashMap::new(),
            active: None,
            input: String::new(),
        }
    }

    pub(crate) fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub(crate) fn transcript(&self, session: &str) -> Option<&Transcript> {
        self.transcripts.get(session)
    }

    pub(crate) fn input(&self) -> &str {
        &self.input
    }

    pub(crate) fn set_input(&mut self, input: String) {
        self.input = input;
        report(self.redraw_prompt());
    }

    pub(crate) fn push_char(&mut self, ch: char) {
        self.input.push(ch);
        report(self.redraw_prompt());
    }

    pub(crate) fn pop_char(&mut self) {
        self.input.pop();
        report(self.redraw_prompt());
    }

    pub(crate) fn take_input(&mut self) -> String {
        let input = std::mem::take(&mut self.input);
        report(self.redraw_prompt());
        input
    }

    /// Makes `session` the live view and replays what it has received so far.
    pub(crate) fn activate(&mut self, session: &str) {
        self.active = Some(session.to_string());
        report(self.replay());
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = None;
        report(self.redraw_prompt());
    }

    pub(crate) fn clear_active(&mut self) {
        if let Some(active) = self.active.clone() {
            self.transcripts.remove(&active);
        }
        report(self.replay());
    }

    pub(crate) fn forget(&mut self, session: &str) {
        self.transcripts.remove(session);
        if self.active.as_deref() == Some(session) {
            self.deactivate();
        }
    }

    pub(crate) fn status(&mut self, message: &str) {
        report(self.print_above_prompt(&format!("-- {message}\n")));
    }

    pub(crate) fn print_lines(&mut self, lines: &[String]) {
        let mut block = String::new();
        for line in lines {
            block.push_str(line);
            block.push('\n');
        }
        report(self.print_above_prompt(&block));
    }

    fn prompt(&self) -> String {
        let prefix = match &self.active {
            Some(active) => self
                .transcripts
                .get(active)
                .map(Transcript::partial_line)
                .unwrap_or_default(),
            None => IDLE_PROMPT,
        };
        format!("{prefix}{}", self.input)
    }

    fn redraw_prompt(&mut self) -> io::Result<()> {
        let prompt = self.prompt();
        self.out
            .queue(MoveToColumn(0))?
            .queue(Clear(ClearType::CurrentLine))?
            .queue(Print(prompt))?;
        self.out.flush()
    }

    fn print_above_prompt(&mut self, block: &str) -> io::Result<()> {
        self.out
            .queue(MoveToColumn(0))?
            .queue(Clear(ClearType::CurrentLine))?
            .queue(Print(to_raw_newlines(block)))?;
        self.redraw_prompt()
    }

    fn replay(&mut self) -> io::Result<()> {
        self.out.execute(Clear(ClearType::All))?;
        let Some(active) = &self.active else {
            return self.redraw_prompt();
        };
        let completed = self
            .transcripts
            .get(active)
            .map(|transcript| {
                let text = transcript.text();
                &text[..text.len() - transcript.partial_line().len()]
            })
            .unwrap_or_default();
        let banner = format!("== {active} ==\n{completed}");
        self.out
            .queue(crossterm::cursor::MoveTo(0, 0))?
            .queue(Print(to_raw_newlines(&banner)))?;
        self.redraw_prompt()
    }
}

impl<W: Write> DeliverySink for Console<W> {
    fn deliver(&mut self, session: &str, text: &str) {
        let transcript = self.transcripts.entry(session.to_string()).or_default();
        let before = transcript.partial_line().to_string();
        transcript.push(text);
        if self.active.as_deref() != Some(session) {
            return;
        }
        let combined = format!("{before}{text}");
        let completed = match combined.rfind('\n') {
            Some(index) => &combined[..=index],
            None => "",
        };
        if completed.is_empty() {
            report(self.redraw_prompt());
        } else {
            report(self.print_above_prompt(completed));
        }
    }

    fn session_closed(&mut self, session: &str) {
        self.status(&format!("Session {session} closed"));
    }
}

fn to_raw_newlines(text: &str) -> String {
    text.replace('\n', "\r\n")
}

fn report(result: io::Result<()>) {
    if let Err(err) = result {
        tracing::warn!(error = %err, "console write failed");
    }
}
