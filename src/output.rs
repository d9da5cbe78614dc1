//! Turns raw shell output into plain text for display.
//!
//! Every call is independent: a backspace only erases characters from the same
//! chunk, so a `\b` that arrives in a later read than its target has no effect.

use std::sync::LazyLock;

use regex::Regex;

const ESC: char = '\x1b';
const BACKSPACE: char = '\x08';

const CONTROL_SEQUENCES: &[&str] = &[
    "\x1b[K",      // clear line
    "\x1b[2J",     // clear screen
    "\x1b[J",      // clear to end of screen
    "\x1b[P",      // delete character
    "\x1b[s",      // save cursor
    "\x1b[u",      // restore cursor
    "\x1b[?2004h", // bracketed paste on
    "\x1b[?2004l", // bracketed paste off
];

static CURSOR_MOVEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[(\d+)?[ABCDEFG]").expect("cursor movement pattern"));

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("ansi escape pattern")
});

pub(crate) fn process_output(raw: &str) -> String {
    let text = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut text = apply_backspaces(&text);
    for sequence in CONTROL_SEQUENCES {
        if text.contains(sequence) {
            text = text.replace(sequence, "");
        }
    }
    let text = CURSOR_MOVEMENT.replace_all(&text, "");
    let text = ANSI_ESCAPE.replace_all(&text, "");
    text.chars().filter(|ch| *ch != ESC).collect()
}

fn apply_backspaces(text: &str) -> String {
    if !text.contains(BACKSPACE) {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == BACKSPACE {
            out.pop();
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_patterns_compile() {
        assert!(LazyLock::force(&CURSOR_MOVEMENT).is_match("\x1b[3A"));
        assert!(LazyLock::force(&ANSI_ESCAPE).is_match("\x1b[1;32m"));
    }

    #[test]
    fn line_endings_become_newlines() {
        assert_eq!(process_output("a\r\nb\rc\n"), "a\nb\nc\n");
        assert!(!process_output("\r\r\n\r\n\r").contains('\r'));
    }

    #[test]
    fn backspace_erases_previous_char_in_chunk() {
        assert_eq!(process_output("ab\x08c"), "ac");
        assert_eq!(process_output("\x08x"), "x");
        assert_eq!(process_output("ab\x08\x08\x08c"), "c");
    }

    #[test]
    fn backspace_handles_multibyte_chars() {
        assert_eq!(process_output("né\x08e"), "ne");
    }

    #[test]
    fn named_control_sequences_are_removed() {
        let raw = "\x1b[?2004huser@host:~$ \x1b[K\x1b[2Jls\x1b[s\x1b[u\x1b[P\x1b[J\x1b[?2004l";
        assert_eq!(process_output(raw), "user@host:~$ ls");
    }

    #[test]
    fn cursor_movement_is_removed() {
        assert_eq!(process_output("a\x1b[3Db\x1b[Ac\x1b[12G"), "abc");
    }

    #[test]
    fn colour_and_other_escapes_are_removed() {
        assert_eq!(
            process_output("\x1b[01;34mdir\x1b[0m \x1b[1;32mexe\x1b[m"),
            "dir exe"
        );
        assert_eq!(process_output("\x1bMx\x1b[?1049h"), "x");
    }

    #[test]
    fn stray_escape_bytes_never_survive() {
        for raw in ["\x1b", "tail\x1b[", "\x1b[12", "a\x1bzb", "\x1b\x1b[K"] {
            assert!(!process_output(raw).contains('\x1b'), "input {raw:?}");
        }
    }

    #[test]
    fn plain_text_is_untouched() {
        let text = "total 8\ndrwxr-xr-x 2 alice alice 4096 .\n";
        assert_eq!(process_output(text), text);
    }
}
