pub(crate) const STATUS_READY: &str = "Ready. Type :help for commands";
pub(crate) const STATUS_CANCELLED: &str = "Cancelled";

pub(crate) const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub(crate) const LOG_TIMESTAMP_LEN: usize = 19;
pub(crate) const LOG_DEFAULT_FILTER: &str = "info";
pub(crate) const LOG_RETENTION_DAYS: i64 = 7;
pub(crate) const LOG_MAX_ENTRIES: usize = 10_000;

pub(crate) const TRANSCRIPT_MAX_BYTES: usize = 512 * 1024;

pub(crate) const COMMAND_PREFIX: char = ':';
pub(crate) const IDLE_PROMPT: &str = "mssh> ";

pub(crate) const NO_ACTIVE_SESSION_MESSAGE: &str =
    "No active session. Use :connect <name> or :use <name>";
pub(crate) const NO_SESSIONS_MESSAGE: &str = "No saved sessions. Add one with :add";

pub(crate) const HELP_LINES: &[&str] = &[
    ":list [filter]                         saved sessions and their state",
    ":add <name> <user>@<host>[:port] [key] save a session (prompts for a password without key)",
    ":edit <name> <user>@<host>[:port] [key] change a saved session (prompts again without key)",
    ":rename <old> <new>                    rename a saved session",
    ":dup <name>                            duplicate a saved session",
    ":delete <name>                         disconnect and remove a session",
    ":connect <name>                        open a shell",
    ":disconnect [name]                     close a shell (default: active)",
    ":use <name>                            show a connected session",
    ":import <file> [merge|replace]         import a session file",
    ":import-one <file>                     import a single exported session",
    ":export <file>                         export all sessions",
    ":export-one <name> <file>              export one session",
    ":clear                                 clear the active transcript",
    ":clear-history [all]                   forget command history",
    ":quit                                  disconnect everything and exit",
    "Up/Down: history  F6/F7: switch session  Ctrl+C: quit",
];
