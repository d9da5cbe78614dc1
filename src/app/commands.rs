use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::model::{DEFAULT_PORT, ImportMode};

/// Connection fields given to `:add` and `:edit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProfileArgs {
    pub(crate) name: String,
    pub(crate) username: String,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) key_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    List(Option<String>),
    Add(ProfileArgs),
    Edit(ProfileArgs),
    Rename {
        from: String,
        to: String,
    },
    Duplicate(String),
    Delete(String),
    Connect(String),
    Disconnect(Option<String>),
    Use(String),
    Import {
        path: PathBuf,
        mode: ImportMode,
    },
    ImportOne(PathBuf),
    Export(PathBuf),
    ExportOne {
        name: String,
        path: PathBuf,
    },
    Clear,
    ClearHistory {
        all: bool,
    },
    Help,
    Quit,
}

/// Parses the text after the leading `:`. Arguments may be double-quoted.
pub(crate) fn parse_command(line: &str) -> Result<Command> {
    let args = split_args(line)?;
    let Some((verb, rest)) = args.split_first() else {
        bail!("Empty command, try :help");
    };
    let command = match (verb.as_str(), rest) {
        ("list" | "ls", []) => Command::List(None),
        ("list" | "ls", [filter]) => Command::List(Some(filter.clone())),
        ("add", [name, target]) => Command::Add(parse_profile(name, target, None)?),
        ("add", [name, target, key]) => {
            Command::Add(parse_profile(name, target, Some(key.clone()))?)
        }
        ("edit", [name, target]) => Command::Edit(parse_profile(name, target, None)?),
        ("edit", [name, target, key]) => {
            Command::Edit(parse_profile(name, target, Some(key.clone()))?)
        }
        ("rename", [from, to]) => Command::Rename {
            from: from.clone(),
            to: to.clone(),
        },
        ("dup", [name]) => Command::Duplicate(name.clone()),
        ("delete" | "rm", [name]) => Command::Delete(name.clone()),
        ("connect" | "c", [name]) => Command::Connect(name.clone()),
        ("disconnect" | "dc", []) => Command::Disconnect(None),
        ("disconnect" | "dc", [name]) => Command::Disconnect(Some(name.clone())),
        ("use", [name]) => Command::Use(name.clone()),
        ("import", [path]) => Command::Import {
            path: PathBuf::from(path),
            mode: ImportMode::Merge,
        },
        ("import", [path, mode]) => Command::Import {
            path: PathBuf::from(path),
            mode: parse_import_mode(mode)?,
        },
        ("import-one", [path]) => Command::ImportOne(PathBuf::from(path)),
        ("export", [path]) => Command::Export(PathBuf::from(path)),
        ("export-one", [name, path]) => Command::ExportOne {
            name: name.clone(),
            path: PathBuf::from(path),
        },
        ("clear", []) => Command::Clear,
        ("clear-history", []) => Command::ClearHistory { all: false },
        ("clear-history", [scope]) if scope == "all" => Command::ClearHistory { all: true },
        ("help" | "h" | "?", []) => Command::Help,
        ("quit" | "q" | "exit", []) => Command::Quit,
        (
            "list" | "ls" | "add" | "edit" | "rename" | "dup" | "delete" | "rm" | "connect" | "c"
            | "disconnect" | "dc" | "use" | "import" | "import-one" | "export" | "export-one"
            | "clear" | "clear-history" | "help" | "h" | "?" | "quit" | "q" | "exit",
            _,
        ) => bail!("Wrong arguments for :{verb}, see :help"),
        _ => bail!("Unknown command :{verb}"),
    };
    Ok(command)
}

fn parse_profile(name: &str, target: &str, key_file: Option<String>) -> Result<ProfileArgs> {
    let Some((username, address)) = target.split_once('@') else {
        bail!("Target must look like user@host[:port]");
    };
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) if port > 0 => (host, port),
            _ => bail!("Invalid port {port:?}"),
        },
        None => (address, DEFAULT_PORT),
    };
    if name.trim().is_empty() {
        bail!("Name is required");
    }
    if username.trim().is_empty() {
        bail!("User is required");
    }
    if host.trim().is_empty() {
        bail!("Host is required");
    }
    Ok(ProfileArgs {
        name: name.trim().to_string(),
        username: username.trim().to_string(),
        host: host.trim().to_string(),
        port,
        key_file: key_file.filter(|path| !path.trim().is_empty()),
    })
}

fn parse_import_mode(mode: &str) -> Result<ImportMode> {
    match mode {
        "merge" => Ok(ImportMode::Merge),
        "replace" => Ok(ImportMode::Replace),
        other => bail!("Import mode must be merge or replace, not {other:?}"),
    }
}

fn split_args(line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    for ch in line.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            ch if ch.is_whitespace() && !quoted => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            ch => {
                current.push(ch);
                in_token = true;
            }
        }
    }
    if quoted {
        bail!("Unterminated quote");
    }
    if in_token {
        args.push(current);
    }
    Ok(args)
}
