use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_PORT: u16 = 22;

/// Saved profiles keyed by their unique name.
pub(crate) type Catalog = BTreeMap<String, SessionProfile>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionProfile {
    pub(crate) name: String,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) username: String,
    pub(crate) secret: Option<String>,
    pub(crate) key_file_path: Option<String>,
}

impl SessionProfile {
    pub(crate) fn new(name: &str, host: &str, username: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port: DEFAULT_PORT,
            username: username.to_string(),
            secret: None,
            key_file_path: None,
        }
    }

    pub(crate) fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    /// The key file wins over the password when both are stored.
    pub(crate) fn auth_material(&self) -> AuthMaterial {
        match self.key_file_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => AuthMaterial::KeyFile(path.to_string()),
            _ => AuthMaterial::Password(self.secret.clone().unwrap_or_default()),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub(crate) enum AuthMaterial {
    Password(String),
    KeyFile(String),
}

impl fmt::Debug for AuthMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMaterial::Password(_) => f.write_str("Password(..)"),
            AuthMaterial::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

/// On-disk form of a profile. `password` only ever holds ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct PersistedProfileRecord {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub(crate) host: String,
    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub(crate) port: u16,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub(crate) username: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub(crate) password: String,
    #[serde(default, alias = "key_file", deserialize_with = "null_as_empty")]
    pub(crate) ssh_key_path: String,
}

pub(crate) type PersistedCatalog = BTreeMap<String, PersistedProfileRecord>;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortCompat {
        Number(u16),
        Text(String),
    }

    match Option::<PortCompat>::deserialize(deserializer)? {
        None => Ok(DEFAULT_PORT),
        Some(PortCompat::Number(port)) => Ok(port),
        Some(PortCompat::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(DEFAULT_PORT);
            }
            text.parse::<u16>()
                .map_err(|err| serde::de::Error::custom(format!("invalid port {text:?}: {err}")))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    Authentication,
    Network,
    Protocol,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConnectFailure {
    pub(crate) kind: FailureKind,
    pub(crate) message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(ConnectFailure),
}

impl ConnectionState {
    pub(crate) fn describe(&self) -> String {
        match self {
            ConnectionState::Disconnected => "disconnected".to_string(),
            ConnectionState::Connecting => "connecting".to_string(),
            ConnectionState::Connected => "connected".to_string(),
            ConnectionState::Failed(failure) => format!("failed: {}", failure.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImportMode {
    Replace,
    Merge,
}

pub(crate) fn filter_names<'a>(catalog: &'a Catalog, query: &str) -> Vec<&'a str> {
    let query = query.to_lowercase();
    catalog
        .keys()
        .filter(|name| name.to_lowercase().contains(&query))
        .map(String::as_str)
        .collect()
}

pub(crate) fn duplicate_name(catalog: &Catalog, name: &str) -> String {
    let mut candidate = format!("{name} (copy)");
    let mut counter = 1;
    while catalog.contains_key(&candidate) {
        candidate = format!("{name} (copy {counter})");
        counter += 1;
    }
    candidate
}

pub(crate) fn unique_import_name(catalog: &Catalog, stem: &str) -> String {
    if !catalog.contains_key(stem) {
        return stem.to_string();
    }
    let mut counter = 1;
    loop {
        let candidate = format!("{stem}_{counter}");
        if !catalog.contains_key(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_of(names: &[&str]) -> Catalog {
        names
            .iter()
            .map(|name| (name.to_string(), SessionProfile::new(name, "h", "u")))
            .collect()
    }

    #[test]
    fn key_file_takes_precedence_over_secret() {
        let mut profile = SessionProfile::new("db1", "10.0.0.5", "alice");
        profile.secret = Some("pw".to_string());
        assert_eq!(profile.auth_material(), AuthMaterial::Password("pw".into()));
        profile.key_file_path = Some("~/.ssh/id_ed25519".to_string());
        assert_eq!(
            profile.auth_material(),
            AuthMaterial::KeyFile("~/.ssh/id_ed25519".into())
        );
        profile.key_file_path = Some("   ".to_string());
        assert_eq!(profile.auth_material(), AuthMaterial::Password("pw".into()));
    }

    #[test]
    fn auth_material_debug_hides_password() {
        let rendered = format!("{:?}", AuthMaterial::Password("hunter2".into()));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn record_accepts_string_port_and_legacy_key_field() {
        let json = r#"{ "host": "h", "port": "2222", "username": "u", "key_file": "/k" }"#;
        let record: PersistedProfileRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.port, 2222);
        assert_eq!(record.ssh_key_path, "/k");
        assert_eq!(record.password, "");
    }

    #[test]
    fn record_defaults_missing_port() {
        let record: PersistedProfileRecord =
            serde_json::from_str(r#"{ "host": "h", "username": "u" }"#).unwrap();
        assert_eq!(record.port, DEFAULT_PORT);
        let record: PersistedProfileRecord =
            serde_json::from_str(r#"{ "host": "h", "port": "", "username": "u" }"#).unwrap();
        assert_eq!(record.port, DEFAULT_PORT);
    }

    #[test]
    fn record_rejects_garbage_port() {
        let result: Result<PersistedProfileRecord, _> =
            serde_json::from_str(r#"{ "host": "h", "port": "ssh", "username": "u" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn filter_is_case_insensitive() {
        let catalog = catalog_of(&["Prod-DB", "staging", "prod-web"]);
        assert_eq!(filter_names(&catalog, "PROD"), vec!["Prod-DB", "prod-web"]);
        assert_eq!(filter_names(&catalog, "").len(), 3);
    }

    #[test]
    fn duplicate_name_skips_taken_copies() {
        let catalog = catalog_of(&["web", "web (copy)", "web (copy 1)"]);
        assert_eq!(duplicate_name(&catalog, "web"), "web (copy 2)");
        assert_eq!(duplicate_name(&catalog, "db"), "db (copy)");
    }

    #[test]
    fn import_name_gets_numeric_suffix() {
        let catalog = catalog_of(&["web", "web_1"]);
        assert_eq!(unique_import_name(&catalog, "web"), "web_2");
        assert_eq!(unique_import_name(&catalog, "db"), "db");
    }

    #[test]
    fn failed_state_describes_reason() {
        let state = ConnectionState::Failed(ConnectFailure {
            kind: FailureKind::Network,
            message: "timed out".to_string(),
        });
        assert_eq!(state.describe(), "failed: timed out");
    }
}
