use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::cipher::CredentialCipher;
use crate::error::SessionError;
use crate::model::{
    Catalog, ImportMode, PersistedCatalog, PersistedProfileRecord, SessionProfile,
    unique_import_name,
};

const CONFIG_DIR_ENV: &str = "MSSH_CONFIG_DIR";
const CONFIG_DIR_NAME: &str = "multi-ssh-client";

#[derive(Debug, Clone)]
pub(crate) struct AppPaths {
    pub(crate) sessions: PathBuf,
    pub(crate) key: PathBuf,
    pub(crate) log: PathBuf,
}

impl AppPaths {
    pub(crate) fn resolve() -> Result<Self> {
        Ok(Self::in_dir(config_dir()?))
    }

    pub(crate) fn in_dir(dir: PathBuf) -> Self {
        Self {
            sessions: dir.join("sessions.json"),
            key: dir.join("encryption.key"),
            log: dir.join("client.log"),
        }
    }
}

fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    if let Some(mut dir) = dirs::config_dir() {
        dir.push(CONFIG_DIR_NAME);
        return Ok(dir);
    }
    std::env::current_dir().context("current dir")
}

/// Durable catalog of profiles. Secrets are encrypted on every write.
#[derive(Clone)]
pub(crate) struct SessionStore {
    path: PathBuf,
    cipher: CredentialCipher,
}

impl SessionStore {
    pub(crate) fn new(path: PathBuf, cipher: CredentialCipher) -> Self {
        Self { path, cipher }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn load(&self) -> Result<Catalog, SessionError> {
        if !self.path.exists() {
            return Ok(Catalog::new());
        }
        let records = read_records(&self.path)?;
        Ok(self.decrypt_records(records))
    }

    pub(crate) fn save(&self, catalog: &Catalog) -> Result<(), SessionError> {
        let records = self.encrypt_catalog(catalog)?;
        write_json(&self.path, &records)?;
        tracing::debug!(count = catalog.len(), path = %self.path.display(), "saved sessions");
        Ok(())
    }

    /// Reads `path` in the session file format and folds it into the stored catalog.
    pub(crate) fn import(&self, path: &Path, mode: ImportMode) -> Result<Catalog, SessionError> {
        let imported = self.decrypt_records(read_records(path)?);
        let count = imported.len();
        let catalog = match mode {
            ImportMode::Replace => imported,
            ImportMode::Merge => {
                let mut catalog = self.load()?;
                catalog.extend(imported);
                catalog
            }
        };
        self.save(&catalog)?;
        tracing::info!(count, ?mode, path = %path.display(), "imported sessions");
        Ok(catalog)
    }

    pub(crate) fn export(&self, path: &Path, catalog: &Catalog) -> Result<(), SessionError> {
        write_json(path, &self.encrypt_catalog(catalog)?)?;
        tracing::info!(count = catalog.len(), path = %path.display(), "exported sessions");
        Ok(())
    }

    pub(crate) fn export_profile(
        &self,
        path: &Path,
        profile: &SessionProfile,
    ) -> Result<(), SessionError> {
        write_json(path, &self.encrypt_profile(profile)?)?;
        tracing::info!(session = %profile.name, path = %path.display(), "exported session");
        Ok(())
    }

    /// Reads a single record and names it after the file stem, suffixing on collision.
    pub(crate) fn import_profile(
        &self,
        path: &Path,
        catalog: &Catalog,
    ) -> Result<SessionProfile, SessionError> {
        let content = fs::read_to_string(path)?;
        let record: PersistedProfileRecord = serde_json::from_str(&content)?;
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "imported".to_string());
        let name = unique_import_name(catalog, &stem);
        Ok(self.decrypt_record(name, record))
    }

    fn encrypt_catalog(&self, catalog: &Catalog) -> Result<PersistedCatalog, SessionError> {
        catalog
            .iter()
            .map(|(name, profile)| Ok((name.clone(), self.encrypt_profile(profile)?)))
            .collect()
    }

    fn encrypt_profile(
        &self,
        profile: &SessionProfile,
    ) -> Result<PersistedProfileRecord, SessionError> {
        Ok(PersistedProfileRecord {
            host: profile.host.clone(),
            port: profile.port,
            username: profile.username.clone(),
            password: self
                .cipher
                .encrypt(profile.secret.as_deref().unwrap_or_default())?,
            ssh_key_path: profile.key_file_path.clone().unwrap_or_default(),
        })
    }

    fn decrypt_records(&self, records: PersistedCatalog) -> Catalog {
        records
            .into_iter()
            .map(|(name, record)| {
                let profile = self.decrypt_record(name.clone(), record);
                (name, profile)
            })
            .collect()
    }

    fn decrypt_record(&self, name: String, record: PersistedProfileRecord) -> SessionProfile {
        let secret = match self.cipher.decrypt(&record.password) {
            Ok(secret) => non_empty(secret),
            Err(err) => {
                tracing::warn!(session = %name, error = %err, "stored password unusable, dropping it");
                None
            }
        };
        SessionProfile {
            name,
            host: record.host,
            port: record.port,
            username: record.username,
            secret,
            key_file_path: non_empty(record.ssh_key_path),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn read_records(path: &Path) -> Result<PersistedCatalog, SessionError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> SessionStore {
        SessionStore::new(dir.join("sessions.json"), CredentialCipher::generate())
    }

    fn profile(name: &str, secret: Option<&str>) -> SessionProfile {
        SessionProfile {
            secret: secret.map(str::to_string),
            ..SessionProfile::new(name, "10.0.0.5", "alice")
        }
    }

    fn raw_records(path: &Path) -> PersistedCatalog {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn missing_file_loads_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_in(dir.path()).load().unwrap().is_empty());
    }

    #[test]
    fn saved_secret_is_encrypted_on_disk_and_restored() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let mut catalog = Catalog::new();
        catalog.insert("db1".into(), profile("db1", Some("s3cr3t")));
        store.save(&catalog).unwrap();

        let on_disk = raw_records(store.path());
        assert_ne!(on_disk["db1"].password, "s3cr3t");
        assert!(!fs::read_to_string(store.path()).unwrap().contains("s3cr3t"));

        let loaded = store.load().unwrap();
        assert_eq!(loaded["db1"].secret.as_deref(), Some("s3cr3t"));
        assert_eq!(loaded["db1"].host, "10.0.0.5");
        assert_eq!(loaded["db1"].port, 22);
        assert_eq!(loaded["db1"].username, "alice");
    }

    #[test]
    fn save_load_round_trip_reencrypts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let mut catalog = Catalog::new();
        catalog.insert("a".into(), profile("a", Some("one")));
        let mut keyed = profile("b", Some("two"));
        keyed.key_file_path = Some("/home/alice/.ssh/id_ed25519".into());
        keyed.port = 2222;
        catalog.insert("b".into(), keyed);

        store.save(&catalog).unwrap();
        let first = raw_records(store.path());
        let loaded = store.load().unwrap();
        store.save(&loaded).unwrap();
        let second = raw_records(store.path());

        assert_eq!(store.load().unwrap(), catalog);
        assert_ne!(first["a"].password, second["a"].password);
    }

    #[test]
    fn undecryptable_secret_degrades_only_that_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let mut catalog = Catalog::new();
        catalog.insert("good".into(), profile("good", Some("pw")));
        store.save(&catalog).unwrap();

        let mut records = raw_records(store.path());
        records.insert(
            "bad".into(),
            PersistedProfileRecord {
                host: "h".into(),
                port: 22,
                username: "u".into(),
                password: "garbage".into(),
                ssh_key_path: String::new(),
            },
        );
        fs::write(store.path(), serde_json::to_string(&records).unwrap()).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded["good"].secret.as_deref(), Some("pw"));
        assert_eq!(loaded["bad"].secret, None);
        assert_eq!(loaded["bad"].host, "h");
    }

    #[test]
    fn import_merge_overwrites_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let mut current = Catalog::new();
        current.insert("keep".into(), profile("keep", Some("k")));
        current.insert("shared".into(), profile("shared", Some("old")));
        store.save(&current).unwrap();

        let mut incoming = Catalog::new();
        let mut shared = profile("shared", Some("new"));
        shared.host = "10.0.0.9".into();
        incoming.insert("shared".into(), shared);
        let export_path = dir.path().join("export.json");
        store.export(&export_path, &incoming).unwrap();

        let merged = store.import(&export_path, ImportMode::Merge).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["shared"].host, "10.0.0.9");
        assert_eq!(merged["shared"].secret.as_deref(), Some("new"));
        assert_eq!(store.load().unwrap(), merged);
    }

    #[test]
    fn import_replace_drops_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let mut current = Catalog::new();
        current.insert("old".into(), profile("old", None));
        store.save(&current).unwrap();

        let import_path = dir.path().join("legacy.json");
        fs::write(
            &import_path,
            r#"{ "web": { "host": "w", "port": "22", "username": "u", "password": "", "key_file": "/k" } }"#,
        )
        .unwrap();

        let replaced = store.import(&import_path, ImportMode::Replace).unwrap();
        assert_eq!(replaced.keys().collect::<Vec<_>>(), vec!["web"]);
        assert_eq!(replaced["web"].key_file_path.as_deref(), Some("/k"));
        assert_eq!(replaced["web"].secret, None);
    }

    #[test]
    fn import_tolerates_null_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let import_path = dir.path().join("nulls.json");
        fs::write(
            &import_path,
            r#"{ "a": { "host": "h", "port": null, "username": null, "password": null, "ssh_key_path": null } }"#,
        )
        .unwrap();

        let merged = store.import(&import_path, ImportMode::Merge).unwrap();
        assert_eq!(merged["a"].host, "h");
        assert_eq!(merged["a"].port, 22);
        assert_eq!(merged["a"].username, "");
        assert_eq!(merged["a"].secret, None);
        assert_eq!(merged["a"].key_file_path, None);
    }

    #[test]
    fn single_profile_import_avoids_name_collision() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let original = profile("web", Some("pw"));
        let path = dir.path().join("web.json");
        store.export_profile(&path, &original).unwrap();

        let mut catalog = Catalog::new();
        catalog.insert("web".into(), original.clone());
        let imported = store.import_profile(&path, &catalog).unwrap();
        assert_eq!(imported.name, "web_1");
        assert_eq!(imported.secret.as_deref(), Some("pw"));
        assert_eq!(imported.host, original.host);
    }

    #[test]
    fn paths_live_in_one_directory() {
        let paths = AppPaths::in_dir(PathBuf::from("/tmp/mssh"));
        assert_eq!(paths.sessions, PathBuf::from("/tmp/mssh/sessions.json"));
        assert_eq!(paths.key, PathBuf::from("/tmp/mssh/encryption.key"));
        assert_eq!(paths.log, PathBuf::from("/tmp/mssh/client.log"));
    }
}
