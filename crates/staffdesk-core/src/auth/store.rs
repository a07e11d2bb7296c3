use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::debug;

use super::record::PersistedRecord;

/// Namespaced key the session record lives under, in every backend.
pub const RECORD_KEY: &str = "admin_data";

/// Keyring service name
const SERVICE_NAME: &str = "staffdesk";

/// Durable storage for the one session record.
///
/// Absence is a normal result (`Ok(None)`), never an error. `save` replaces
/// any previous record as a single unit.
pub trait CredentialStore: Send + Sync {
    fn save(&self, record: &PersistedRecord) -> Result<()>;

    fn load(&self) -> Result<Option<PersistedRecord>>;

    fn clear(&self) -> Result<()>;
}

// ============================================================================
// File store
// ============================================================================

/// Stores the record as JSON in a data directory.
///
/// Writes go to a temp file which is then renamed over the record, so a
/// reader sees either the old record or the new one.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", RECORD_KEY))
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", RECORD_KEY))
    }

    fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CredentialStore for FileStore {
    fn save(&self, record: &PersistedRecord) -> Result<()> {
        std::fs::create_dir_all(self.dir())
            .with_context(|| format!("Failed to create data directory {}", self.dir.display()))?;

        let contents = serde_json::to_string_pretty(record)?;
        let tmp = self.temp_path();
        std::fs::write(&tmp, contents).context("Failed to write session record")?;
        std::fs::rename(&tmp, self.path()).context("Failed to replace session record")?;
        debug!(path = %self.path().display(), "Session record saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedRecord>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session record")?;
        let record: PersistedRecord =
            serde_json::from_str(&contents).context("Failed to parse session record")?;
        Ok(Some(record))
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to delete session record"),
        }
    }
}

// ============================================================================
// Keyring store
// ============================================================================

/// Stores the whole record as one secret in the OS keychain.
pub struct KeyringStore {
    entry: Entry,
}

impl KeyringStore {
    pub fn new() -> Result<Self> {
        let entry =
            Entry::new(SERVICE_NAME, RECORD_KEY).context("Failed to create keyring entry")?;
        Ok(Self { entry })
    }
}

impl CredentialStore for KeyringStore {
    fn save(&self, record: &PersistedRecord) -> Result<()> {
        let contents = serde_json::to_string(record)?;
        self.entry
            .set_password(&contents)
            .context("Failed to store session in keychain")
    }

    fn load(&self) -> Result<Option<PersistedRecord>> {
        match self.entry.get_password() {
            Ok(contents) => {
                let record = serde_json::from_str(&contents)
                    .context("Failed to parse session from keychain")?;
                Ok(Some(record))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    fn clear(&self) -> Result<()> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}

// ============================================================================
// Memory store
// ============================================================================

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    record: Mutex<Option<PersistedRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: PersistedRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn save(&self, record: &PersistedRecord) -> Result<()> {
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedRecord>> {
        Ok(self.record.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn clear(&self) -> Result<()> {
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
