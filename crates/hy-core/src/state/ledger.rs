//! Durable per-target state ledger.
//!
//! One JSON file per target, keyed by the target's identity key. Each entry
//! keeps a denormalised copy of the strong identifiers it was recorded with so
//! that a later candidate carrying a different identifier still resolves to the
//! same entry.

use super::{StateError, StateResult};
use crate::models::SyncAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persisted state for one target entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub fingerprint: String,
    pub last_action: SyncAction,
    pub updated_at: DateTime<Utc>,
    /// ID assigned by the target store, when known.
    #[serde(default)]
    pub target_id: Option<String>,
    /// Display name, for readability of the file only.
    #[serde(default)]
    pub name: Option<String>,
    /// Strong identifiers as `kind:value` keys.
    #[serde(default)]
    pub identifiers: BTreeSet<String>,
}

/// Key-value ledger with an in-memory identifier index.
#[derive(Debug, Default)]
pub struct Ledger {
    path: Option<PathBuf>,
    entries: BTreeMap<String, LedgerEntry>,
    by_identifier: HashMap<String, String>,
    dirty: bool,
}

fn index_key(identifier: &str) -> String {
    identifier.trim().to_uppercase()
}

impl Ledger {
    /// Creates a ledger that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads a ledger file.
    ///
    /// A missing file yields an empty ledger. A file that exists but does not
    /// parse is logged and also treated as empty; it is overwritten on the
    /// next save.
    pub fn load(path: impl Into<PathBuf>) -> StateResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<BTreeMap<String, LedgerEntry>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring corrupt state file");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), entries = entries.len(), "Loaded state ledger");

        let mut ledger = Self {
            path: Some(path),
            entries,
            by_identifier: HashMap::new(),
            dirty: false,
        };
        ledger.rebuild_index();
        Ok(ledger)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, key: &str) -> Option<&LedgerEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &LedgerEntry)> {
        self.entries.iter()
    }

    /// Returns the key of the entry recorded with any of `identifiers`.
    pub fn key_for_identifiers<'a, I>(&self, identifiers: I) -> Option<&str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        identifiers
            .into_iter()
            .find_map(|id| self.by_identifier.get(&index_key(id)))
            .map(String::as_str)
    }

    /// Inserts or replaces an entry and marks the ledger dirty.
    ///
    /// Identifiers already recorded on the entry are kept, so an entity
    /// remains reachable through every identifier it was ever seen with.
    pub fn upsert(&mut self, key: impl Into<String>, mut entry: LedgerEntry) {
        let key = key.into();
        if let Some(previous) = self.entries.get(&key) {
            entry.identifiers.extend(previous.identifiers.iter().cloned());
            if entry.target_id.is_none() {
                entry.target_id = previous.target_id.clone();
            }
        }
        for identifier in &entry.identifiers {
            self.by_identifier.insert(index_key(identifier), key.clone());
        }
        self.entries.insert(key, entry);
        self.dirty = true;
    }

    /// Writes the ledger if it changed since the last load or save.
    ///
    /// Returns whether a write happened. The file is replaced atomically.
    pub fn save(&mut self) -> StateResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let Some(path) = self.path.clone() else {
            self.dirty = false;
            return Ok(false);
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(&self.entries)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            StateError::Io(e)
        })?;

        self.dirty = false;
        debug!(path = %path.display(), entries = self.entries.len(), "Saved state ledger");
        Ok(true)
    }

    fn rebuild_index(&mut self) {
        self.by_identifier = self
            .entries
            .iter()
            .flat_map(|(key, entry)| {
                entry
                    .identifiers
                    .iter()
                    .map(move |id| (index_key(id), key.clone()))
            })
            .collect();
    }
}
