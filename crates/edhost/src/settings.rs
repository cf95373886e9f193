//! 設定ドキュメント管理
//! ホストの名前付き設定（JSONオブジェクト）を読み書きし、リスト設定の保存を調停する

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::{Map, Value};

use crate::locked;

/// A live handle to a named settings document.
///
/// Clones share the same underlying map, so every holder of a handle for
/// the same document observes writes immediately. Persistence is explicit
/// through [`SettingsHost::save_settings`].
#[derive(Clone, Default)]
pub struct Settings {
    values: Arc<Mutex<Map<String, Value>>>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self {
            values: Arc::new(Mutex::new(values)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        locked(&self.values).get(key).cloned()
    }

    /// Returns the value for `key` only when it is a JSON string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn set(&self, key: &str, value: Value) {
        locked(&self.values).insert(key.to_string(), value);
    }

    pub fn erase(&self, key: &str) {
        locked(&self.values).remove(key);
    }

    /// Serializes the current contents as a pretty-printed JSON object.
    pub fn to_json(&self) -> Result<String> {
        let values = locked(&self.values).clone();
        Ok(serde_json::to_string_pretty(&Value::Object(values))?)
    }
}

/// Host access to named settings documents.
pub trait SettingsHost: Send + Sync {
    /// Returns the live handle for `name`, creating an empty document when
    /// the host has none yet. Repeated calls return handles to the same
    /// underlying document.
    fn load_settings(&self, name: &str) -> Settings;

    /// Persists the current contents of the document `name`.
    fn save_settings(&self, name: &str) -> Result<()>;
}

/// In-memory settings host.
///
/// Documents live for the lifetime of the host. Save calls are recorded in
/// order so an embedder can observe how often persistence happens.
#[derive(Default)]
pub struct MemorySettings {
    docs: Mutex<HashMap<String, Settings>>,
    saves: Mutex<Vec<String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Document names passed to `save_settings`, in call order.
    pub fn saved(&self) -> Vec<String> {
        locked(&self.saves).clone()
    }
}

impl SettingsHost for MemorySettings {
    fn load_settings(&self, name: &str) -> Settings {
        locked(&self.docs).entry(name.to_string()).or_default().clone()
    }

    fn save_settings(&self, name: &str) -> Result<()> {
        locked(&self.saves).push(name.to_string());
        Ok(())
    }
}

/// Settings host persisting each document as a JSON file under one
/// directory, named exactly after the document.
pub struct DiskSettings {
    dir: PathBuf,
    open: Mutex<HashMap<String, Settings>>,
}

impl DiskSettings {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn read_document(&self, name: &str) -> Settings {
        let path = self.document_path(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            // A document that was never saved is an empty document
            Err(_) => return Settings::new(),
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Settings::from_map(map),
            Ok(_) => {
                log::warn!("Settings document {} is not a JSON object, starting empty", name);
                Settings::new()
            }
            Err(json_err) => {
                log::error!("Failed to parse settings document {}: {}", name, json_err);

                // Backup broken document before replacing it
                let backup_path = path.with_file_name(format!("{}.bak", name));
                if let Err(e) = fs::copy(&path, &backup_path) {
                    log::warn!("Failed to backup broken settings document: {}", e);
                } else {
                    log::info!("Backed up broken settings document to: {}", backup_path.display());
                }
                Settings::new()
            }
        }
    }
}

impl SettingsHost for DiskSettings {
    fn load_settings(&self, name: &str) -> Settings {
        let mut open = locked(&self.open);
        if let Some(doc) = open.get(name) {
            return doc.clone();
        }
        let doc = self.read_document(name);
        open.insert(name.to_string(), doc.clone());
        doc
    }

    fn save_settings(&self, name: &str) -> Result<()> {
        let doc = self.load_settings(name);
        if let Err(e) = fs::create_dir_all(&self.dir) {
            return Err(anyhow::anyhow!(
                "設定ディレクトリの作成に失敗しました: {} - {}",
                self.dir.display(),
                e
            ));
        }
        let content = doc.to_json()?;
        if let Err(e) = fs::write(self.document_path(name), content) {
            return Err(anyhow::anyhow!(
                "設定ドキュメントの保存に失敗しました: {} - {}",
                name,
                e
            ));
        }
        Ok(())
    }
}

/// Reads an ordered, deduplicated string list from `key`.
///
/// Missing keys, non-list values and non-string members are tolerated and
/// ignored, since settings documents may be edited by hand.
pub fn load_list_setting(settings: &Settings, key: &str) -> BTreeSet<String> {
    match settings.get(key) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(value) => Some(value),
                _ => None,
            })
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Writes an ordered, deduplicated string list to `key` in the document
/// `name` and persists the document.
///
/// The stored order is case-insensitive alphabetical. The write is skipped
/// when the stored list already equals `value`. When `observed` is given
/// and the stored list no longer matches it, the document was modified
/// behind the caller's back; the write is refused so the concurrent edit
/// survives.
///
/// Returns whether the document was saved.
pub fn save_list_setting(
    host: &dyn SettingsHost,
    settings: &Settings,
    name: &str,
    key: &str,
    value: &BTreeSet<String>,
    observed: Option<&BTreeSet<String>>,
) -> Result<bool> {
    let current = load_list_setting(settings, key);

    if let Some(observed) = observed {
        if current != *observed {
            log::warn!(
                "Not saving {} in {}: the list changed while the operation was running",
                key,
                name
            );
            return Ok(false);
        }
    }

    if current == *value {
        return Ok(false);
    }

    let mut ordered: Vec<String> = value.iter().cloned().collect();
    ordered.sort_by_key(|name| name.to_lowercase());
    settings.set(
        key,
        Value::Array(ordered.into_iter().map(Value::String).collect()),
    );
    host.save_settings(name)?;
    Ok(true)
}
