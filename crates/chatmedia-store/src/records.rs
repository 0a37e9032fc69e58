//! Record persistence.
//!
//! [`JsonDirectoryStore`] keeps one pretty-printed JSON document per record
//! in a directory. [`MemoryRecordStore`] keeps records in memory and counts
//! saves, which the pipeline tests use to check save behavior.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chatmedia_core::{sanitize_filename, ChatRecord, Error, RecordStore, Result};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

const RECORD_EXTENSION: &str = "json";

// =============================================================================
// JSON DIRECTORY
// =============================================================================

/// One `<key>.json` file per record.
///
/// The key is the file stem. A record's embedded `id` (often a resource
/// name such as `spaces/AAA`) never decides where it is saved.
#[derive(Debug, Clone)]
pub struct JsonDirectoryStore {
    dir: PathBuf,
}

impl JsonDirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Listed stems map back to their own file; anything else is sanitized.
    fn path_for(&self, key: &str) -> PathBuf {
        let stem = if is_plain_stem(key) {
            key.to_string()
        } else {
            sanitize_filename(key)
        };
        self.dir.join(format!("{}.{}", stem, RECORD_EXTENSION))
    }
}

fn is_plain_stem(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && !key.contains(['/', '\\', '\0'])
}

#[async_trait]
impl RecordStore for JsonDirectoryStore {
    async fn list_record_ids(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(dir = %self.dir.display(), "Records directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn load(&self, id: &str) -> Result<ChatRecord> {
        let path = self.path_for(id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("record {}", id)))
            }
            Err(e) => return Err(e.into()),
        };
        let mut record: ChatRecord = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Serialization(format!("{}: {}", path.display(), e)))?;
        if record.id.is_empty() {
            record.id = id.to_string();
        }
        Ok(record)
    }

    async fn save(&self, id: &str, record: &ChatRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(id);
        let body = serde_json::to_vec_pretty(record)?;

        let temp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(e) = fs::write(&temp, &body).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!(record_id = %id, path = %path.display(), bytes = body.len(), "Record saved");
        Ok(())
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<String, ChatRecord>,
    saves: Vec<String>,
    fail_saves: bool,
}

/// In-memory record store that logs every save.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = ChatRecord>) -> Self {
        let store = Self::new();
        {
            let mut state = store.lock();
            for record in records {
                state.records.insert(record.id.clone(), record);
            }
        }
        store
    }

    /// Make every subsequent save fail with a storage error.
    pub fn fail_saves(self) -> Self {
        self.lock().fail_saves = true;
        self
    }

    pub fn get(&self, id: &str) -> Option<ChatRecord> {
        self.lock().records.get(id).cloned()
    }

    /// Total number of successful saves.
    pub fn save_count(&self) -> usize {
        self.lock().saves.len()
    }

    /// Number of successful saves of one record.
    pub fn saves_for(&self, id: &str) -> usize {
        self.lock().saves.iter().filter(|s| s.as_str() == id).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list_record_ids(&self) -> Result<Vec<String>> {
        Ok(self.lock().records.keys().cloned().collect())
    }

    async fn load(&self, id: &str) -> Result<ChatRecord> {
        self.get(id)
            .ok_or_else(|| Error::NotFound(format!("record {}", id)))
    }

    async fn save(&self, id: &str, record: &ChatRecord) -> Result<()> {
        let mut state = self.lock();
        if state.fail_saves {
            return Err(Error::Storage(format!("save of {} rejected", id)));
        }
        state.records.insert(id.to_string(), record.clone());
        state.saves.push(id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmedia_core::{DownloadOutcome, DownloadStatus};
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_record(id: &str) -> ChatRecord {
        serde_json::from_value(json!({
            "id": id,
            "title": "Weekly sync",
            "messages": [
                {"id": "m1", "text": "see attached", "attachments": [
                    {"contentName": "a.png", "downloadUri": "https://h/a"}
                ]}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_json_store_round_trip_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let store = JsonDirectoryStore::new(dir.path());
        let mut record = sample_record("conv-1");
        record.messages[0].attachments[0].download = Some(DownloadOutcome {
            status: DownloadStatus::Failed,
            attempts: 1,
            ..Default::default()
        });

        store.save("conv-1", &record).await.unwrap();
        let loaded = store.load("conv-1").await.unwrap();

        assert_eq!(loaded, record);
        assert_eq!(loaded.extra["title"], "Weekly sync");
        assert_eq!(loaded.messages[0].extra["text"], "see attached");

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("conv-1.json")).unwrap())
                .unwrap();
        assert_eq!(
            on_disk["messages"][0]["attachments"][0]["download"]["status"],
            "failed"
        );
    }

    #[tokio::test]
    async fn test_json_store_lists_only_records() {
        let dir = TempDir::new().unwrap();
        let store = JsonDirectoryStore::new(dir.path());
        store.save("b", &sample_record("b")).await.unwrap();
        store.save("a", &sample_record("a")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        assert_eq!(store.list_record_ids().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_json_store_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonDirectoryStore::new(dir.path().join("absent"));
        assert!(store.list_record_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_load_missing() {
        let dir = TempDir::new().unwrap();
        let store = JsonDirectoryStore::new(dir.path());
        assert!(matches!(
            store.load("nope").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_json_store_load_malformed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{not json").unwrap();
        let store = JsonDirectoryStore::new(dir.path());
        assert!(matches!(
            store.load("bad").await,
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_json_store_fills_missing_id() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("legacy.json"), br#"{"messages": []}"#).unwrap();
        let store = JsonDirectoryStore::new(dir.path());
        assert_eq!(store.load("legacy").await.unwrap().id, "legacy");
    }

    #[tokio::test]
    async fn test_json_store_saves_back_to_loaded_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("conv.json"),
            serde_json::to_vec(&sample_record("spaces/AAA")).unwrap(),
        )
        .unwrap();
        let store = JsonDirectoryStore::new(dir.path());

        let ids = store.list_record_ids().await.unwrap();
        assert_eq!(ids, vec!["conv"]);
        let mut record = store.load("conv").await.unwrap();
        assert_eq!(record.id, "spaces/AAA");

        record.messages[0].attachments[0].download = Some(DownloadOutcome::pending());
        store.save("conv", &record).await.unwrap();

        assert_eq!(store.list_record_ids().await.unwrap(), vec!["conv"]);
        let reloaded = store.load("conv").await.unwrap();
        assert_eq!(reloaded.id, "spaces/AAA");
        assert!(reloaded.messages[0].attachments[0].download.is_some());
    }

    #[tokio::test]
    async fn test_json_store_keeps_unusual_stems() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("team chat (1).json"), br#"{"messages": []}"#).unwrap();
        let store = JsonDirectoryStore::new(dir.path());

        let ids = store.list_record_ids().await.unwrap();
        assert_eq!(ids, vec!["team chat (1)"]);
        let record = store.load(&ids[0]).await.unwrap();
        store.save(&ids[0], &record).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["team chat (1).json"]);
    }

    #[tokio::test]
    async fn test_memory_store_counts_saves() {
        let store = MemoryRecordStore::with_records([sample_record("r1"), sample_record("r2")]);
        assert_eq!(store.list_record_ids().await.unwrap(), vec!["r1", "r2"]);

        let record = store.load("r1").await.unwrap();
        store.save("r1", &record).await.unwrap();
        store.save("r1", &record).await.unwrap();

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.saves_for("r1"), 2);
        assert_eq!(store.saves_for("r2"), 0);
    }

    #[tokio::test]
    async fn test_memory_store_failing_saves() {
        let store = MemoryRecordStore::with_records([sample_record("r1")]).fail_saves();
        let record = store.load("r1").await.unwrap();
        assert!(store.save("r1", &record).await.is_err());
        assert_eq!(store.save_count(), 0);
    }
}
