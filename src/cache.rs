use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::model::{CachedSnapshot, Snapshot};

/// Single-file store for the most recent successful snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists the snapshot, logging instead of failing.
    pub fn save(&self, snapshot: &Snapshot) {
        match self.try_save(snapshot) {
            Ok(()) => debug!(path = %self.path.display(), "snapshot cached"),
            Err(err) => warn!(path = %self.path.display(), "failed to write snapshot cache: {err}"),
        }
    }

    pub fn try_save(&self, snapshot: &Snapshot) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let cached = CachedSnapshot {
            timestamp: Utc::now(),
            data: snapshot.clone(),
        };
        let payload = serde_json::to_vec_pretty(&cached)?;
        // Readers may load while a cycle writes; they see the old file or the new one.
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, payload)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    pub fn load(&self) -> Option<Snapshot> {
        self.load_cached().map(|cached| cached.data)
    }

    pub fn load_cached(&self) -> Option<CachedSnapshot> {
        if !self.path.exists() {
            return None;
        }
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %self.path.display(), "failed to read snapshot cache: {err}");
                return None;
            }
        };
        match serde_json::from_slice::<CachedSnapshot>(&bytes) {
            Ok(cached) => Some(cached),
            Err(err) => {
                warn!(path = %self.path.display(), "ignoring unreadable snapshot cache: {err}");
                None
            }
        }
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Section, Task};
    use chrono::TimeZone;

    fn sample_snapshot() -> Snapshot {
        let done = Task {
            id: "t1".to_string(),
            content: Some("Write report".to_string()),
            section_id: Some("s1".to_string()),
            completed_at: Some("2026-10-02T09:00:00Z".to_string()),
        };
        Snapshot {
            sections: vec![
                Section {
                    id: "s1".to_string(),
                    name: "Work".to_string(),
                },
                Section {
                    id: "s2".to_string(),
                    name: "Home".to_string(),
                },
            ],
            active_tasks: vec![Task {
                id: "t2".to_string(),
                content: None,
                section_id: Some("s2".to_string()),
                completed_at: None,
            }],
            completed_tasks: vec![done.clone()],
            all_completed: vec![done],
            captured_at: Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = SnapshotCache::new(dir.path().join("cache.json"));
        assert!(cache.load().is_none());
    }

    #[test]
    fn truncated_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = SnapshotCache::new(dir.path().join("cache.json"));
        cache.try_save(&sample_snapshot()).expect("save");
        let full = fs::read_to_string(cache.path()).expect("read");
        fs::write(cache.path(), &full[..full.len() / 2]).expect("truncate");
        assert!(cache.load().is_none());
    }

    #[test]
    fn payload_without_data_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = SnapshotCache::new(dir.path().join("cache.json"));
        fs::write(cache.path(), r#"{ "timestamp": "2026-10-18T08:00:00Z" }"#).expect("write");
        assert!(cache.load().is_none());
    }

    #[test]
    fn saved_snapshot_loads_back_equal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = SnapshotCache::new(dir.path().join("nested").join("cache.json"));
        let snapshot = sample_snapshot();
        cache.save(&snapshot);

        let cached = cache.load_cached().expect("cached snapshot");
        assert_eq!(cached.data, snapshot);
        assert!(cached.timestamp >= snapshot.captured_at);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(cache.path()).expect("read")).expect("json");
        assert!(raw["timestamp"].is_string());
        assert!(raw["data"]["timestamp"].is_string());
        assert!(raw["data"]["all_completed"].is_array());
    }

    #[test]
    fn save_overwrites_and_clear_removes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = SnapshotCache::new(dir.path().join("cache.json"));
        let mut snapshot = sample_snapshot();
        cache.save(&snapshot);
        snapshot.active_tasks.clear();
        cache.save(&snapshot);
        assert_eq!(cache.load().expect("snapshot").active_tasks.len(), 0);

        cache.clear().expect("clear");
        assert!(cache.load().is_none());
        cache.clear().expect("clearing twice is fine");
    }
}
