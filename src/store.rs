use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const SCHEDULE_KEY: &str = "schedule";
pub const QUOTA_KEY: &str = "quota";
pub const STATS_KEY: &str = "stats";

/// One JSON document per key. Writes land via rename so readers never see a
/// partial document.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).with_context(|| format!("create store dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let value = serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(value))
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.key_path(key);
        let tmp = self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4()));
        let content = serde_json::to_vec_pretty(value)?;
        std::fs::write(&tmp, content).with_context(|| format!("write {}", tmp.display()))?;
        if let Err(err) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(err).with_context(|| format!("replace {}", path.display()));
        }
        Ok(())
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::local;
    use crate::model::ScheduleState;

    #[test]
    fn missing_key_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path()).expect("open");
        let loaded: Option<ScheduleState> = store.load(SCHEDULE_KEY).expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn value_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = ScheduleState {
            next_fire_time: Some(local(2025, 1, 15, 14, 30)),
            is_enabled: true,
        };
        Store::open(dir.path())
            .expect("open")
            .save(SCHEDULE_KEY, &state)
            .expect("save");

        let reopened = Store::open(dir.path()).expect("reopen");
        let loaded: Option<ScheduleState> = reopened.load(SCHEDULE_KEY).expect("load");
        assert_eq!(loaded, Some(state));

        let leftovers = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("quota.json"), "{not json").expect("write");
        let store = Store::open(dir.path()).expect("open");
        let loaded: Result<Option<crate::model::QuotaState>> = store.load(QUOTA_KEY);
        assert!(loaded.is_err());
    }
}
