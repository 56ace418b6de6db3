use crate::dag::StageKeys;
use crate::error::Result;
use crate::job::StageId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use uuid::Uuid;

/// Encodes stage output lines into their published byte form:
/// one row per line, trailing newline when non-empty.
pub fn encode_lines(lines: &[String]) -> Vec<u8> {
    if lines.is_empty() {
        return Vec::new();
    }
    let mut bytes = lines.join("\n").into_bytes();
    bytes.push(b'\n');
    bytes
}

/// Decodes published bytes back into lines.
pub fn decode_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}

/// Store of published stage outputs, keyed by stage output key.
///
/// Publishing replaces any previous output under the same key and is
/// atomic: the directory backend writes a temp file and renames it into
/// place, so a reader sees either the full output or none of it.
/// Published outputs survive downstream failures so a failed run can be
/// diagnosed from its completed stages.
pub struct StageStore {
    backend: Backend,
}

enum Backend {
    Memory(Mutex<HashMap<String, Vec<u8>>>),
    Dir(PathBuf),
}

impl StageStore {
    /// Volatile store for tests and single-process runs.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(HashMap::new())),
        }
    }

    /// Directory-backed store; one file per stage output key.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Dir(dir.into()),
        }
    }

    fn file_name(key: &str) -> String {
        format!("{}.tsv", key.replace(':', "_"))
    }

    /// Publish a stage output, replacing any previous one under the key.
    pub async fn publish(&self, key: &str, data: &[u8]) -> Result<()> {
        match &self.backend {
            Backend::Memory(outputs) => {
                outputs.lock().insert(key.to_string(), data.to_vec());
                Ok(())
            }
            Backend::Dir(dir) => {
                std::fs::create_dir_all(dir)?;
                let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
                std::fs::write(&tmp, data)?;
                std::fs::rename(&tmp, dir.join(Self::file_name(key)))?;
                Ok(())
            }
        }
    }

    /// Fetch a published output as an owned snapshot.
    pub async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Memory(outputs) => Ok(outputs.lock().get(key).cloned()),
            Backend::Dir(dir) => match std::fs::read(dir.join(Self::file_name(key))) {
                Ok(data) => Ok(Some(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            },
        }
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        match &self.backend {
            Backend::Memory(outputs) => Ok(outputs.lock().contains_key(key)),
            Backend::Dir(dir) => Ok(dir.join(Self::file_name(key)).exists()),
        }
    }

    /// Stages whose output is already published for these keys (for resume).
    pub async fn completed_stages(&self, keys: &StageKeys) -> Result<HashSet<StageId>> {
        let mut completed = HashSet::new();
        for stage in StageId::ALL {
            if self.contains(&keys.key_for_stage(stage)).await? {
                completed.insert(stage);
            }
        }
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_codec_round_trip() {
        let lines = vec!["a\t1".to_string(), "b\t2".to_string()];
        let bytes = encode_lines(&lines);
        assert_eq!(bytes, b"a\t1\nb\t2\n");
        assert_eq!(decode_lines(&bytes), lines);
        assert!(encode_lines(&[]).is_empty());
        assert!(decode_lines(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_memory_publish_and_fetch() {
        let store = StageStore::in_memory();
        store.publish("aggregate:bmw:run1", b"eu\tx5\t1|2|3|0\n").await.unwrap();

        let data = store.fetch("aggregate:bmw:run1").await.unwrap();
        assert_eq!(data.as_deref(), Some(b"eu\tx5\t1|2|3|0\n".as_slice()));
        assert_eq!(store.fetch("rollup:bmw:run1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_replaces_existing() {
        let store = StageStore::in_memory();
        store.publish("rollup:bmw:run1", b"eu\t1\n").await.unwrap();
        store.publish("rollup:bmw:run1", b"eu\t2\n").await.unwrap();

        let data = store.fetch("rollup:bmw:run1").await.unwrap().unwrap();
        assert_eq!(data, b"eu\t2\n");
    }

    #[tokio::test]
    async fn test_completed_stages() {
        let store = StageStore::in_memory();
        let keys = StageKeys::new("bmw".to_string(), "run1".to_string());

        store.publish(&keys.aggregate_key(), b"x\n").await.unwrap();
        store.publish(&keys.rollup_key(), b"y\n").await.unwrap();

        let completed = store.completed_stages(&keys).await.unwrap();
        assert_eq!(completed.len(), 2);
        assert!(completed.contains(&StageId::Aggregate));
        assert!(completed.contains(&StageId::Rollup));
        assert!(!completed.contains(&StageId::TopK));
    }

    #[tokio::test]
    async fn test_dir_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StageStore::in_dir(dir.path());

        store.publish("aggregate:bmw:run1", b"eu\tx5\t1|2|3|0\n").await.unwrap();
        let data = store.fetch("aggregate:bmw:run1").await.unwrap().unwrap();
        assert_eq!(data, b"eu\tx5\t1|2|3|0\n");

        // no temp files left behind after a publish
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_dir_store_absent_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StageStore::in_dir(dir.path().join("never-created"));
        assert_eq!(store.fetch("rollup:bmw:run1").await.unwrap(), None);
    }
}
