//! Durable JSON stores.
//!
//! Every logical store owns a write mutex so physical writes are serialized.
//! Whole-document stores are written to a temp file in the same directory and
//! atomically renamed over the target; append-only logs write one complete
//! line per record. Readers treat a missing file as empty initial state.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{GateError, GateResult};

/// Write bytes to a file atomically (temp file + fsync + rename).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> GateResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent).map_err(|e| GateError::persistence(parent, e))?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path).map_err(|e| GateError::persistence(&temp_path, e))?;
        file.write_all(bytes)
            .map_err(|e| GateError::persistence(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| GateError::persistence(&temp_path, e))?;
    }

    fs::rename(&temp_path, path).map_err(|e| GateError::persistence(path, e))?;
    Ok(())
}

/// A single JSON document on disk.
pub struct JsonStore<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document. A missing or empty file is `Ok(None)`.
    pub fn load(&self) -> GateResult<Option<T>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GateError::persistence(&self.path, e)),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| GateError::persistence(&self.path, e))
    }

    /// Serialize and atomically replace the document.
    pub fn save(&self, value: &T) -> GateResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        write_atomic(&self.path, &bytes)
    }
}

impl<T: Serialize + DeserializeOwned + Default> JsonStore<T> {
    /// Load the document, falling back to default state on absence or corruption.
    pub fn load_or_default(&self) -> T {
        match self.load() {
            Ok(Some(value)) => value,
            Ok(None) => {
                tracing::debug!("No state at {}, starting fresh", self.path.display());
                T::default()
            }
            Err(e) => {
                tracing::error!("Failed to load {}: {}. Using default state", self.path.display(), e);
                T::default()
            }
        }
    }
}

/// Append-only JSON-lines log.
pub struct JsonlLog<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonlLog<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    pub fn append(&self, record: &T) -> GateResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| GateError::persistence(parent, e))?;
            }
        }

        // A crash can leave a torn last line; start on a fresh one.
        if self.ends_mid_line()? {
            line.insert(0, b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| GateError::persistence(&self.path, e))?;
        file.write_all(&line)
            .map_err(|e| GateError::persistence(&self.path, e))?;
        file.sync_data()
            .map_err(|e| GateError::persistence(&self.path, e))?;
        Ok(())
    }

    /// Read every parseable record; torn or corrupt lines are skipped.
    pub fn read_all(&self) -> GateResult<Vec<T>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GateError::persistence(&self.path, e)),
        };

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| GateError::persistence(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    "Skipping unreadable line {} in {}: {}",
                    idx + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(records)
    }

    fn ends_mid_line(&self) -> GateResult<bool> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(GateError::persistence(&self.path, e)),
        };
        let len = file
            .metadata()
            .map_err(|e| GateError::persistence(&self.path, e))?
            .len();
        if len == 0 {
            return Ok(false);
        }
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))
            .and_then(|_| file.read_exact(&mut last))
            .map_err(|e| GateError::persistence(&self.path, e))?;
        Ok(last[0] != b'\n')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        count: u32,
        label: String,
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonStore<Doc> = JsonStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.load_or_default(), Doc::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonStore<Doc> = JsonStore::new(dir.path().join("nested/state.json"));
        let doc = Doc { count: 3, label: "x".into() };
        store.save(&doc).unwrap();
        assert_eq!(store.load().unwrap(), Some(doc));
        assert!(!dir.path().join("nested/state.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{\"count\": 3, \"lab").unwrap();
        let store: JsonStore<Doc> = JsonStore::new(&path);
        assert!(matches!(store.load(), Err(GateError::Persistence { .. })));
        assert_eq!(store.load_or_default(), Doc::default());
    }

    #[test]
    fn test_jsonl_skips_torn_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let log: JsonlLog<Doc> = JsonlLog::new(&path);
        log.append(&Doc { count: 1, label: "a".into() }).unwrap();

        // Simulate a crash halfway through a write.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"count\": 2, \"la").unwrap();
        drop(f);

        log.append(&Doc { count: 3, label: "c".into() }).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].count, 1);
        assert_eq!(records[1].count, 3);
    }
}
