//! Last commanded servo angles, persisted so a restart does not re-sweep servos at rest.
//!
//! Recording an angle only touches memory. The file is rewritten by a background writer
//! ([`PositionStore::spawn_writer`]) that coalesces bursts of moves into one write, and by
//! [`PositionStore::flush`] on shutdown.

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use dashmap::DashMap;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

/// Failures reading or writing the position record.
#[derive(Debug, Error)]
pub enum PositionStoreError {
    /// The record could not be read.
    #[error("failed to read position record `{path}`")]
    Read {
        /// Record path.
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The record is not the expected JSON object.
    #[error("failed to parse position record `{path}`")]
    Parse {
        /// Record path.
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The angles could not be encoded.
    #[error("failed to encode position record")]
    Encode(#[source] serde_json::Error),
    /// The record could not be written.
    #[error("failed to write position record `{path}`")]
    Write {
        /// Record path.
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The blocking write task died.
    #[error("position writer task failed")]
    Join(#[source] tokio::task::JoinError),
}

/// Servo name to last commanded angle, mirrored to a JSON file in the background.
#[derive(Clone)]
pub struct PositionStore {
    inner: Arc<PositionStoreInner>,
}

struct PositionStoreInner {
    path: Option<PathBuf>,
    angles: DashMap<String, f32>,
    /// Bumped on every recorded angle; the writer wakes on changes.
    changes: watch::Sender<u64>,
    write_gate: Mutex<()>,
}

impl PositionStoreInner {
    fn new(path: Option<PathBuf>, angles: DashMap<String, f32>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            path,
            angles,
            changes,
            write_gate: Mutex::new(()),
        }
    }
}

impl PositionStore {
    /// Load the record at `path`. Servos missing from the record, or every servo when the
    /// record is absent or unreadable, start at their rest angle.
    pub fn load(path: impl Into<PathBuf>, rest_angles: &IndexMap<String, f32>) -> Self {
        let path = path.into();
        let persisted = match read_record(&path) {
            Ok(record) => {
                info!(path = %path.display(), count = record.len(), "loaded servo positions");
                record
            }
            Err(PositionStoreError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no servo position record; assuming rest angles");
                IndexMap::new()
            }
            Err(err) => {
                warn!(error = %err, "ignoring servo position record; assuming rest angles");
                IndexMap::new()
            }
        };

        let angles = rest_angles
            .iter()
            .map(|(name, rest)| {
                let angle = persisted.get(name).copied().unwrap_or(*rest);
                (name.clone(), angle)
            })
            .collect();

        Self {
            inner: Arc::new(PositionStoreInner::new(Some(path), angles)),
        }
    }

    /// Store that never touches the disk, every servo at its rest angle.
    pub fn in_memory(rest_angles: &IndexMap<String, f32>) -> Self {
        let angles = rest_angles
            .iter()
            .map(|(name, angle)| (name.clone(), *angle))
            .collect();
        Self {
            inner: Arc::new(PositionStoreInner::new(None, angles)),
        }
    }

    /// Last commanded angle of `servo`.
    pub fn get(&self, servo: &str) -> Option<f32> {
        self.inner.angles.get(servo).map(|entry| *entry.value())
    }

    /// Remember `angle` for `servo` and wake the writer. Never blocks on the disk.
    pub fn record(&self, servo: &str, angle: f32) {
        self.inner.angles.insert(servo.to_string(), angle);
        self.inner.changes.send_modify(|version| *version += 1);
    }

    /// Start the background task rewriting the record after changes. Changes recorded
    /// while a write is running are folded into the next one. `None` for an in-memory store.
    pub fn spawn_writer(&self) -> Option<JoinHandle<()>> {
        self.inner.path.as_ref()?;
        let mut changes = self.inner.changes.subscribe();
        let store = self.clone();

        Some(tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let version = *changes.borrow_and_update();
                match store.flush().await {
                    Ok(()) => debug!(version, "servo positions persisted"),
                    Err(err) => warn!(error = %err, "failed to persist servo positions"),
                }
            }
        }))
    }

    /// Write the current angles now, off the async threads.
    pub async fn flush(&self) -> Result<(), PositionStoreError> {
        if self.inner.path.is_none() {
            return Ok(());
        }
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.persist())
            .await
            .map_err(PositionStoreError::Join)?
    }

    /// Snapshot of every known angle, sorted by servo name.
    pub fn snapshot(&self) -> IndexMap<String, f32> {
        let mut angles: IndexMap<String, f32> = self
            .inner
            .angles
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        angles.sort_keys();
        angles
    }

    fn persist(&self) -> Result<(), PositionStoreError> {
        let Some(path) = self.inner.path.as_deref() else {
            return Ok(());
        };

        let _gate = self
            .inner
            .write_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let contents =
            serde_json::to_string_pretty(&self.snapshot()).map_err(PositionStoreError::Encode)?;
        write_atomically(path, &contents).map_err(|source| PositionStoreError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn read_record(path: &Path) -> Result<IndexMap<String, f32>, PositionStoreError> {
    let contents = fs::read_to_string(path).map_err(|source| PositionStoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| PositionStoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write through a sibling temporary file so a crash never leaves a truncated record.
fn write_atomically(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn rest() -> IndexMap<String, f32> {
        IndexMap::from([("gate".to_string(), 0.0), ("tube".to_string(), 10.0)])
    }

    #[test]
    fn missing_record_defaults_to_rest() {
        let dir = TempDir::new().unwrap();
        let store = PositionStore::load(dir.path().join("positions.json"), &rest());
        assert_eq!(store.get("gate"), Some(0.0));
        assert_eq!(store.get("tube"), Some(10.0));
        assert_eq!(store.get("platform"), None);
    }

    #[tokio::test]
    async fn recorded_angles_survive_a_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/positions.json");

        let store = PositionStore::load(&path, &rest());
        store.record("gate", 90.0);
        assert!(!path.exists());
        store.flush().await.unwrap();
        drop(store);

        let reloaded = PositionStore::load(&path, &rest());
        assert_eq!(reloaded.get("gate"), Some(90.0));
        assert_eq!(reloaded.get("tube"), Some(10.0));
    }

    #[tokio::test]
    async fn writer_persists_the_latest_angle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        let store = PositionStore::load(&path, &rest());
        let writer = store.spawn_writer().unwrap();

        store.record("gate", 30.0);
        store.record("gate", 60.0);

        let mut persisted = None;
        for _ in 0..200 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            persisted = read_record(&path)
                .ok()
                .and_then(|record| record.get("gate").copied());
            if persisted == Some(60.0) {
                break;
            }
        }
        writer.abort();
        assert_eq!(persisted, Some(60.0));
    }

    #[test]
    fn corrupt_record_falls_back_to_rest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        fs::write(&path, "{ gate: ").unwrap();

        let store = PositionStore::load(&path, &rest());
        assert_eq!(store.get("gate"), Some(0.0));
    }

    #[test]
    fn servos_unknown_to_config_are_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        fs::write(&path, r#"{ "gate": 45.0, "retired": 12.0 }"#).unwrap();

        let store = PositionStore::load(&path, &rest());
        assert_eq!(store.get("gate"), Some(45.0));
        assert_eq!(store.get("retired"), None);
    }

    #[test]
    fn in_memory_store_writes_nothing() {
        let store = PositionStore::in_memory(&rest());
        assert!(store.spawn_writer().is_none());
        store.record("tube", 170.0);
        assert_eq!(store.get("tube"), Some(170.0));
        assert_eq!(
            store.snapshot().keys().cloned().collect::<Vec<_>>(),
            vec!["gate".to_string(), "tube".to_string()]
        );
    }
}
