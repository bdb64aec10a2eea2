use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const STATE_FORMAT_VERSION: u32 = 1;

/// The last release successfully mirrored for one task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReleaseMarker {
    pub tag: String,
    pub synced_at: DateTime<Utc>,
    /// Asset names uploaded (or already present) for this release.
    #[serde(default)]
    pub assets: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct StateFile {
    version: u32,
    #[serde(default)]
    tasks: BTreeMap<String, ReleaseMarker>,
}

/// Task id -> last synced release, persisted as JSON between runs.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    markers: BTreeMap<String, ReleaseMarker>,
}

impl StateStore {
    /// A missing file is an empty store. A file that does not parse is a fatal error rather than
    /// a silent reset, which would re-mirror every release.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let markers = match fs::read_to_string(path) {
            Ok(content) => {
                let file: StateFile = serde_json::from_str(&content).map_err(|e| {
                    SyncError::Config(format!("Corrupt state file {}: {e}", path.display()))
                })?;
                if file.version > STATE_FORMAT_VERSION {
                    return Err(SyncError::Config(format!(
                        "State file {} has unsupported format version {}",
                        path.display(),
                        file.version
                    )));
                }
                file.tasks
            }
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(SyncError::Config(format!(
                    "Cannot read state file {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            markers,
        })
    }

    pub fn marker(&self, task_id: &str) -> Option<&ReleaseMarker> {
        self.markers.get(task_id)
    }

    /// A task that has never been synced always has a new release.
    pub fn is_new(&self, task_id: &str, release_tag: &str) -> bool {
        self.marker(task_id)
            .is_none_or(|marker| marker.tag != release_tag)
    }

    /// Stores the marker and rewrites the state file. The in-memory store only changes once the
    /// file has been replaced.
    pub fn record(
        &mut self,
        task_id: &str,
        release_tag: &str,
        assets: Vec<String>,
    ) -> SyncResult<()> {
        let mut markers = self.markers.clone();
        markers.insert(
            task_id.to_string(),
            ReleaseMarker {
                tag: release_tag.to_string(),
                synced_at: Utc::now(),
                assets,
            },
        );
        self.save(&markers)?;
        self.markers = markers;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Writes to a temporary file in the same directory, then renames it over the old file so an
    /// interrupted write never leaves a truncated state file behind.
    fn save(&self, markers: &BTreeMap<String, ReleaseMarker>) -> SyncResult<()> {
        let file = StateFile {
            version: STATE_FORMAT_VERSION,
            tasks: markers.clone(),
        };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| SyncError::Io(std::io::Error::other(e)))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| SyncError::Io(e.error))?;

        tracing::debug!("State written to {}", self.path.display());
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct LockInfo {
    pid: u32,
    started_at: DateTime<Utc>,
}

/// Exclusive marker that a run owns the state file. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Fails when another run holds the lock, unless that lock is older than `stale_after`, in
    /// which case it is assumed to belong to a crashed run and taken over.
    pub fn acquire(path: &Path, stale_after: chrono::Duration) -> SyncResult<Self> {
        match Self::try_create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let age = lock_age(path);
                if age.is_some_and(|age| age < stale_after) {
                    let holder = fs::read_to_string(path)
                        .ok()
                        .and_then(|c| serde_json::from_str::<LockInfo>(&c).ok())
                        .map(|info| format!(" (pid {}, started {})", info.pid, info.started_at))
                        .unwrap_or_default();
                    return Err(SyncError::Config(format!(
                        "Another run is in progress{holder}; lock file: {}",
                        path.display()
                    )));
                }

                tracing::warn!("Taking over stale lock file {}", path.display());
                fs::remove_file(path).or_else(|e| match e.kind() {
                    ErrorKind::NotFound => Ok(()),
                    _ => Err(e),
                })?;
                Self::try_create(path).map_err(|e| {
                    SyncError::Config(format!("Cannot create lock file {}: {e}", path.display()))
                })
            }
            Err(e) => Err(SyncError::Config(format!(
                "Cannot create lock file {}: {e}",
                path.display()
            ))),
        }
    }

    fn try_create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        let content = serde_json::to_string(&info).map_err(std::io::Error::other)?;
        file.write_all(content.as_bytes())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

/// Age of the lock from its modification time; `None` if it cannot be determined.
fn lock_age(path: &Path) -> Option<chrono::Duration> {
    let modified: DateTime<Utc> = fs::metadata(path).ok()?.modified().ok()?.into();
    Some(Utc::now().signed_duration_since(modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TASK: &str = "https://github.com/owner/tool/releases/latest";

    #[test]
    fn test_missing_state_file_is_empty_store() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let store = StateStore::load(&tmp_dir.path().join("sync_state.json"))?;
        assert!(store.is_empty());
        assert!(store.is_new(TASK, "v1.0.0"));
        Ok(())
    }

    #[test]
    fn test_record_then_reload() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("sync_state.json");

        let mut store = StateStore::load(&path)?;
        store.record(TASK, "v1.2.0", vec!["tool.apk".to_string()])?;
        assert!(!store.is_new(TASK, "v1.2.0"));
        assert!(store.is_new(TASK, "v1.3.0"));

        let reloaded = StateStore::load(&path)?;
        assert_eq!(reloaded.len(), 1);
        let marker = reloaded.marker(TASK).unwrap();
        assert_eq!(marker.tag, "v1.2.0");
        assert_eq!(marker.assets, vec!["tool.apk"]);
        assert!(!reloaded.is_new(TASK, "v1.2.0"));
        Ok(())
    }

    #[test]
    fn test_record_overwrites_previous_marker() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("sync_state.json");
        let mut store = StateStore::load(&path)?;
        store.record(TASK, "v1", vec![])?;
        store.record(TASK, "v2", vec![])?;
        store.record("https://github.com/other/repo", "r1", vec![])?;

        let reloaded = StateStore::load(&path)?;
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.marker(TASK).unwrap().tag, "v2");

        // Only the state file itself remains, no leftover temporaries.
        let entries = fs::read_dir(tmp_dir.path())?.count();
        assert_eq!(entries, 1);
        Ok(())
    }

    #[test]
    fn test_corrupt_state_file_is_config_error() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("sync_state.json");
        fs::write(&path, "{ not json")?;
        let err = StateStore::load(&path).unwrap_err();
        assert!(err.is_fatal());
        Ok(())
    }

    #[test]
    fn test_failed_write_keeps_memory_unchanged() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("missing-dir").join("sync_state.json");
        let mut store = StateStore::load(&path)?;
        assert!(store.record(TASK, "v1", vec![]).is_err());
        assert!(store.is_new(TASK, "v1"));
        Ok(())
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("sync_state.json.lock");
        let stale_after = chrono::Duration::hours(6);

        let lock = RunLock::acquire(&path, stale_after)?;
        assert!(path.exists());

        let err = RunLock::acquire(&path, stale_after).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Another run is in progress"));

        drop(lock);
        assert!(!path.exists());
        let _again = RunLock::acquire(&path, stale_after)?;
        Ok(())
    }

    #[test]
    fn test_stale_lock_is_taken_over() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("sync_state.json.lock");
        fs::write(&path, "left behind by a crashed run")?;

        let lock = RunLock::acquire(&path, chrono::Duration::zero())?;
        let info: LockInfo = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(info.pid, std::process::id());
        drop(lock);
        Ok(())
    }
}
