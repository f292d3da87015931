use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current state directory format version. Incremented on incompatible layout changes.
pub const STATE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout for the Strata state directory.
///
/// Holds build records, the staging area used by the host backend as its
/// build context, and the lock file. Subdirectories are created lazily on
/// [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateVersion {
    format_version: u32,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn records_dir(&self) -> PathBuf {
        self.root.join("records")
    }

    #[inline]
    pub fn record_path(&self, recipe_id: &str) -> PathBuf {
        self.records_dir().join(format!("{recipe_id}.json"))
    }

    /// Per-recipe build context for the host backend.
    #[inline]
    pub fn staging_dir(&self, recipe_id: &str) -> PathBuf {
        self.root.join("staging").join(recipe_id)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn is_initialized(&self) -> bool {
        self.root.join(VERSION_FILE).exists()
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.records_dir())?;
        fs::create_dir_all(self.root.join("staging"))?;

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StateVersion {
                format_version: STATE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(&self.root)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&self.root)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let content = fs::read_to_string(self.root.join(VERSION_FILE))?;
        let ver: StateVersion = serde_json::from_str(&content)?;

        if ver.format_version != STATE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STATE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StateLayout::new("/tmp/strata-test");
        assert_eq!(layout.records_dir(), PathBuf::from("/tmp/strata-test/records"));
        assert_eq!(
            layout.record_path("abc123"),
            PathBuf::from("/tmp/strata-test/records/abc123.json")
        );
        assert_eq!(
            layout.staging_dir("abc123"),
            PathBuf::from("/tmp/strata-test/staging/abc123")
        );
        assert_eq!(layout.lock_file(), PathBuf::from("/tmp/strata-test/.lock"));
    }

    #[test]
    fn initialize_creates_directories_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        assert!(!layout.is_initialized());
        layout.initialize().unwrap();

        assert!(layout.records_dir().is_dir());
        assert!(layout.is_initialized());
        layout.verify_version().unwrap();
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        layout.verify_version().unwrap();
    }

    #[test]
    fn rejects_future_format_version() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.initialize().unwrap();
        fs::write(dir.path().join(VERSION_FILE), r#"{"format_version": 99}"#).unwrap();
        assert!(matches!(
            layout.initialize(),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }
}
