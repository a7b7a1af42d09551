//! Tolerant reader and atomic writer for the lock file.
//!
//! The file is shared by every process working in the directory, and any of
//! them may be rewriting it at any moment. Readers therefore treat missing,
//! partial or malformed content as "no lock" rather than as an error.
//! Writers replace the file with a rename so readers never observe a torn
//! write from this process.
//!
//! Read-modify-write cycles are not serialized across processes. Two users
//! acting in the same instant can overwrite each other; the watcher surfaces
//! the winning record to everyone afterwards.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::{error::LockError, record::LockRecord};

/// Directory holding the lock file, relative to the shared root.
pub const LOCK_DIR: &str = ".penholder";

/// Lock file name inside [`LOCK_DIR`].
pub const LOCK_FILE: &str = "lock.json";

/// Handle to a lock file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Lock file at the well-known location under `root`.
    pub fn in_root(root: impl AsRef<Path>) -> Self {
        Self { path: root.as_ref().join(LOCK_DIR).join(LOCK_FILE) }
    }

    /// Lock file at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current record.
    ///
    /// Returns `Ok(None)` when the file is absent, empty, unparseable or
    /// structurally invalid.
    ///
    /// # Errors
    ///
    /// Returns `LockError::Io` only for I/O failures other than a missing
    /// file.
    pub fn load(&self) -> Result<Option<LockRecord>, LockError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let record: LockRecord = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "unreadable lock file, treating as unlocked");
                return Ok(None);
            },
        };

        if let Err(reason) = record.validate() {
            tracing::warn!(path = %self.path.display(), %reason, "malformed lock record, treating as unlocked");
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Replace the record on disk.
    ///
    /// # Errors
    ///
    /// Returns `LockError` if the directory cannot be created or the file
    /// cannot be written.
    pub fn store(&self, record: &LockRecord) -> Result<(), LockError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let json = serde_json::to_vec_pretty(record)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, &self.path)?;

        tracing::debug!(path = %self.path.display(), owner = %record.owner, "lock record written");
        Ok(())
    }

    /// Delete the lock file. Missing files are fine.
    ///
    /// # Errors
    ///
    /// Returns `LockError::Io` if removal fails for another reason.
    pub fn remove(&self) -> Result<(), LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use penholder_proto::Username;

    use super::*;

    fn name(raw: &str) -> Username {
        Username::new(raw).expect("valid username")
    }

    #[test]
    fn missing_file_is_no_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = LockFile::in_root(dir.path());
        assert_eq!(file.load().expect("load"), None);
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = LockFile::in_root(dir.path());
        let record = LockRecord::founded_by(name("alice"));

        file.store(&record).expect("store");
        assert_eq!(file.load().expect("load"), Some(record));
        assert!(file.path().ends_with(".penholder/lock.json"));
    }

    #[test]
    fn garbage_is_no_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = LockFile::at(dir.path().join("lock.json"));

        fs::write(file.path(), b"{\"owner\": \"ali").expect("write");
        assert_eq!(file.load().expect("load"), None);

        fs::write(file.path(), b"   \n").expect("write");
        assert_eq!(file.load().expect("load"), None);
    }

    #[test]
    fn owner_outside_users_is_no_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = LockFile::at(dir.path().join("lock.json"));

        fs::write(file.path(), br#"{"owner":"mallory","users":["alice"],"requests":[]}"#)
            .expect("write");
        assert_eq!(file.load().expect("load"), None);
    }

    #[test]
    fn remove_missing_is_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = LockFile::in_root(dir.path());
        assert!(file.remove().is_ok());
    }
}
