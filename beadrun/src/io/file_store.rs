//! JSON document bead store (`.beads/beads.json`).

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, anyhow};
use tracing::{debug, warn};

use crate::core::types::{Bead, BeadId, BeadStatus, NewBead};
use crate::io::store::{BeadFilter, BeadSet, BeadStore, StoreError, StoreResult};

/// Bead store persisted as one JSON document.
///
/// Every mutation is a read-modify-write of the whole file, finished with an
/// atomic rename. On unix the read-modify-write holds an exclusive `flock` on
/// a sibling `beads.json.lock`, and reads hold a shared one, so separate
/// handles and separate processes see each compare-and-set as one step.
/// Statuses written here are the only state a later run needs to resume.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| StoreError::Backend(anyhow!("file store lock poisoned")))
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    /// Open the lock file and take the advisory lock. Dropping the file releases it.
    fn lock_file(&self, mode: LockMode) -> StoreResult<File> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))
                .map_err(StoreError::Backend)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("open lock file {}", lock_path.display()))
            .map_err(StoreError::Backend)?;
        flock(&file, mode)
            .with_context(|| format!("lock {}", lock_path.display()))
            .map_err(StoreError::Backend)?;
        Ok(file)
    }

    fn read(&self) -> StoreResult<BeadSet> {
        load_bead_set(&self.path).map_err(StoreError::Backend)
    }

    fn modify<T>(&self, apply: impl FnOnce(&mut BeadSet) -> StoreResult<T>) -> StoreResult<T> {
        let _guard = self.guard()?;
        let _lock = self.lock_file(LockMode::Exclusive)?;
        let mut set = self.read()?;
        let value = apply(&mut set)?;
        write_bead_set(&self.path, &set).map_err(StoreError::Backend)?;
        Ok(value)
    }
}

impl BeadStore for FileStore {
    fn create(&self, bead: NewBead) -> StoreResult<BeadId> {
        self.modify(|set| set.create(bead))
    }

    fn get(&self, id: &str) -> StoreResult<Bead> {
        let _guard = self.guard()?;
        let _lock = self.lock_file(LockMode::Shared)?;
        self.read()?.get(id)
    }

    fn list(&self, filter: &BeadFilter) -> StoreResult<Vec<Bead>> {
        let _guard = self.guard()?;
        let _lock = self.lock_file(LockMode::Shared)?;
        Ok(self.read()?.list(filter))
    }

    fn update_status(
        &self,
        id: &str,
        expected: BeadStatus,
        next: BeadStatus,
        reason: Option<&str>,
    ) -> StoreResult<Bead> {
        debug!(id, %expected, %next, "updating bead status");
        self.modify(|set| set.update_status(id, expected, next, reason))
    }

    fn add_dependency(&self, id: &str, depends_on: &str) -> StoreResult<()> {
        self.modify(|set| set.add_dependency(id, depends_on))
    }
}

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn flock(file: &File, mode: LockMode) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let op = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    };
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

// Non-unix handles only serialize through their own mutex.
#[cfg(not(unix))]
fn flock(_file: &File, _mode: LockMode) -> std::io::Result<()> {
    Ok(())
}

/// Load a bead document. A missing file is an empty store.
pub fn load_bead_set(path: &Path) -> anyhow::Result<BeadSet> {
    if !path.exists() {
        return Ok(BeadSet::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read beads {}", path.display()))?;
    let mut set: BeadSet = serde_json::from_str(&contents)
        .with_context(|| format!("parse beads {}", path.display()))?;
    set.beads.sort_by(|a, b| a.id.cmp(&b.id));
    let dangling = set.dangling_dependencies();
    if !dangling.is_empty() {
        warn!(path = %path.display(), ?dangling, "bead document references unknown dependencies");
    }
    Ok(set)
}

/// Atomically write a bead document (temp file + rename).
pub fn write_bead_set(path: &Path, set: &BeadSet) -> anyhow::Result<()> {
    let mut buf = serde_json::to_string_pretty(set).context("serialize beads")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("beads path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp beads {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace beads {}", path.display()))?;
    Ok(())
}
