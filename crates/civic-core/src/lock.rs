//! Keyed exclusive sections for the resolver's classify-then-commit step.
//!
//! Two flavours share one guard type:
//! - [`KeyedSections`] serializes threads of one process. All keys of a
//!   request are taken atomically, so overlapping key sets cannot deadlock.
//! - [`CellLocks`] takes one advisory file lock per key under a directory,
//!   in sorted key order, so separate `civic` processes serialize as well.
//!
//! Both release on drop.
//!
//! Lock files are left in place after release, one per cell ever touched.
//! Every file section also holds a shared lock on a gate file for its whole
//! lifetime; [`CellLocks::prune`] takes the gate exclusively, so it only
//! deletes cell files once no process is holding or waiting on any of them.

use crate::error::ErrorCode;
use fs2::FileExt;
use std::{
    collections::BTreeSet,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

/// Exclusive-section errors.
#[derive(Debug)]
pub enum LockError {
    Timeout { resource: String, waited: Duration },
    IoError(io::Error),
}

impl From<io::Error> for LockError {
    fn from(err: io::Error) -> Self {
        Self::IoError(err)
    }
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::IoError(_) => ErrorCode::StoreWriteFailed,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { resource, waited } => {
                write!(
                    f,
                    "{}: section '{}' still held after {:?}",
                    self.code().code(),
                    resource,
                    waited
                )
            }
            Self::IoError(err) => write!(f, "{}: {}", self.code().code(), err),
        }
    }
}

impl std::error::Error for LockError {}

/// RAII guard for an exclusive section over a set of keys.
#[must_use = "the section is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SectionGuard {
    keys: Vec<String>,
    _held: Held,
}

#[derive(Debug)]
enum Held {
    Keyed(KeyedGuard),
    Files(FileSection),
}

/// Cell locks plus the shared gate. Cells drop (unlock) before the gate.
#[derive(Debug)]
struct FileSection {
    _cells: Vec<FileGuard>,
    _gate: FileGuard,
}

impl SectionGuard {
    /// Keys covered by this section, sorted.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Explicitly release the section. Release also happens automatically on drop.
    pub fn release(self) {
        drop(self);
    }
}

fn sorted_keys(keys: &[String]) -> Vec<String> {
    keys.iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// In-process table of held keys.
#[derive(Debug, Default)]
pub struct KeyedSections {
    held: Mutex<BTreeSet<String>>,
    released: Condvar,
}

impl KeyedSections {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait until none of `keys` is held, then hold all of them.
    pub fn enter(self: &Arc<Self>, keys: &[String], timeout: Duration) -> Result<SectionGuard, LockError> {
        let keys = sorted_keys(keys);
        let start = Instant::now();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if let Some(busy) = keys.iter().find(|k| held.contains(*k)) {
                let waited = start.elapsed();
                let Some(remaining) = timeout.checked_sub(waited).filter(|d| !d.is_zero()) else {
                    return Err(LockError::Timeout {
                        resource: busy.clone(),
                        waited,
                    });
                };
                held = self
                    .released
                    .wait_timeout(held, remaining)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
                continue;
            }

            held.extend(keys.iter().cloned());
            return Ok(SectionGuard {
                keys: keys.clone(),
                _held: Held::Keyed(KeyedGuard {
                    sections: Arc::clone(self),
                    keys,
                }),
            });
        }
    }

    /// Number of keys currently held.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[derive(Debug)]
struct KeyedGuard {
    sections: Arc<KeyedSections>,
    keys: Vec<String>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        let mut held = self
            .sections
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.sections.released.notify_all();
    }
}

#[derive(Debug)]
struct FileGuard {
    file: File,
}

type TryLock = fn(&File) -> io::Result<()>;

impl FileGuard {
    fn acquire(
        path: &Path,
        resource: &str,
        try_lock: TryLock,
        deadline: Instant,
        start: Instant,
    ) -> Result<Self, LockError> {
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)?;

            if try_lock(&file).is_ok() {
                return Ok(Self { file });
            }

            if Instant::now() >= deadline {
                return Err(LockError::Timeout {
                    resource: resource.to_string(),
                    waited: start.elapsed(),
                });
            }

            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Gate file shared by every section and taken exclusively by pruning.
const GATE_FILE: &str = "gate";

/// Advisory per-key lock files under one directory.
#[derive(Debug, Clone)]
pub struct CellLocks {
    dir: PathBuf,
}

impl CellLocks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.lock"))
    }

    fn gate_path(&self) -> PathBuf {
        self.dir.join(GATE_FILE)
    }

    /// Lock every key in sorted order, sharing one deadline.
    pub fn enter(&self, keys: &[String], timeout: Duration) -> Result<SectionGuard, LockError> {
        fs::create_dir_all(&self.dir)?;

        let keys = sorted_keys(keys);
        let start = Instant::now();
        let deadline = start + timeout;
        let gate = FileGuard::acquire(
            &self.gate_path(),
            GATE_FILE,
            FileExt::try_lock_shared,
            deadline,
            start,
        )?;
        let mut cells = Vec::with_capacity(keys.len());
        for key in &keys {
            // Earlier guards unlock on the error path when `cells` drops.
            cells.push(FileGuard::acquire(
                &self.path_for(key),
                key,
                FileExt::try_lock_exclusive,
                deadline,
                start,
            )?);
        }

        Ok(SectionGuard {
            keys,
            _held: Held::Files(FileSection {
                _cells: cells,
                _gate: gate,
            }),
        })
    }

    /// Delete every cell lock file, waiting up to `timeout` for in-flight
    /// sections to finish. Returns how many files were removed.
    pub fn prune(&self, timeout: Duration) -> Result<usize, LockError> {
        if !self.dir.is_dir() {
            return Ok(0);
        }

        let start = Instant::now();
        let _gate = FileGuard::acquire(
            &self.gate_path(),
            GATE_FILE,
            FileExt::try_lock_exclusive,
            start + timeout,
            start,
        )?;

        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "lock") {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
