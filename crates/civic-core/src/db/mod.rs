//! On-disk layout of a civic project and the SQLite connection behind it.
//!
//! ```text
//! .civic/
//!   civic.sqlite3   issues, confirmers, comments, awards
//!   locks/          one advisory lock file per geohash cell in use
//! ```
//!
//! Several `civic` processes may share one store. Connections run in WAL mode
//! with a busy timeout so short writer overlaps wait instead of failing, and
//! foreign keys are enforced so confirmers and comments never outlive their issue.

pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a connection waits on another process's write lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// File name of the store inside the `.civic/` directory.
pub const STORE_FILE_NAME: &str = "civic.sqlite3";

/// Directory under `.civic/` holding the per-cell section locks.
pub const LOCKS_DIR_NAME: &str = "locks";

/// Paths of one project's store, derived from its `.civic/` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub fn new(civic_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: civic_dir.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn database(&self) -> PathBuf {
        self.root.join(STORE_FILE_NAME)
    }

    #[must_use]
    pub fn locks(&self) -> PathBuf {
        self.root.join(LOCKS_DIR_NAME)
    }

    /// Create `.civic/` and its lock directory if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if either directory cannot be created.
    pub fn ensure(&self) -> Result<()> {
        let locks = self.locks();
        std::fs::create_dir_all(&locks)
            .with_context(|| format!("create lock directory {}", locks.display()))
    }
}

/// Lay out `.civic/`, open the database and bring its schema up to date.
///
/// # Errors
///
/// Returns an error if the directories cannot be created or the database
/// cannot be opened, configured or migrated.
pub fn open_store(paths: &StorePaths) -> Result<Connection> {
    paths.ensure()?;

    let path = paths.database();
    let mut conn =
        Connection::open(&path).with_context(|| format!("open store {}", path.display()))?;

    conn.pragma_update(None, "foreign_keys", "ON")
        .and_then(|()| conn.pragma_update(None, "synchronous", "NORMAL"))
        .and_then(|()| conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0)))
        .and_then(|_| conn.busy_timeout(DEFAULT_BUSY_TIMEOUT))
        .context("configure store connection")?;

    let version = migrations::migrate(&mut conn).context("migrate store schema")?;
    tracing::debug!(path = %path.display(), version, "store opened");
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_lays_out_the_project_directory() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path().join(".civic"));
        assert!(!paths.root().exists());

        let _conn = open_store(&paths).unwrap();
        assert!(paths.database().is_file());
        assert!(paths.locks().is_dir());
        assert_eq!(paths.database().file_name().unwrap(), STORE_FILE_NAME);
    }

    #[test]
    fn connection_is_shared_process_safe() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_store(&StorePaths::new(dir.path())).unwrap();

        let journal: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert!(journal.eq_ignore_ascii_case("wal"));
        let busy_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(u128::from(busy_ms), DEFAULT_BUSY_TIMEOUT.as_millis());
    }

    #[test]
    fn reopening_is_idempotent_and_foreign_keys_hold() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path());
        {
            let conn = open_store(&paths).unwrap();
            let orphan = conn.execute(
                "INSERT INTO issue_confirmers (issue_id, user_id, created_at_us) VALUES (999, 'ben', 0)",
                [],
            );
            assert!(orphan.is_err(), "confirmer without an issue must be rejected");
        }

        let conn = open_store(&paths).unwrap();
        assert_eq!(
            migrations::current_schema_version(&conn).unwrap(),
            migrations::LATEST_SCHEMA_VERSION
        );
    }
}
