//! Durable repository backed by the SQLite store in `.civic/`.
//!
//! Exclusive sections are per-cell advisory lock files, so separate `civic`
//! processes sharing one store serialize their duplicate decisions too.

use super::{AwardStore, ConfirmWrite, IssueFilter, IssueStore};
use crate::db::{self, StorePaths};
use crate::error::StoreError;
use crate::geo::{
    Point, STORED_PRECISION, cell_precision_for_radius, covering_cells, haversine_meters,
    prefix_upper_bound,
};
use crate::lock::{CellLocks, SectionGuard};
use crate::model::{
    Category, Comment, CommentId, EventKind, Issue, IssueId, NewComment, NewIssue, PointAward,
    Priority, Status, UserId,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, OptionalExtension, Row, TransactionBehavior, params, params_from_iter,
    types::Value,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const ISSUE_COLUMNS: &str = "issue_id, title, description, latitude, longitude, geohash, \
     image_ref, category, priority, status, reporter_id, merged_into_id, \
     possible_duplicate_of, created_at_us, updated_at_us";

const OPEN_STATUSES_SQL: &str = "('submitted', 'under_review', 'in_progress')";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    locks: CellLocks,
}

impl SqliteStore {
    /// Open the store inside a `.civic/` directory, creating and migrating it as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(civic_dir: &Path) -> Result<Self> {
        let paths = StorePaths::new(civic_dir);
        let conn = db::open_store(&paths)?;
        Ok(Self::from_connection(conn, paths.locks()))
    }

    /// Wrap an already migrated connection.
    pub fn from_connection(conn: Connection, lock_dir: impl AsRef<Path>) -> Self {
        Self {
            conn: Mutex::new(conn),
            locks: CellLocks::new(lock_dir.as_ref()),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn now_us() -> i64 {
    Utc::now().timestamp_micros()
}

fn from_us(us: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_micros(us)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {us} out of range")))
}

fn parse_column<T: FromStr>(raw: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// Raw `issues` row before child tables are attached.
struct IssueRow {
    id: i64,
    title: String,
    description: String,
    lat: f64,
    lon: f64,
    geohash: String,
    image_ref: Option<String>,
    category: String,
    priority: String,
    status: String,
    reporter_id: String,
    merged_into_id: Option<i64>,
    possible_duplicate_of: Option<i64>,
    created_at_us: i64,
    updated_at_us: i64,
}

impl IssueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            lat: row.get(3)?,
            lon: row.get(4)?,
            geohash: row.get(5)?,
            image_ref: row.get(6)?,
            category: row.get(7)?,
            priority: row.get(8)?,
            status: row.get(9)?,
            reporter_id: row.get(10)?,
            merged_into_id: row.get(11)?,
            possible_duplicate_of: row.get(12)?,
            created_at_us: row.get(13)?,
            updated_at_us: row.get(14)?,
        })
    }

    fn into_issue(self, conn: &Connection) -> Result<Issue, StoreError> {
        let confirmer_ids = conn
            .prepare_cached(
                "SELECT user_id FROM issue_confirmers WHERE issue_id = ?1 \
                 ORDER BY created_at_us ASC, rowid ASC",
            )?
            .query_map([self.id], |row| row.get::<_, String>(0))?
            .map(|r| r.map(UserId::new))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let comment_ids = conn
            .prepare_cached(
                "SELECT comment_id FROM issue_comments WHERE issue_id = ?1 ORDER BY comment_id ASC",
            )?
            .query_map([self.id], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(CommentId))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Issue {
            id: IssueId(self.id),
            title: self.title,
            description: self.description,
            location: Point::new(self.lat, self.lon),
            geohash: self.geohash,
            image_ref: self.image_ref,
            category: parse_column(&self.category)?,
            priority: parse_column(&self.priority)?,
            status: parse_column(&self.status)?,
            reporter_id: UserId::new(self.reporter_id),
            confirmer_ids,
            merged_into_id: self.merged_into_id.map(IssueId),
            possible_duplicate_of: self.possible_duplicate_of.map(IssueId),
            comment_ids,
            created_at: from_us(self.created_at_us)?,
            updated_at: from_us(self.updated_at_us)?,
        })
    }
}

fn load_issue(conn: &Connection, id: IssueId) -> Result<Option<Issue>, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE issue_id = ?1"),
            [id.0],
            IssueRow::from_row,
        )
        .optional()?;
    row.map(|r| r.into_issue(conn)).transpose()
}

fn load_rows(
    conn: &Connection,
    sql: &str,
    values: Vec<Value>,
) -> Result<Vec<IssueRow>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), IssueRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn status_of(conn: &Connection, id: IssueId) -> Result<(Status, String), StoreError> {
    let (status, reporter): (String, String) = conn
        .query_row(
            "SELECT status, reporter_id FROM issues WHERE issue_id = ?1",
            [id.0],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or(StoreError::MissingIssue(id))?;
    Ok((parse_column(&status)?, reporter))
}

fn award_from_row(row: &Row<'_>) -> rusqlite::Result<(String, i64, String, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

impl IssueStore for SqliteStore {
    fn create_issue(&self, new: &NewIssue) -> Result<Issue, StoreError> {
        let geohash = new
            .location
            .geohash(STORED_PRECISION)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let conn = self.conn()?;
        let now = now_us();
        conn.execute(
            "INSERT INTO issues (title, description, latitude, longitude, geohash, image_ref,
                                 category, priority, status, reporter_id,
                                 possible_duplicate_of, created_at_us, updated_at_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'submitted', ?9, ?10, ?11, ?11)",
            params![
                new.title,
                new.description,
                new.location.lat,
                new.location.lon,
                geohash,
                new.image_ref,
                new.category.as_str(),
                new.priority.as_str(),
                new.reporter_id.as_str(),
                new.possible_duplicate_of.map(|id| id.0),
                now,
            ],
        )?;
        let id = IssueId(conn.last_insert_rowid());
        load_issue(&conn, id)?.ok_or(StoreError::MissingIssue(id))
    }

    fn get_issue(&self, id: IssueId) -> Result<Option<Issue>, StoreError> {
        let conn = self.conn()?;
        load_issue(&conn, id)
    }

    fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>, StoreError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(status) = filter.status {
            values.push(Value::Text(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(category) = filter.category {
            values.push(Value::Text(category.as_str().to_string()));
            clauses.push(format!("category = ?{}", values.len()));
        }
        if let Some(reporter) = &filter.reporter {
            values.push(Value::Text(reporter.as_str().to_string()));
            clauses.push(format!("reporter_id = ?{}", values.len()));
        }
        if filter.open_only {
            clauses.push(format!("status IN {OPEN_STATUSES_SQL}"));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let limit_clause = filter.limit.map_or_else(String::new, |limit| {
            values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
            format!(" LIMIT ?{}", values.len())
        });

        let sql =
            format!("SELECT {ISSUE_COLUMNS} FROM issues{where_clause} ORDER BY issue_id ASC{limit_clause}");
        let conn = self.conn()?;
        load_rows(&conn, &sql, values)?
            .into_iter()
            .map(|row| row.into_issue(&conn))
            .collect()
    }

    fn open_near(
        &self,
        point: Point,
        radius_m: f64,
        category: Option<Category>,
    ) -> Result<Vec<Issue>, StoreError> {
        let cells = covering_cells(point, radius_m, cell_precision_for_radius(radius_m))
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let category_clause = if category.is_some() {
            " AND category = ?3"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues \
             WHERE status IN {OPEN_STATUSES_SQL} AND geohash >= ?1 AND geohash < ?2{category_clause}"
        );

        let conn = self.conn()?;
        let mut hits = BTreeMap::new();
        for cell in cells {
            let mut values = vec![
                Value::Text(cell.clone()),
                Value::Text(prefix_upper_bound(&cell)),
            ];
            if let Some(category) = category {
                values.push(Value::Text(category.as_str().to_string()));
            }
            for row in load_rows(&conn, &sql, values)? {
                if haversine_meters(point, Point::new(row.lat, row.lon)) <= radius_m {
                    hits.insert(row.id, row);
                }
            }
        }

        hits.into_values().map(|row| row.into_issue(&conn)).collect()
    }

    fn add_confirmer(&self, id: IssueId, user: &UserId) -> Result<ConfirmWrite, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (status, reporter) = status_of(&tx, id)?;

        let outcome = if !status.is_open() {
            ConfirmWrite::NotOpen
        } else if reporter == user.as_str() {
            ConfirmWrite::IsReporter
        } else {
            let now = now_us();
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO issue_confirmers (issue_id, user_id, created_at_us)
                 VALUES (?1, ?2, ?3)",
                params![id.0, user.as_str(), now],
            )?;
            if inserted == 0 {
                ConfirmWrite::AlreadyPresent
            } else {
                tx.execute(
                    "UPDATE issues SET updated_at_us = ?2 WHERE issue_id = ?1",
                    params![id.0, now],
                )?;
                ConfirmWrite::Added
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn raise_priority(&self, id: IssueId, at_least: Priority) -> Result<Priority, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: String = tx
            .query_row(
                "SELECT priority FROM issues WHERE issue_id = ?1",
                [id.0],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::MissingIssue(id))?;
        let current: Priority = parse_column(&current)?;

        let stored = current.max(at_least);
        if stored > current {
            tx.execute(
                "UPDATE issues SET priority = ?2, updated_at_us = ?3 WHERE issue_id = ?1",
                params![id.0, stored.as_str(), now_us()],
            )?;
        }
        tx.commit()?;
        Ok(stored)
    }

    fn set_category(&self, id: IssueId, category: Category) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE issues SET category = ?2, updated_at_us = ?3 WHERE issue_id = ?1",
            params![id.0, category.as_str(), now_us()],
        )?;
        if changed == 0 {
            return Err(StoreError::MissingIssue(id));
        }
        Ok(())
    }

    fn set_status(&self, id: IssueId, from: Status, to: Status) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (current, _) = status_of(&tx, id)?;
        if current != from {
            return Ok(false);
        }
        tx.execute(
            "UPDATE issues SET status = ?2, updated_at_us = ?3 WHERE issue_id = ?1",
            params![id.0, to.as_str(), now_us()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn mark_merged(&self, id: IssueId, into: IssueId) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        status_of(&tx, into)?;
        let (current, _) = status_of(&tx, id)?;
        if !current.is_open() || id == into {
            return Ok(false);
        }
        tx.execute(
            "UPDATE issues SET status = 'merged', merged_into_id = ?2, updated_at_us = ?3
             WHERE issue_id = ?1",
            params![id.0, into.0, now_us()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn append_comment(&self, new: &NewComment) -> Result<Comment, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        status_of(&tx, new.issue_id)?;
        let now = now_us();
        tx.execute(
            "INSERT INTO issue_comments (issue_id, author_id, body, created_at_us)
             VALUES (?1, ?2, ?3, ?4)",
            params![new.issue_id.0, new.author_id.as_str(), new.text, now],
        )?;
        let id = CommentId(tx.last_insert_rowid());
        tx.execute(
            "UPDATE issues SET updated_at_us = ?2 WHERE issue_id = ?1",
            params![new.issue_id.0, now],
        )?;
        tx.commit()?;

        Ok(Comment {
            id,
            issue_id: new.issue_id,
            author_id: new.author_id.clone(),
            text: new.text.clone(),
            created_at: from_us(now)?,
        })
    }

    fn comments_for(&self, id: IssueId) -> Result<Vec<Comment>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT comment_id, author_id, body, created_at_us FROM issue_comments
             WHERE issue_id = ?1 ORDER BY comment_id ASC",
        )?;
        let rows = stmt
            .query_map([id.0], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(comment_id, author, text, created_at_us)| {
                Ok(Comment {
                    id: CommentId(comment_id),
                    issue_id: id,
                    author_id: UserId::new(author),
                    text,
                    created_at: from_us(created_at_us)?,
                })
            })
            .collect()
    }

    fn enter_section(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<SectionGuard, StoreError> {
        Ok(self.locks.enter(keys, timeout)?)
    }
}

impl AwardStore for SqliteStore {
    fn insert_award_if_absent(&self, award: &PointAward) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO point_awards (user_id, issue_id, event_kind, amount, created_at_us)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                award.user_id.as_str(),
                award.issue_id.0,
                award.event_kind.as_str(),
                award.amount,
                award.created_at.timestamp_micros(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn total_for(&self, user: &UserId) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM point_awards WHERE user_id = ?1",
            [user.as_str()],
            |row| row.get(0),
        )?)
    }

    fn awards_for(&self, user: &UserId) -> Result<Vec<PointAward>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT user_id, issue_id, event_kind, amount, created_at_us FROM point_awards
             WHERE user_id = ?1 ORDER BY created_at_us ASC, issue_id ASC",
        )?;
        let rows = stmt
            .query_map([user.as_str()], award_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(user_id, issue_id, kind, amount, created_at_us)| {
                Ok(PointAward {
                    user_id: UserId::new(user_id),
                    issue_id: IssueId(issue_id),
                    event_kind: parse_column::<EventKind>(&kind)?,
                    amount,
                    created_at: from_us(created_at_us)?,
                })
            })
            .collect()
    }

    fn leaderboard(&self, limit: usize) -> Result<Vec<(UserId, i64)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT user_id, SUM(amount) AS total FROM point_awards
             GROUP BY user_id ORDER BY total DESC, user_id ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok((UserId::new(row.get::<_, String>(0)?), row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = SqliteStore::open(&dir.path().join(".civic")).expect("open store");
        (dir, store)
    }

    fn new_issue(lat: f64, lon: f64, reporter: &str) -> NewIssue {
        NewIssue {
            title: "Pothole".into(),
            description: "deep one".into(),
            location: Point::new(lat, lon),
            image_ref: Some("img/abc.jpg".into()),
            category: Category::Roads,
            priority: Priority::Medium,
            reporter_id: UserId::new(reporter),
            possible_duplicate_of: None,
        }
    }

    #[test]
    fn create_and_reload_issue() {
        let (_dir, store) = store();
        let created = store.create_issue(&new_issue(40.0, -75.0, "ana")).unwrap();
        let loaded = store.get_issue(created.id).unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.status, Status::Submitted);
        assert_eq!(loaded.image_ref.as_deref(), Some("img/abc.jpg"));
        assert_eq!(loaded.geohash.len(), STORED_PRECISION);
    }

    #[test]
    fn open_near_uses_radius_and_open_states() {
        let (_dir, store) = store();
        let near = store.create_issue(&new_issue(40.0, -75.0, "ana")).unwrap();
        let resolved = store
            .create_issue(&new_issue(40.00002, -75.0, "ben"))
            .unwrap();
        store.create_issue(&new_issue(40.01, -75.0, "cy")).unwrap();
        for (from, to) in [
            (Status::Submitted, Status::UnderReview),
            (Status::UnderReview, Status::InProgress),
            (Status::InProgress, Status::Resolved),
        ] {
            assert!(store.set_status(resolved.id, from, to).unwrap());
        }

        let found = store
            .open_near(Point::new(40.0, -75.0), 150.0, Some(Category::Roads))
            .unwrap();
        assert_eq!(found.iter().map(|i| i.id).collect::<Vec<_>>(), [near.id]);
    }

    #[test]
    fn confirmers_keep_order_and_reject_reporter() {
        let (_dir, store) = store();
        let issue = store.create_issue(&new_issue(40.0, -75.0, "ana")).unwrap();
        for user in ["ben", "cy"] {
            assert_eq!(
                store.add_confirmer(issue.id, &UserId::new(user)).unwrap(),
                ConfirmWrite::Added
            );
        }
        assert_eq!(
            store.add_confirmer(issue.id, &UserId::new("ben")).unwrap(),
            ConfirmWrite::AlreadyPresent
        );
        assert_eq!(
            store.add_confirmer(issue.id, &UserId::new("ana")).unwrap(),
            ConfirmWrite::IsReporter
        );
        let loaded = store.get_issue(issue.id).unwrap().unwrap();
        assert_eq!(loaded.confirmer_ids, vec![UserId::new("ben"), UserId::new("cy")]);
    }

    #[test]
    fn merge_sets_back_reference_and_closes_confirmations() {
        let (_dir, store) = store();
        let a = store.create_issue(&new_issue(40.0, -75.0, "ana")).unwrap();
        let b = store.create_issue(&new_issue(40.0, -75.0, "ben")).unwrap();
        assert!(store.mark_merged(b.id, a.id).unwrap());
        assert!(!store.mark_merged(b.id, a.id).unwrap());
        assert_eq!(
            store.add_confirmer(b.id, &UserId::new("cy")).unwrap(),
            ConfirmWrite::NotOpen
        );
        let merged = store.get_issue(b.id).unwrap().unwrap();
        assert_eq!(merged.merged_into_id, Some(a.id));
        assert!(matches!(
            store.mark_merged(a.id, IssueId(404)),
            Err(StoreError::MissingIssue(IssueId(404)))
        ));
    }

    #[test]
    fn list_filters_and_limit() {
        let (_dir, store) = store();
        for reporter in ["ana", "ben", "ana"] {
            store.create_issue(&new_issue(40.0, -75.0, reporter)).unwrap();
        }
        let ana = store
            .list_issues(&IssueFilter {
                reporter: Some(UserId::new("ana")),
                ..IssueFilter::default()
            })
            .unwrap();
        assert_eq!(ana.len(), 2);

        let limited = store
            .list_issues(&IssueFilter {
                open_only: true,
                limit: Some(1),
                ..IssueFilter::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, IssueId(1));
    }

    #[test]
    fn priority_comments_and_awards_roundtrip() {
        let (_dir, store) = store();
        let issue = store.create_issue(&new_issue(40.0, -75.0, "ana")).unwrap();
        assert_eq!(
            store.raise_priority(issue.id, Priority::Critical).unwrap(),
            Priority::Critical
        );
        assert_eq!(
            store.raise_priority(issue.id, Priority::Low).unwrap(),
            Priority::Critical
        );

        let comment = store
            .append_comment(&NewComment {
                issue_id: issue.id,
                author_id: UserId::new("ben"),
                text: "still there".into(),
            })
            .unwrap();
        assert_eq!(store.comments_for(issue.id).unwrap(), vec![comment.clone()]);
        assert_eq!(
            store.get_issue(issue.id).unwrap().unwrap().comment_ids,
            vec![comment.id]
        );

        let award = PointAward {
            user_id: UserId::new("ana"),
            issue_id: issue.id,
            event_kind: EventKind::Submit,
            amount: 10,
            created_at: Utc::now(),
        };
        assert!(store.insert_award_if_absent(&award).unwrap());
        assert!(!store.insert_award_if_absent(&award).unwrap());
        assert_eq!(store.total_for(&UserId::new("ana")).unwrap(), 10);
        assert_eq!(store.awards_for(&UserId::new("ana")).unwrap().len(), 1);
        assert_eq!(store.total_for(&UserId::new("nobody")).unwrap(), 0);
    }
}
