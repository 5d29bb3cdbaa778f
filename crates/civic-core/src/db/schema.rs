//! Canonical SQLite schema for the civic issue store.
//!
//! - `issues` holds the latest state of every issue plus its stored geohash
//! - `issue_confirmers` and `issue_comments` are append-mostly child tables
//! - `point_awards` is keyed by `(user_id, issue_id, event_kind)` so awards are
//!   inserted with `INSERT OR IGNORE`
//! - `store_meta` records the schema version alongside `PRAGMA user_version`

/// Migration v1: issues, confirmers, comments, awards and store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS issues (
    issue_id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL CHECK (length(trim(title)) > 0),
    description TEXT NOT NULL DEFAULT '',
    latitude REAL NOT NULL CHECK (latitude BETWEEN -90.0 AND 90.0),
    longitude REAL NOT NULL CHECK (longitude BETWEEN -180.0 AND 180.0),
    geohash TEXT NOT NULL,
    image_ref TEXT,
    category TEXT NOT NULL DEFAULT 'unknown' CHECK (category IN (
        'roads', 'lighting', 'sanitation', 'water', 'graffiti',
        'parks', 'traffic', 'other', 'unknown'
    )),
    priority TEXT NOT NULL DEFAULT 'medium'
        CHECK (priority IN ('low', 'medium', 'high', 'critical')),
    status TEXT NOT NULL CHECK (status IN (
        'submitted', 'under_review', 'in_progress', 'resolved', 'closed', 'merged'
    )),
    reporter_id TEXT NOT NULL CHECK (length(trim(reporter_id)) > 0),
    merged_into_id INTEGER REFERENCES issues(issue_id),
    possible_duplicate_of INTEGER REFERENCES issues(issue_id),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    CHECK ((status = 'merged') = (merged_into_id IS NOT NULL)),
    CHECK (merged_into_id IS NULL OR merged_into_id <> issue_id)
);

CREATE TABLE IF NOT EXISTS issue_confirmers (
    issue_id INTEGER NOT NULL REFERENCES issues(issue_id) ON DELETE CASCADE,
    user_id TEXT NOT NULL CHECK (length(trim(user_id)) > 0),
    created_at_us INTEGER NOT NULL,
    PRIMARY KEY (issue_id, user_id)
);

CREATE TABLE IF NOT EXISTS issue_comments (
    comment_id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL REFERENCES issues(issue_id) ON DELETE CASCADE,
    author_id TEXT NOT NULL,
    body TEXT NOT NULL CHECK (length(trim(body)) > 0),
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS point_awards (
    user_id TEXT NOT NULL,
    issue_id INTEGER NOT NULL,
    event_kind TEXT NOT NULL CHECK (event_kind IN ('submit', 'confirm', 'resolved')),
    amount INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL,
    PRIMARY KEY (user_id, issue_id, event_kind)
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO store_meta (id, schema_version, created_at_us)
VALUES (1, 1, CAST(strftime('%s', 'now') AS INTEGER) * 1000000);
";

/// Migration v2: read-path indexes for radius queries, listings and awards.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_issues_status_geohash
    ON issues(status, geohash);

CREATE INDEX IF NOT EXISTS idx_issues_reporter
    ON issues(reporter_id, issue_id);

CREATE INDEX IF NOT EXISTS idx_issue_confirmers_user
    ON issue_confirmers(user_id, issue_id);

CREATE INDEX IF NOT EXISTS idx_issue_comments_issue_created
    ON issue_comments(issue_id, comment_id);

CREATE INDEX IF NOT EXISTS idx_point_awards_user_created
    ON point_awards(user_id, created_at_us);
";

/// Indexes expected after all migrations have run.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_issues_status_geohash",
    "idx_issues_reporter",
    "idx_issue_confirmers_user",
    "idx_issue_comments_issue_created",
    "idx_point_awards_user_created",
];
