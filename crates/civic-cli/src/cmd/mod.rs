pub mod comment;
pub mod completions;
pub mod confirm;
pub mod init;
pub mod list;
pub mod merge;
pub mod nearby;
pub mod points;
pub mod set;
pub mod show;
pub mod status;
pub mod submit;

use crate::http_classifier::HttpClassifier;
use crate::output::CliError;
use anyhow::Context as _;
use civic_core::classify::{Classifier, KeywordClassifier, NoopClassifier};
use civic_core::config::{ClassifierConfig, ClassifierMode, ProjectConfig, load_project_config};
use civic_core::error::ErrorCode;
use civic_core::ledger::Ledger;
use civic_core::lifecycle::Lifecycle;
use civic_core::model::IssueId;
use civic_core::store::SqliteStore;
use civic_match::Resolver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Name of the project directory created by `civic init`.
pub const CIVIC_DIR: &str = ".civic";

/// Find the `.civic` directory by walking up from `start`.
pub fn find_civic_dir(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(CIVIC_DIR);
        if candidate.is_dir() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// An opened project: its configuration and durable store.
pub struct Project {
    pub config: ProjectConfig,
    pub store: Arc<SqliteStore>,
}

impl Project {
    pub fn open(start: &Path) -> anyhow::Result<Self> {
        let civic_dir = find_civic_dir(start).ok_or_else(|| {
            let code = ErrorCode::NotInitialized;
            CliError::with_details(
                format!("{}: {CIVIC_DIR} directory not found", code.message()),
                code.hint().unwrap_or_default(),
                code.code(),
            )
        })?;
        let root = civic_dir.parent().unwrap_or(start);
        let config = load_project_config(root)?;
        let store = SqliteStore::open(&civic_dir)
            .with_context(|| format!("failed to open store in {}", civic_dir.display()))?;
        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::new(self.store.clone(), self.config.points)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::new(self.store.clone(), self.ledger())
    }

    pub fn resolver(&self) -> anyhow::Result<Resolver> {
        let classifier = build_classifier(&self.config.classifier);
        Ok(Resolver::new(
            self.store.clone(),
            self.ledger(),
            classifier,
            &self.config,
        )?)
    }
}

fn build_classifier(config: &ClassifierConfig) -> Arc<dyn Classifier> {
    match (config.mode, config.url.as_deref()) {
        (ClassifierMode::Http, Some(url)) => Arc::new(HttpClassifier::new(
            url,
            Duration::from_millis(config.timeout_ms),
        )),
        (ClassifierMode::Keyword, _) => Arc::new(KeywordClassifier),
        (ClassifierMode::None | ClassifierMode::Http, _) => Arc::new(NoopClassifier),
    }
}

/// Parse `7` or `#7` into an issue id.
pub fn parse_issue_id(raw: &str) -> Result<IssueId, String> {
    raw.parse::<IssueId>().map_err(|e| e.to_string())
}
