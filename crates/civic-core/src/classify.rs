//! Contract for the categorization/priority collaborator.
//!
//! The engine only sees `classify(title, description)`. Failures never
//! propagate: [`classify_or_default`] logs them and falls back to
//! `(Unknown, Medium)`.

use crate::error::ErrorCode;
use crate::model::{Category, Priority};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Category and priority suggested for a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classifier returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl ClassifyError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::CollaboratorUnavailable
    }
}

pub trait Classifier: Send + Sync {
    fn classify(&self, title: &str, description: &str) -> Result<Classification, ClassifyError>;
}

/// Run `classifier`, degrading to the default classification on failure.
pub fn classify_or_default(
    classifier: &dyn Classifier,
    title: &str,
    description: &str,
) -> Classification {
    match classifier.classify(title, description) {
        Ok(classification) => classification,
        Err(err) => {
            warn!(code = %err.code(), error = %err, "classification failed; using defaults");
            Classification::default()
        }
    }
}

/// A classifier that is never reachable. Every issue starts as `(Unknown, Medium)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopClassifier;

impl Classifier for NoopClassifier {
    fn classify(&self, _title: &str, _description: &str) -> Result<Classification, ClassifyError> {
        Err(ClassifyError::Unavailable("no classifier configured".into()))
    }
}

/// Deterministic local rules: first matching keyword wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Roads,
        &["pothole", "potholes", "asphalt", "pavement", "sidewalk", "road", "street", "curb"],
    ),
    (
        Category::Lighting,
        &["streetlight", "streetlamp", "lamp", "light", "lights", "bulb", "dark"],
    ),
    (
        Category::Sanitation,
        &["trash", "garbage", "litter", "dumping", "dumped", "rubbish", "overflowing", "bin"],
    ),
    (
        Category::Water,
        &["leak", "leaking", "flood", "flooding", "hydrant", "sewer", "drain", "pipe"],
    ),
    (Category::Graffiti, &["graffiti", "vandalism", "tag", "spray"]),
    (Category::Parks, &["park", "playground", "bench", "tree", "grass"]),
    (
        Category::Traffic,
        &["traffic", "signal", "stoplight", "sign", "crosswalk", "intersection"],
    ),
];

const CRITICAL_KEYWORDS: &[&str] = &["collapsed", "sinkhole", "gas", "downed", "sparking", "fire"];
const HIGH_KEYWORDS: &[&str] = &["dangerous", "hazard", "urgent", "injury", "blocked", "flooding"];
const LOW_KEYWORDS: &[&str] = &["cosmetic", "minor", "faded"];

impl Classifier for KeywordClassifier {
    fn classify(&self, title: &str, description: &str) -> Result<Classification, ClassifyError> {
        let text = format!("{title} {description}").to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let category = CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| words.contains(k)))
            .map_or(Category::Unknown, |(category, _)| *category);

        let priority = if CRITICAL_KEYWORDS.iter().any(|k| words.contains(k)) {
            Priority::Critical
        } else if HIGH_KEYWORDS.iter().any(|k| words.contains(k)) {
            Priority::High
        } else if LOW_KEYWORDS.iter().any(|k| words.contains(k)) {
            Priority::Low
        } else {
            Priority::Medium
        };

        Ok(Classification { category, priority })
    }
}
