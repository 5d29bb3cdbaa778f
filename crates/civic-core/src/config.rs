use crate::error::ErrorCode;
use crate::model::Priority;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

/// Project configuration stored at `.civic/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub matching: MatchConfig,
    #[serde(default)]
    pub points: PointsConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// Similarity weights, search radius and decision thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    #[serde(default = "default_distance_weight", alias = "distanceWeight")]
    pub distance_weight: f64,
    #[serde(default = "default_category_weight", alias = "categoryWeight")]
    pub category_weight: f64,
    #[serde(default = "default_text_weight", alias = "textWeight")]
    pub text_weight: f64,
    #[serde(default = "default_radius_meters", alias = "radiusMeters")]
    pub radius_meters: f64,
    #[serde(default = "default_confirm_threshold", alias = "confirmThreshold")]
    pub confirm_threshold: f64,
    #[serde(default = "default_ambiguous_threshold", alias = "ambiguousThreshold")]
    pub ambiguous_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            distance_weight: default_distance_weight(),
            category_weight: default_category_weight(),
            text_weight: default_text_weight(),
            radius_meters: default_radius_meters(),
            confirm_threshold: default_confirm_threshold(),
            ambiguous_threshold: default_ambiguous_threshold(),
        }
    }
}

impl MatchConfig {
    #[must_use]
    pub fn weight_sum(&self) -> f64 {
        self.distance_weight + self.category_weight + self.text_weight
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, weight) in [
            ("matching.distance_weight", self.distance_weight),
            ("matching.category_weight", self.category_weight),
            ("matching.text_weight", self.text_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::new(field, "must be a finite number >= 0"));
            }
        }
        if self.weight_sum() <= 0.0 {
            return Err(ConfigError::new(
                "matching",
                "at least one similarity weight must be positive",
            ));
        }
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            return Err(ConfigError::new(
                "matching.radius_meters",
                "must be a finite number > 0",
            ));
        }
        for (field, threshold) in [
            ("matching.confirm_threshold", self.confirm_threshold),
            ("matching.ambiguous_threshold", self.ambiguous_threshold),
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::new(field, "must be within [0, 1]"));
            }
        }
        if self.ambiguous_threshold > self.confirm_threshold {
            return Err(ConfigError::new(
                "matching.ambiguous_threshold",
                "must not exceed confirm_threshold",
            ));
        }
        Ok(())
    }
}

/// Point amounts per awarded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsConfig {
    #[serde(default = "default_submit_points")]
    pub submit: i64,
    #[serde(default = "default_confirm_points")]
    pub confirm: i64,
    #[serde(default = "default_resolved_points")]
    pub resolved: i64,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            submit: default_submit_points(),
            confirm: default_confirm_points(),
            resolved: default_resolved_points(),
        }
    }
}

impl PointsConfig {
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.confirm <= 0 {
            return Err(ConfigError::new("points.confirm", "must be > 0"));
        }
        if self.submit <= self.confirm {
            return Err(ConfigError::new(
                "points.submit",
                "must be greater than points.confirm",
            ));
        }
        if self.resolved <= 0 {
            return Err(ConfigError::new("points.resolved", "must be > 0"));
        }
        Ok(())
    }
}

/// How confirmations turn into priority escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_confirmations_per_tier")]
    pub confirmations_per_tier: u32,
    #[serde(default = "default_max_priority")]
    pub max_priority: Priority,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            confirmations_per_tier: default_confirmations_per_tier(),
            max_priority: default_max_priority(),
        }
    }
}

impl EscalationConfig {
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.confirmations_per_tier == 0 {
            return Err(ConfigError::new(
                "escalation.confirmations_per_tier",
                "must be >= 1",
            ));
        }
        Ok(())
    }

    /// Whether reaching `confirmer_count` confirmers crosses a tier boundary.
    #[must_use]
    pub const fn escalates_at(&self, confirmer_count: usize) -> bool {
        let per_tier = self.confirmations_per_tier as usize;
        confirmer_count > 0 && per_tier > 0 && confirmer_count % per_tier == 0
    }
}

/// Exclusive-section timing for the duplicate resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_section_timeout_ms")]
    pub section_timeout_ms: u64,
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            section_timeout_ms: default_section_timeout_ms(),
            max_commit_attempts: default_max_commit_attempts(),
        }
    }
}

impl ConcurrencyConfig {
    #[must_use]
    pub const fn section_timeout(&self) -> Duration {
        Duration::from_millis(self.section_timeout_ms)
    }

    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.max_commit_attempts == 0 {
            return Err(ConfigError::new(
                "concurrency.max_commit_attempts",
                "must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Which categorization collaborator the CLI wires in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    None,
    #[default]
    Keyword,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub mode: ClassifierMode,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_classifier_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mode: ClassifierMode::default(),
            url: None,
            timeout_ms: default_classifier_timeout_ms(),
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == ClassifierMode::Http && self.url.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::new(
                "classifier.url",
                "is required when classifier.mode = \"http\"",
            ));
        }
        Ok(())
    }
}

impl ProjectConfig {
    /// Check every section; the first offending field is reported.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matching.validate()?;
        self.points.validate()?;
        self.escalation.validate()?;
        self.concurrency.validate()?;
        self.classifier.validate()
    }
}

/// A configuration value outside its allowed range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {field} {reason}", ErrorCode::ConfigInvalid.code())]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl ConfigError {
    #[must_use]
    pub const fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ConfigInvalid
    }
}

/// Load and validate `.civic/config.toml`; a missing file yields defaults.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(".civic/config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Pick the output mode: `--json`, then `--format`, then `FORMAT`, then TTY detection.
pub fn resolve_output(
    cli_json: bool,
    cli_format: Option<&str>,
    env_format: Option<&str>,
) -> &'static str {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "table" | "plain" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json";
    }

    if let Some(mode) = cli_format.and_then(normalize_output_mode) {
        return mode;
    }

    if let Some(mode) = env_format.and_then(normalize_output_mode) {
        return mode;
    }

    if std::io::stdout().is_terminal() {
        "pretty"
    } else {
        "text"
    }
}

const fn default_distance_weight() -> f64 {
    0.4
}

const fn default_category_weight() -> f64 {
    0.3
}

const fn default_text_weight() -> f64 {
    0.3
}

const fn default_radius_meters() -> f64 {
    150.0
}

const fn default_confirm_threshold() -> f64 {
    0.65
}

const fn default_ambiguous_threshold() -> f64 {
    0.45
}

const fn default_submit_points() -> i64 {
    10
}

const fn default_confirm_points() -> i64 {
    5
}

const fn default_resolved_points() -> i64 {
    25
}

const fn default_confirmations_per_tier() -> u32 {
    3
}

const fn default_max_priority() -> Priority {
    Priority::Critical
}

const fn default_section_timeout_ms() -> u64 {
    2_000
}

const fn default_max_commit_attempts() -> u32 {
    3
}

const fn default_classifier_timeout_ms() -> u64 {
    3_000
}
