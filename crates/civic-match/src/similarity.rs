//! Similarity between an incoming report and an existing issue.
//!
//! Three signals, each in `[0.0, 1.0]`:
//!
//! - **distance**: linear decay `1 - min(d / radius, 1)`
//! - **category**: `1` equal, `0` different, `0.5` when either side is unknown
//! - **text**: Jaccard overlap of normalized title + description tokens
//!
//! The score is the weighted sum divided by the weight total, so it stays in
//! `[0.0, 1.0]` for any non-negative weights. Scoring is pure.

use civic_core::config::MatchConfig;
use civic_core::model::Category;
use serde::Serialize;
use std::collections::HashSet;
use std::hash::Hash;

/// Words too common in civic reports to say anything about identity.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "on", "in", "at", "to", "for", "by", "near", "is", "are",
    "was", "it", "its", "this", "that", "there", "with", "from", "my", "our", "again",
];

/// Street abbreviations expanded before comparison.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("st", "street"),
    ("ave", "avenue"),
    ("av", "avenue"),
    ("rd", "road"),
    ("blvd", "boulevard"),
    ("dr", "drive"),
    ("ln", "lane"),
    ("hwy", "highway"),
    ("pl", "place"),
    ("ct", "court"),
];

/// One side of a comparison: the text and category of a report or issue.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor<'a> {
    pub text: &'a str,
    pub category: Category,
}

/// Per-signal breakdown of a similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub distance_meters: f64,
    pub distance: f64,
    pub category: f64,
    pub text: f64,
    pub total: f64,
}

/// Lowercased tokens of `text` with stop words dropped and abbreviations expanded.
#[must_use]
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|raw| !raw.is_empty())
        .map(str::to_lowercase)
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .map(|word| {
            ABBREVIATIONS
                .iter()
                .find(|(abbr, _)| *abbr == word)
                .map_or(word, |(_, full)| (*full).to_string())
        })
        .collect()
}

/// Jaccard similarity `|A ∩ B| / |A ∪ B|`; two empty sets score `0.0`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union_size = a.union(b).count();
    intersection as f64 / union_size as f64
}

#[must_use]
pub fn category_signal(a: Category, b: Category) -> f64 {
    if !a.is_known() || !b.is_known() {
        0.5
    } else if a == b {
        1.0
    } else {
        0.0
    }
}

#[must_use]
pub fn distance_signal(distance_meters: f64, radius_meters: f64) -> f64 {
    if radius_meters <= 0.0 {
        return if distance_meters <= 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - (distance_meters / radius_meters).clamp(0.0, 1.0)
}

/// Score how likely `candidate` and `submission` describe the same problem.
#[must_use]
pub fn score(
    config: &MatchConfig,
    candidate: Descriptor<'_>,
    submission: Descriptor<'_>,
    distance_meters: f64,
) -> ScoreBreakdown {
    let distance = distance_signal(distance_meters, config.radius_meters);
    let category = category_signal(candidate.category, submission.category);
    let text = jaccard(&tokenize(candidate.text), &tokenize(submission.text));

    let weight_sum = config.weight_sum();
    let total = if weight_sum > 0.0 {
        (config.distance_weight.mul_add(
            distance,
            config
                .category_weight
                .mul_add(category, config.text_weight * text),
        ) / weight_sum)
            .clamp(0.0, 1.0)
    } else {
        0.0
    };

    ScoreBreakdown {
        distance_meters,
        distance,
        category,
        text,
        total,
    }
}
