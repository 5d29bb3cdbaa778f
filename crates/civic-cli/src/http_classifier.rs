//! Categorization over HTTP.
//!
//! POSTs `{"title", "description"}` as JSON and expects
//! `{"category", "priority"}` back. Values the engine does not recognize map
//! to `Unknown` / `Medium`; transport failures surface as `ClassifyError` and
//! the resolver falls back to the defaults.

use civic_core::classify::{Classification, Classifier, ClassifyError};
use civic_core::model::{Category, Priority};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

impl ClassifyResponse {
    fn into_classification(self) -> Classification {
        Classification {
            category: self
                .category
                .and_then(|raw| raw.parse::<Category>().ok())
                .unwrap_or_default(),
            priority: self
                .priority
                .and_then(|raw| raw.parse::<Priority>().ok())
                .unwrap_or_default(),
        }
    }
}

pub struct HttpClassifier {
    url: String,
    agent: ureq::Agent,
}

impl HttpClassifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new()
                .timeout(timeout)
                .user_agent("civic-cli")
                .build(),
        }
    }
}

impl Classifier for HttpClassifier {
    fn classify(&self, title: &str, description: &str) -> Result<Classification, ClassifyError> {
        let response = self
            .agent
            .post(&self.url)
            .set("Accept", "application/json")
            .send_json(ClassifyRequest { title, description })
            .map_err(|err| ClassifyError::Unavailable(format!("{}: {err}", self.url)))?;

        let body: ClassifyResponse = response
            .into_json()
            .map_err(|err| ClassifyError::InvalidResponse(err.to_string()))?;
        debug!(?body, "classifier response");
        Ok(body.into_classification())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Classification {
        serde_json::from_str::<ClassifyResponse>(json)
            .unwrap()
            .into_classification()
    }

    #[test]
    fn known_values_are_used() {
        let c = parse(r#"{"category": "roads", "priority": "high"}"#);
        assert_eq!(c.category, Category::Roads);
        assert_eq!(c.priority, Priority::High);
    }

    #[test]
    fn unrecognized_or_missing_values_fall_back() {
        let c = parse(r#"{"category": "volcanoes", "priority": "apocalyptic"}"#);
        assert_eq!(c, Classification::default());
        assert_eq!(parse("{}"), Classification::default());
    }

    #[test]
    fn unreachable_endpoint_is_an_error() {
        let classifier = HttpClassifier::new("http://127.0.0.1:9/classify", Duration::from_millis(200));
        assert!(matches!(
            classifier.classify("Pothole", ""),
            Err(ClassifyError::Unavailable(_))
        ));
    }
}
