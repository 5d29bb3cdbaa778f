//! Input checks applied before the engine touches the repository.

use crate::error::ValidationError;
use crate::model::Submission;

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 8_192;
pub const MAX_COMMENT_LEN: usize = 8_192;
pub const MAX_IMAGE_REF_LEN: usize = 2_048;

pub fn validate_title(s: &str) -> Result<String, ValidationError> {
    let title = s.trim();
    if title.is_empty() {
        return Err(ValidationError::new("title", "must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationError::new(
            "title",
            format!("must be <= {MAX_TITLE_LEN} characters"),
        ));
    }
    if title.chars().any(char::is_control) {
        return Err(ValidationError::new(
            "title",
            "must not contain control characters",
        ));
    }
    Ok(title.to_string())
}

pub fn validate_description(s: &str) -> Result<String, ValidationError> {
    let description = s.trim();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::new(
            "description",
            format!("must be <= {MAX_DESCRIPTION_LEN} characters"),
        ));
    }
    Ok(description.to_string())
}

pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), ValidationError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(ValidationError::new(
            "latitude",
            format!("{lat} is outside [-90, 90]"),
        ));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(ValidationError::new(
            "longitude",
            format!("{lon} is outside [-180, 180]"),
        ));
    }
    Ok(())
}

pub fn validate_comment_text(s: &str) -> Result<String, ValidationError> {
    let text = s.trim();
    if text.is_empty() {
        return Err(ValidationError::new("comment", "must not be empty"));
    }
    if text.chars().count() > MAX_COMMENT_LEN {
        return Err(ValidationError::new(
            "comment",
            format!("must be <= {MAX_COMMENT_LEN} characters"),
        ));
    }
    Ok(text.to_string())
}

/// Validate a submission and return it with trimmed text fields.
pub fn validate_submission(submission: &Submission) -> Result<Submission, ValidationError> {
    let title = validate_title(&submission.title)?;
    let description = validate_description(&submission.description)?;
    validate_coordinates(submission.location.lat, submission.location.lon)?;

    let image_ref = match submission.image_ref.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(r) if r.len() > MAX_IMAGE_REF_LEN => {
            return Err(ValidationError::new(
                "image_ref",
                format!("must be <= {MAX_IMAGE_REF_LEN} bytes"),
            ));
        }
        Some(r) => Some(r.to_string()),
    };

    Ok(Submission {
        title,
        description,
        location: submission.location,
        image_ref,
    })
}
