//! Append-only issue comments.

use crate::error::EngineError;
use crate::model::{Actor, Comment, IssueId, NewComment};
use crate::store::{IssueStore, follow_merges};
use crate::validate::validate_comment_text;
use tracing::info;

/// Post `text` on `issue_id`. Comments on a merged issue land on the issue it was merged into.
///
/// # Errors
///
/// `Validation` for empty or oversized text, `NotFound` for unknown issues.
pub fn post_comment(
    store: &dyn IssueStore,
    issue_id: IssueId,
    actor: &Actor,
    text: &str,
) -> Result<Comment, EngineError> {
    let text = validate_comment_text(text)?;
    let target = follow_merges(store, issue_id)?;

    let comment = store.append_comment(&NewComment {
        issue_id: target.id,
        author_id: actor.user_id.clone(),
        text,
    })?;
    info!(issue = %target.id, requested = %issue_id, comment = %comment.id, "comment posted");
    Ok(comment)
}
