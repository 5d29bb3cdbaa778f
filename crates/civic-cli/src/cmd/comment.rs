//! `civic comment`: append a comment. Comments on merged issues land on the target.

use super::{Project, parse_issue_id};
use crate::output::{OutputMode, render};
use anyhow::Result;
use civic_core::comments::post_comment;
use civic_core::model::{Actor, IssueId};
use clap::Args;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct CommentArgs {
    /// Issue to comment on (`7` or `#7`).
    #[arg(value_parser = parse_issue_id)]
    pub id: IssueId,

    /// Comment text.
    pub text: String,
}

pub fn run_comment(
    args: &CommentArgs,
    actor: &Actor,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let project = Project::open(project_root)?;
    let comment = post_comment(project.store.as_ref(), args.id, actor, &args.text)?;

    render(output, &comment, |c, w| {
        writeln!(w, "Comment {} added to issue {}", c.id, c.issue_id)
    })
}
