//! `civic confirm`: affirm an existing issue. Merged issues redirect to their target.

use super::{Project, parse_issue_id};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use civic_core::model::{Actor, IssueId};
use clap::Args;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct ConfirmArgs {
    /// Issue to confirm (`7` or `#7`).
    #[arg(value_parser = parse_issue_id)]
    pub id: IssueId,
}

pub fn run_confirm(
    args: &ConfirmArgs,
    actor: &Actor,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let project = Project::open(project_root)?;
    let confirmation = project.resolver()?.confirm(args.id, actor)?;

    render_mode(
        output,
        &confirmation,
        |c, w| {
            writeln!(
                w,
                "{}\t{}\t{}\t{}",
                c.issue.id.0,
                c.newly_added,
                c.issue.confirmation_count(),
                c.issue.priority
            )
        },
        |c, w| {
            pretty_section(w, &format!("Issue {}", c.issue.id))?;
            if let Some(from) = c.redirected_from {
                pretty_kv(w, "Redirected", format!("{from} was merged here"))?;
            }
            pretty_kv(
                w,
                "Confirmation",
                if c.newly_added { "recorded" } else { "already counted" },
            )?;
            pretty_kv(w, "Confirmations", c.issue.confirmation_count().to_string())?;
            pretty_kv(w, "Priority", c.issue.priority.as_str())
        },
    )
}
