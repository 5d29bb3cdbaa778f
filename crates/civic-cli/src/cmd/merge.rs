//! `civic merge` and `civic reconcile`: fold duplicates into the surviving issue.

use super::{Project, parse_issue_id};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use civic_core::model::{Actor, IssueId, UserId};
use civic_match::MergeOutcome;
use clap::Args;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// The duplicate that will become `merged`.
    #[arg(value_parser = parse_issue_id)]
    pub duplicate: IssueId,

    /// The issue that survives.
    #[arg(long = "into", value_parser = parse_issue_id)]
    pub target: IssueId,
}

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Open issue to re-check against older neighbours.
    #[arg(value_parser = parse_issue_id)]
    pub id: IssueId,
}

#[derive(Debug, Serialize)]
struct ReconcileOutput {
    id: IssueId,
    merged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<MergeOutcome>,
}

fn require_employee(actor: &Actor, what: &str) -> Result<()> {
    if actor.is_employee {
        Ok(())
    } else {
        anyhow::bail!("only employees may {what}; pass --employee or set CIVIC_ROLE=employee")
    }
}

fn pretty_merge(outcome: &MergeOutcome, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(
        w,
        &format!("Merged {} into {}", outcome.merged, outcome.target.id),
    )?;
    pretty_kv(w, "Confirmations", outcome.target.confirmation_count().to_string())?;
    pretty_kv(w, "Priority", outcome.target.priority.as_str())?;
    pretty_kv(w, "Category", outcome.target.category.as_str())?;
    if !outcome.moved.is_empty() {
        let moved: Vec<&str> = outcome.moved.iter().map(UserId::as_str).collect();
        pretty_kv(w, "Moved", moved.join(", "))?;
    }
    Ok(())
}

pub fn run_merge(args: &MergeArgs, actor: &Actor, output: OutputMode, project_root: &Path) -> Result<()> {
    require_employee(actor, "merge issues")?;
    let project = Project::open(project_root)?;
    let outcome = project.resolver()?.merge(args.duplicate, args.target)?;

    render_mode(
        output,
        &outcome,
        |o, w| writeln!(w, "{}\t{}\t{}", o.merged.0, o.target.id.0, o.moved.len()),
        |o, w| pretty_merge(o, w),
    )
}

pub fn run_reconcile(
    args: &ReconcileArgs,
    actor: &Actor,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    require_employee(actor, "reconcile issues")?;
    let project = Project::open(project_root)?;
    let outcome = project.resolver()?.reconcile(args.id)?;
    let result = ReconcileOutput {
        id: args.id,
        merged: outcome.is_some(),
        outcome,
    };

    render_mode(
        output,
        &result,
        |r, w| match &r.outcome {
            Some(o) => writeln!(w, "{}\tmerged\t{}", r.id.0, o.target.id.0),
            None => writeln!(w, "{}\tunchanged", r.id.0),
        },
        |r, w| match &r.outcome {
            Some(o) => pretty_merge(o, w),
            None => writeln!(w, "Issue {} has no older duplicate.", r.id),
        },
    )
}
