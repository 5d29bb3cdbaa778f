//! `civic status`: employee-driven lifecycle transitions.

use super::{Project, parse_issue_id};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use civic_core::lifecycle::TransitionOutcome;
use civic_core::error::EngineError;
use civic_core::model::{Actor, AwardOutcome, InvalidTransition, Issue, IssueId, Status};
use clap::Args;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Issue to move (`7` or `#7`).
    #[arg(value_parser = parse_issue_id)]
    pub id: IssueId,

    /// Target status: under_review, in_progress, resolved, closed.
    pub status: Status,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    issue: Issue,
    previous_status: Status,
    points_awarded: Option<i64>,
}

impl From<TransitionOutcome> for StatusOutput {
    fn from(outcome: TransitionOutcome) -> Self {
        let points_awarded = match outcome.award {
            Some(AwardOutcome::Recorded(award)) => Some(award.amount),
            Some(AwardOutcome::AlreadyAwarded) | None => None,
        };
        Self {
            issue: outcome.issue,
            previous_status: outcome.from,
            points_awarded,
        }
    }
}

pub fn run_status(
    args: &StatusArgs,
    actor: &Actor,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let project = Project::open(project_root)?;
    let lifecycle = project.lifecycle();
    // Repeating `resolved` settles a Resolved award that an earlier run missed.
    let outcome = match lifecycle.transition(args.id, args.status, actor) {
        Err(EngineError::InvalidTransition(InvalidTransition {
            from: Status::Resolved,
            to: Status::Resolved,
            ..
        })) => lifecycle.settle_resolved(args.id, actor)?,
        other => other?,
    };
    let result = StatusOutput::from(outcome);

    render_mode(
        output,
        &result,
        |r, w| {
            writeln!(
                w,
                "{}\t{}\t{}",
                r.issue.id.0, r.previous_status, r.issue.status
            )
        },
        |r, w| {
            pretty_section(w, &format!("Issue {}", r.issue.id))?;
            pretty_kv(
                w,
                "Status",
                format!("{} -> {}", r.previous_status, r.issue.status),
            )?;
            if let Some(points) = r.points_awarded {
                pretty_kv(w, "Reporter", format!("+{points} points"))?;
            }
            Ok(())
        },
    )
}
