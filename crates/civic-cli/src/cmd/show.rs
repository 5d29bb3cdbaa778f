//! `civic show`: full details of one issue, with its comments.

use super::{Project, parse_issue_id};
use crate::output::{OutputMode, pretty_kv, pretty_rule, pretty_section, render_mode};
use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use civic_core::error::EngineError;
use civic_core::model::{Comment, Issue, IssueId, UserId};
use civic_core::store::IssueStore;
use clap::Args;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Issue to display (`7` or `#7`).
    #[arg(value_parser = parse_issue_id)]
    pub id: IssueId,
}

#[derive(Debug, Serialize)]
struct ShowOutput {
    #[serde(flatten)]
    issue: Issue,
    comments: Vec<Comment>,
}

fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn join_users(issue: &Issue) -> String {
    if issue.confirmer_ids.is_empty() {
        return "-".to_string();
    }
    issue
        .confirmer_ids
        .iter()
        .map(UserId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn run_show(args: &ShowArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let issue = project
        .store
        .get_issue(args.id)?
        .ok_or(EngineError::NotFound(args.id))?;
    let comments = project.store.comments_for(issue.id)?;
    let result = ShowOutput { issue, comments };

    render_mode(
        output,
        &result,
        |r, w| {
            let i = &r.issue;
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}\t{:.6}\t{:.6}\t{}",
                i.id.0,
                i.status,
                i.category,
                i.priority,
                i.confirmation_count(),
                i.location.lat,
                i.location.lon,
                i.title
            )
        },
        |r, w| {
            let i = &r.issue;
            pretty_section(w, &format!("Issue {}: {}", i.id, i.title))?;
            pretty_kv(w, "Status", i.status.as_str())?;
            if let Some(target) = i.merged_into_id {
                pretty_kv(w, "Merged into", target.to_string())?;
            }
            if let Some(closest) = i.possible_duplicate_of {
                pretty_kv(w, "Possibly dup", closest.to_string())?;
            }
            pretty_kv(w, "Category", i.category.as_str())?;
            pretty_kv(w, "Priority", i.priority.as_str())?;
            pretty_kv(
                w,
                "Location",
                format!("{:.6}, {:.6} ({})", i.location.lat, i.location.lon, i.geohash),
            )?;
            pretty_kv(w, "Reporter", i.reporter_id.as_str())?;
            pretty_kv(w, "Confirmed by", join_users(i))?;
            if let Some(image) = &i.image_ref {
                pretty_kv(w, "Image", image)?;
            }
            pretty_kv(w, "Created", local_time(i.created_at))?;
            pretty_kv(w, "Updated", local_time(i.updated_at))?;
            if !i.description.is_empty() {
                writeln!(w)?;
                writeln!(w, "{}", i.description)?;
            }
            if !r.comments.is_empty() {
                writeln!(w)?;
                pretty_section(w, &format!("Comments ({})", r.comments.len()))?;
                for c in &r.comments {
                    writeln!(w, "[{}] {}: {}", local_time(c.created_at), c.author_id, c.text)?;
                }
                pretty_rule(w)?;
            }
            Ok(())
        },
    )
}
