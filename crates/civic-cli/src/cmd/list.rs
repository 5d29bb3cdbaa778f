//! `civic list`: issues matching simple filters, ordered by id.

use super::Project;
use crate::output::{OutputMode, pretty_rule, render_mode};
use anyhow::Result;
use civic_core::model::{Category, Issue, Status, UserId};
use civic_core::store::{IssueFilter, IssueStore};
use clap::Args;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<Status>,

    #[arg(long)]
    pub category: Option<Category>,

    /// Only issues filed by this user.
    #[arg(long)]
    pub reporter: Option<String>,

    /// Only Submitted, UnderReview and InProgress issues.
    #[arg(long)]
    pub open: bool,

    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

impl ListArgs {
    fn filter(&self) -> IssueFilter {
        IssueFilter {
            status: self.status,
            category: self.category,
            reporter: self.reporter.as_deref().map(UserId::new),
            open_only: self.open,
            limit: self.limit,
        }
    }
}

fn write_row(w: &mut dyn Write, issue: &Issue) -> std::io::Result<()> {
    writeln!(
        w,
        "{}\t{}\t{}\t{}\t{}\t{}",
        issue.id.0,
        issue.status,
        issue.category,
        issue.priority,
        issue.confirmation_count(),
        issue.title
    )
}

pub fn run_list(args: &ListArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let issues = project.store.list_issues(&args.filter())?;

    render_mode(
        output,
        &issues,
        |issues, w| {
            for issue in issues {
                write_row(w, issue)?;
            }
            Ok(())
        },
        |issues, w| {
            if issues.is_empty() {
                return writeln!(w, "No issues match.");
            }
            writeln!(
                w,
                "{:<6} {:<13} {:<11} {:<9} {:>5}  TITLE",
                "ID", "STATUS", "CATEGORY", "PRIORITY", "CONF"
            )?;
            pretty_rule(w)?;
            for i in issues {
                writeln!(
                    w,
                    "{:<6} {:<13} {:<11} {:<9} {:>5}  {}",
                    i.id.to_string(),
                    i.status.as_str(),
                    i.category.as_str(),
                    i.priority.as_str(),
                    i.confirmation_count(),
                    i.title
                )?;
            }
            Ok(())
        },
    )
}
