//! `civic set`: employee override of category and priority.

use super::{Project, parse_issue_id};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use civic_core::model::{Actor, Category, IssueId, Priority};
use clap::Args;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Issue to reclassify (`7` or `#7`).
    #[arg(value_parser = parse_issue_id)]
    pub id: IssueId,

    #[arg(long)]
    pub category: Option<Category>,

    /// New priority; may only rise.
    #[arg(long)]
    pub priority: Option<Priority>,
}

pub fn run_set(args: &SetArgs, actor: &Actor, output: OutputMode, project_root: &Path) -> Result<()> {
    if args.category.is_none() && args.priority.is_none() {
        anyhow::bail!("nothing to change: pass --category and/or --priority");
    }
    let project = Project::open(project_root)?;
    let issue = project.lifecycle().override_classification(
        args.id,
        actor,
        args.category,
        args.priority,
    )?;

    render_mode(
        output,
        &issue,
        |i, w| writeln!(w, "{}\t{}\t{}", i.id.0, i.category, i.priority),
        |i, w| {
            pretty_section(w, &format!("Issue {}", i.id))?;
            pretty_kv(w, "Category", i.category.as_str())?;
            pretty_kv(w, "Priority", i.priority.as_str())
        },
    )
}
