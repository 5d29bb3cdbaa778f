//! `civic submit`: file a report and let the resolver decide whether it is new.

use super::Project;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use civic_core::geo::Point;
use civic_core::model::{Actor, Submission};
use civic_match::Resolution;
use clap::Args;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Short title of the problem.
    #[arg(long, short = 't')]
    pub title: String,

    /// Longer description.
    #[arg(long, short = 'd', default_value = "")]
    pub description: String,

    /// Latitude in degrees.
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude in degrees.
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Opaque reference to an uploaded photo.
    #[arg(long)]
    pub image: Option<String>,
}

pub fn run_submit(
    args: &SubmitArgs,
    actor: &Actor,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let project = Project::open(project_root)?;
    let resolver = project.resolver()?;

    let submission = Submission {
        image_ref: args.image.clone(),
        ..Submission::new(
            args.title.as_str(),
            args.description.as_str(),
            Point::new(args.lat, args.lon),
        )
    };
    let resolution = resolver.submit(&submission, actor)?;

    render_mode(
        output,
        &resolution,
        |r, w| match r {
            Resolution::New { issue } => writeln!(w, "new\t{}", issue.id.0),
            Resolution::Confirms {
                issue_id,
                score,
                newly_added,
            } => writeln!(w, "confirms\t{}\t{score:.3}\t{newly_added}", issue_id.0),
            Resolution::Ambiguous {
                issue,
                closest,
                score,
            } => writeln!(w, "ambiguous\t{}\t{}\t{score:.3}", issue.id.0, closest.0),
        },
        |r, w| match r {
            Resolution::New { issue } => {
                pretty_section(w, &format!("Created issue {}", issue.id))?;
                pretty_kv(w, "Title", &issue.title)?;
                pretty_kv(w, "Category", issue.category.as_str())?;
                pretty_kv(w, "Priority", issue.priority.as_str())
            }
            Resolution::Confirms {
                issue_id,
                score,
                newly_added,
            } => {
                pretty_section(w, &format!("Matches existing issue {issue_id}"))?;
                pretty_kv(w, "Score", format!("{score:.3}"))?;
                pretty_kv(
                    w,
                    "Confirmation",
                    if *newly_added { "recorded" } else { "already counted" },
                )
            }
            Resolution::Ambiguous {
                issue,
                closest,
                score,
            } => {
                pretty_section(w, &format!("Created issue {}", issue.id))?;
                pretty_kv(w, "Possibly dup", format!("{closest} (score {score:.3})"))?;
                pretty_kv(w, "Category", issue.category.as_str())?;
                pretty_kv(w, "Priority", issue.priority.as_str())
            }
        },
    )
}
