//! `civic nearby`: open issues around a point, scored as a report would be.

use super::Project;
use crate::output::{OutputMode, render_mode};
use anyhow::Result;
use civic_core::error::EngineError;
use civic_core::geo::Point;
use civic_core::model::Category;
use civic_core::validate::validate_coordinates;
use clap::Args;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct NearbyArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Text to score candidates against; without it only distance and category count.
    #[arg(long, default_value = "")]
    pub text: String,

    #[arg(long, default_value = "unknown")]
    pub category: Category,
}

pub fn run_nearby(args: &NearbyArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project = Project::open(project_root)?;
    let resolver = project.resolver()?;
    let point = Point::new(args.lat, args.lon);
    validate_coordinates(point.lat, point.lon).map_err(EngineError::from)?;
    let candidates = resolver.candidates(point, &args.text, args.category)?;
    let thresholds = (
        resolver.matching().confirm_threshold,
        resolver.matching().ambiguous_threshold,
    );

    render_mode(
        output,
        &candidates,
        |cs, w| {
            for c in cs {
                writeln!(
                    w,
                    "{}\t{:.3}\t{:.1}\t{}",
                    c.issue.id.0, c.breakdown.total, c.breakdown.distance_meters, c.issue.title
                )?;
            }
            Ok(())
        },
        |cs, w| {
            if cs.is_empty() {
                return writeln!(w, "No open issues within the match radius.");
            }
            writeln!(
                w,
                "{:<6} {:>6} {:>8}  {:<10} TITLE",
                "ID", "SCORE", "METERS", "VERDICT"
            )?;
            for c in cs {
                let total = c.breakdown.total;
                let verdict = if total >= thresholds.0 {
                    "confirms"
                } else if total >= thresholds.1 {
                    "ambiguous"
                } else {
                    "distinct"
                };
                writeln!(
                    w,
                    "{:<6} {:>6.3} {:>8.1}  {:<10} {}",
                    c.issue.id.to_string(),
                    total,
                    c.breakdown.distance_meters,
                    verdict,
                    c.issue.title
                )?;
            }
            Ok(())
        },
    )
}
