//! `civic points`: a user's balance and award history, or the leaderboard.

use super::Project;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use civic_core::model::{PointAward, UserId};
use clap::Args;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct PointsArgs {
    /// User to report on; defaults to the acting user.
    #[arg(value_name = "USER")]
    pub who: Option<String>,

    /// Show the top N users instead of one balance.
    #[arg(long, value_name = "N")]
    pub leaderboard: Option<usize>,
}

#[derive(Debug, Serialize)]
struct Balance {
    user: UserId,
    total: i64,
    awards: Vec<PointAward>,
}

#[derive(Debug, Serialize)]
struct LeaderboardEntry {
    rank: usize,
    user: UserId,
    total: i64,
}

pub fn run_points(
    args: &PointsArgs,
    acting_user: Option<&UserId>,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let project = Project::open(project_root)?;
    let ledger = project.ledger();

    if let Some(limit) = args.leaderboard {
        let board: Vec<LeaderboardEntry> = ledger
            .leaderboard(limit)?
            .into_iter()
            .enumerate()
            .map(|(i, (user, total))| LeaderboardEntry {
                rank: i + 1,
                user,
                total,
            })
            .collect();
        return render_mode(
            output,
            &board,
            |rows, w| {
                for r in rows {
                    writeln!(w, "{}\t{}\t{}", r.rank, r.user, r.total)?;
                }
                Ok(())
            },
            |rows, w| {
                pretty_section(w, "Leaderboard")?;
                for r in rows {
                    writeln!(w, "{:>3}. {:<24} {:>6}", r.rank, r.user.as_str(), r.total)?;
                }
                Ok(())
            },
        );
    }

    let user = match (args.who.as_deref(), acting_user) {
        (Some(raw), _) => UserId::new(raw.trim()),
        (None, Some(user)) => user.clone(),
        (None, None) => anyhow::bail!("no user given: pass a user id, --user, or set CIVIC_USER"),
    };
    let balance = Balance {
        total: ledger.total_for(&user)?,
        awards: ledger.awards_for(&user)?,
        user,
    };

    render_mode(
        output,
        &balance,
        |b, w| writeln!(w, "{}\t{}", b.user, b.total),
        |b, w| {
            pretty_section(w, &format!("Points for {}", b.user))?;
            pretty_kv(w, "Total", b.total.to_string())?;
            for a in &b.awards {
                writeln!(w, "  {:>+5}  {:<9} {}", a.amount, a.event_kind.as_str(), a.issue_id)?;
            }
            Ok(())
        },
    )
}
