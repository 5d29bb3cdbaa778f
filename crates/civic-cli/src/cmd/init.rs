use super::CIVIC_DIR;
use crate::output::{OutputMode, render};
use anyhow::{Context as _, Result};
use civic_core::config::ProjectConfig;
use civic_core::db::StorePaths;
use civic_core::lock::CellLocks;
use civic_core::store::SqliteStore;
use clap::Args;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite `config.toml` even if `.civic/` already exists. The store is
    /// kept; idle cell lock files are removed.
    #[arg(long)]
    pub force: bool,
}

const GITIGNORE: &str = "civic.sqlite3*\nlocks/\n";

/// How long `--force` waits for running commands before pruning lock files.
const PRUNE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct InitOutput {
    path: String,
    store: String,
    reinitialized: bool,
    pruned_locks: usize,
}

/// Execute `civic init`. Creates the project skeleton:
///
/// ```text
/// .civic/
///   config.toml      (defaults, every key spelled out)
///   civic.sqlite3    (migrated store)
///   locks/           (per-cell section locks)
///   .gitignore
/// ```
///
/// # Errors
///
/// Returns an error if `.civic/` already exists and `--force` is not set,
/// or if any filesystem operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let civic_dir = project_root.join(CIVIC_DIR);
    let paths = StorePaths::new(&civic_dir);
    let existed = civic_dir.exists();
    if existed && !args.force {
        anyhow::bail!("{CIVIC_DIR}/ already exists. Use `civic init --force` to rewrite the config.");
    }

    paths.ensure()?;
    let pruned_locks = if existed {
        CellLocks::new(paths.locks()).prune(PRUNE_TIMEOUT)?
    } else {
        0
    };

    let config = toml::to_string_pretty(&ProjectConfig::default())
        .context("Failed to render default config")?;
    std::fs::write(civic_dir.join("config.toml"), config)
        .context("Failed to write config.toml")?;
    std::fs::write(civic_dir.join(".gitignore"), GITIGNORE)
        .context("Failed to write .gitignore")?;

    SqliteStore::open(&civic_dir)?;
    tracing::info!(path = %civic_dir.display(), "project initialized");

    let result = InitOutput {
        path: civic_dir.display().to_string(),
        store: paths.database().display().to_string(),
        reinitialized: existed,
        pruned_locks,
    };
    render(output, &result, |r, w| {
        writeln!(w, "Initialized civic project in {}", r.path)
    })
}
