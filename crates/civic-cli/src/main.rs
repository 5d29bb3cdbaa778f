#![forbid(unsafe_code)]

mod cmd;
mod http_classifier;
mod identity;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "civic: duplicate-aware civic issue reporting",
    long_about = None
)]
struct Cli {
    /// Emit JSON output (same as `--format json`).
    #[arg(long, global = true)]
    json: bool,

    /// Output format: pretty, text or json.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Acting user (falls back to CIVIC_USER, then USER on a TTY).
    #[arg(long, global = true)]
    user: Option<String>,

    /// Act as a city employee.
    #[arg(long, global = true)]
    employee: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.json, self.format)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize a civic project",
        long_about = "Create .civic/ with a default config and an empty store.",
        after_help = "EXAMPLES:\n    civic init\n    civic init --force"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Reporting",
        about = "Report a problem",
        long_about = "Submit a report. Nearby matching open issues are confirmed instead of duplicated.",
        after_help = "EXAMPLES:\n    civic submit --title \"Pothole on Main St\" --lat 40.0 --lon -75.0 --user ana\n\n    # Emit machine-readable output\n    civic submit -t \"Streetlight out\" --lat 51.5 --lon -0.12 --json"
    )]
    Submit(cmd::submit::SubmitArgs),

    #[command(
        next_help_heading = "Reporting",
        about = "Confirm an existing issue",
        after_help = "EXAMPLES:\n    civic confirm 7 --user ben"
    )]
    Confirm(cmd::confirm::ConfirmArgs),

    #[command(
        next_help_heading = "Reporting",
        about = "Comment on an issue",
        after_help = "EXAMPLES:\n    civic comment 7 \"still there this morning\""
    )]
    Comment(cmd::comment::CommentArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show one issue",
        after_help = "EXAMPLES:\n    civic show 7\n    civic show '#7' --json"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Read",
        about = "List issues",
        after_help = "EXAMPLES:\n    civic list --open\n    civic list --category roads --limit 20 --json"
    )]
    List(cmd::list::ListArgs),

    #[command(
        next_help_heading = "Read",
        about = "Score open issues around a point",
        after_help = "EXAMPLES:\n    civic nearby --lat 40.0 --lon -75.0 --text \"pothole\""
    )]
    Nearby(cmd::nearby::NearbyArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show points or the leaderboard",
        after_help = "EXAMPLES:\n    civic points ana\n    civic points --leaderboard 10"
    )]
    Points(cmd::points::PointsArgs),

    #[command(
        next_help_heading = "Staff",
        about = "Move an issue through its lifecycle",
        long_about = "Employee-only status transition: submitted -> under_review -> in_progress -> resolved -> closed.",
        after_help = "EXAMPLES:\n    civic status 7 under_review --employee --user clerk"
    )]
    Status(cmd::status::StatusArgs),

    #[command(
        next_help_heading = "Staff",
        about = "Override category or raise priority",
        after_help = "EXAMPLES:\n    civic set 7 --category traffic --priority high --employee --user clerk"
    )]
    Set(cmd::set::SetArgs),

    #[command(
        next_help_heading = "Staff",
        about = "Merge a duplicate into another issue",
        after_help = "EXAMPLES:\n    civic merge 9 --into 7 --employee --user clerk"
    )]
    Merge(cmd::merge::MergeArgs),

    #[command(
        next_help_heading = "Staff",
        about = "Re-check an issue against older neighbours",
        after_help = "EXAMPLES:\n    civic reconcile 9 --employee --user clerk"
    )]
    Reconcile(cmd::merge::ReconcileArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    civic completions bash\n    civic completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Submit(_) => "submit",
            Self::Confirm(_) => "confirm",
            Self::Comment(_) => "comment",
            Self::Show(_) => "show",
            Self::List(_) => "list",
            Self::Nearby(_) => "nearby",
            Self::Points(_) => "points",
            Self::Status(_) => "status",
            Self::Set(_) => "set",
            Self::Merge(_) => "merge",
            Self::Reconcile(_) => "reconcile",
            Self::Completions(_) => "completions",
        }
    }
}

fn init_tracing(quiet: bool) {
    let filter = EnvFilter::try_from_env("CIVIC_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if quiet {
            "error"
        } else if env::var("DEBUG").is_ok() {
            "civic=debug,info"
        } else {
            "civic=info,warn"
        })
    });

    let format = env::var("CIVIC_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let actor = || identity::require_actor(cli.user.as_deref(), cli.employee);

    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, output, project_root),
        Commands::Submit(args) => cmd::submit::run_submit(args, &actor()?, output, project_root),
        Commands::Confirm(args) => {
            cmd::confirm::run_confirm(args, &actor()?, output, project_root)
        }
        Commands::Comment(args) => {
            cmd::comment::run_comment(args, &actor()?, output, project_root)
        }
        Commands::Show(args) => cmd::show::run_show(args, output, project_root),
        Commands::List(args) => cmd::list::run_list(args, output, project_root),
        Commands::Nearby(args) => cmd::nearby::run_nearby(args, output, project_root),
        Commands::Points(args) => {
            let acting = actor().ok().map(|a| a.user_id);
            cmd::points::run_points(args, acting.as_ref(), output, project_root)
        }
        Commands::Status(args) => cmd::status::run_status(args, &actor()?, output, project_root),
        Commands::Set(args) => cmd::set::run_set(args, &actor()?, output, project_root),
        Commands::Merge(args) => cmd::merge::run_merge(args, &actor()?, output, project_root),
        Commands::Reconcile(args) => {
            cmd::merge::run_reconcile(args, &actor()?, output, project_root)
        }
        Commands::Completions(args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet);
    let output = cli.output_mode();

    let result = env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|root| {
            let started = Instant::now();
            let result = run(&cli, output, &root);
            debug!(
                command = cli.command.name(),
                elapsed_ms = started.elapsed().as_millis(),
                ok = result.is_ok(),
                "command finished"
            );
            result
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if render_error(output, &CliError::from_anyhow(&err)).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
