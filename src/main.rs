use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use visuals::commands::{self, BuildOptions};
use visuals::{diagnostics, watch};

/// Exit code for runtime errors (bad config, corrupt snapshot, integrity violations).
const EXIT_RUNTIME_ERROR: u8 = 3;

/// Flags shared by `build` and `watch`.
#[derive(Args)]
struct BuildArgs {
    /// Number of partitions changed documents are parsed in
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,
    /// Output directory for the placeholder image
    #[arg(long, default_value = "_build")]
    out: PathBuf,
}

impl BuildArgs {
    /// Hand the flags to the build command.
    fn into_options(self) -> BuildOptions {
        return BuildOptions { jobs: self.jobs, out: self.out };
    }
}

/// Stable-identifier visual assets for markdown documents.
#[derive(Parser)]
#[command(name = "visuals", version, about = "Stable-identifier visual assets for markdown documents")]
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Commands,
    /// Log engine decisions to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Scan markdown, reconcile asset state, run backends, write the snapshot
    Build(BuildArgs),
    /// Show every asset occurrence and its state from the last build
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build, then rebuild whenever a document changes
    Watch(BuildArgs),
}

/// Install the stderr log subscriber. `RUST_LOG` wins; otherwise warnings, or
/// debug output with `--verbose`.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "visuals=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| return EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let root = Path::new(".");

    let result = match cli.command {
        Commands::Build(args) => commands::build(root, &args.into_options()),
        Commands::Status { json } => commands::status(root, json).map(|()| return ExitCode::SUCCESS),
        Commands::Watch(args) => watch::run(root, &args.into_options()),
    };

    return match result {
        Ok(code) => code,
        Err(e) => {
            diagnostics::print_error(&e);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        },
    };
}
