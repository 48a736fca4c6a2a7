//! Tributary: AccuRev stream integration for build pipelines.
//!
//! # Usage
//!
//! ```text
//! tributary root add <name> --depot <d> --stream <s> --server <host> --user <u> [...]
//! tributary root list|show|validate|remove
//! tributary collect <root> [--from N] [--to N] [--dry-run] [--json]
//! tributary diff <root> --from N [--to N]
//! tributary patch <root> [--from N] [--to N] [--apply <dir>] [--dry-run]
//! tributary pending <root> [--through N]
//! tributary promote <root> --through N [--separately | --batch]
//! tributary after-build --revision <root>=N [...] [--failed]
//! tributary label <root> <label> [--at N]
//! tributary checkout <root> <dir> [--at N] [--clean] [--host <name>]
//! tributary describe <root>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    checkout::CheckoutArgs, collect::CollectArgs, diff::DiffArgs, label::LabelArgs,
    patch::PatchArgs, promote::{AfterBuildArgs, PendingArgs, PromoteArgs}, root::RootCommand,
};

/// Environment variable holding the log filter, e.g. `tributary_sync=debug`.
const LOG_ENV: &str = "TRIBUTARY_LOG";

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tributary",
    version,
    about = "Collect, patch and promote changes across AccuRev stream hierarchies",
    long_about = None,
)]
struct Cli {
    /// Log more detail (-v debug, -vv trace). TRIBUTARY_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage registered roots.
    Root {
        #[command(subcommand)]
        command: RootCommand,
    },

    /// Collect changes for a root since its watermark.
    Collect(CollectArgs),

    /// Show unified diffs of the changes in a range.
    Diff(DiffArgs),

    /// Build a full or incremental patch, optionally applying it to a directory.
    Patch(PatchArgs),

    /// List transactions waiting to be promoted.
    Pending(PendingArgs),

    /// Promote pending transactions to the basis stream.
    Promote(PromoteArgs),

    /// Promote every opted-in root once a build has finished.
    AfterBuild(AfterBuildArgs),

    /// Create a snapshot of the watched stream.
    Label(LabelArgs),

    /// Prepare an agent-side checkout through a time-locked stream.
    Checkout(CheckoutArgs),

    /// Print the root's description.
    Describe {
        /// Root name.
        root: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Root { command } => commands::root::run(command),
        Commands::Collect(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Patch(args) => args.run(),
        Commands::Pending(args) => args.run(),
        Commands::Promote(args) => args.run(),
        Commands::AfterBuild(args) => args.run(),
        Commands::Label(args) => args.run(),
        Commands::Checkout(args) => args.run(),
        Commands::Describe { root } => commands::root::describe(&root),
    }
}

fn init_tracing(verbose: u8, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
