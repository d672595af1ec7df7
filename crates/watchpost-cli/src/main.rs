mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, ledger::LedgerSubcommand, snapshot::SnapshotSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "watchpost",
    about = "Poll feeds and live entities, publish each noteworthy change exactly once",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .watchpost/)
    #[arg(long, global = true, env = "WATCHPOST_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .watchpost/ with a starter config, fixtures and an empty store
    Init,

    /// Run every configured job on its interval until Ctrl-C
    Run,

    /// Run each job (or one) exactly once and print status
    Once {
        /// Only run this job
        #[arg(long)]
        job: Option<String>,
    },

    /// Inspect the deduplication ledger
    Ledger {
        #[command(subcommand)]
        subcommand: LedgerSubcommand,
    },

    /// Inspect or purge entity snapshots
    Snapshot {
        #[command(subcommand)]
        subcommand: SnapshotSubcommand,
    },

    /// Configuration checks
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run | Commands::Once { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Run => cmd::run::run(&root, cli.json),
        Commands::Once { job } => cmd::run::once(&root, job.as_deref(), cli.json),
        Commands::Ledger { subcommand } => cmd::ledger::run(&root, subcommand, cli.json),
        Commands::Snapshot { subcommand } => cmd::snapshot::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
