#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error};
use recall_core::config::ConfigParseError;
use recall_core::error::ErrorCode;
use recall_core::lock::LockError;
use std::env;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "recall: keep the content of messages their sender removes",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Config file (defaults to the user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store database, overriding `storage.path` from config.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        OutputMode::from_json_flag(self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Replay a recorded host feed through the engine",
        after_help = "EXAMPLES:\n    # Replay a feed as user 100\n    recall replay feed.jsonl --viewer 100\n\n    # Pin the clock for reproducible purges\n    recall replay feed.jsonl --viewer 100 --now 1708012200000"
    )]
    Replay(cmd::replay::ReplayArgs),

    #[command(
        about = "Show the removal notice for a message",
        after_help = "EXAMPLES:\n    # Resolve a message as user 100\n    recall show mid.42 --viewer 100\n\n    # Name the author as the viewer's nickname for them\n    recall show mid.42 --viewer 100 --name Bob"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        about = "List retained (or active) messages",
        after_help = "EXAMPLES:\n    # Ten newest retained messages\n    recall list -n 10\n\n    # Active set of one thread, as JSON\n    recall list --active --thread t1 --json"
    )]
    List(cmd::list::ListArgs),

    #[command(about = "Run the purge policy against the store")]
    Purge(cmd::purge::PurgeArgs),

    #[command(about = "Show store counts and health")]
    Stats(cmd::stats::StatsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RECALL_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "recall=debug,recall_core=debug,info"
        } else {
            "recall=info,recall_core=info,warn"
        })
    });

    let format = env::var("RECALL_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    // Logs go to stderr so stdout stays parseable with --json.
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

fn run(cli: &Cli, output: OutputMode) -> anyhow::Result<()> {
    let ctx = cmd::Context::resolve(cli.config.as_deref(), cli.store.as_deref(), output)?;
    debug!(store = %ctx.store_path.display(), "resolved store path");

    match &cli.command {
        Commands::Replay(args) => cmd::replay::run_replay(args, &ctx),
        Commands::Show(args) => cmd::show::run_show(args, &ctx),
        Commands::List(args) => cmd::list::run_list(args, &ctx),
        Commands::Purge(args) => cmd::purge::run_purge(args, &ctx),
        Commands::Stats(args) => cmd::stats::run_stats(args, &ctx),
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }
    let output = cli.output_mode();

    let result = run(&cli, output);
    if let Err(err) = &result
        && let Some(code) = error_code(err)
    {
        render_error(output, &CliError::from_code(code, format!("{err:#}")))?;
    }
    result
}

/// Stable code for errors that carry one; the rest are reported as is.
fn error_code(err: &anyhow::Error) -> Option<ErrorCode> {
    if let Some(lock) = err.downcast_ref::<LockError>() {
        return Some(lock.code());
    }
    err.downcast_ref::<ConfigParseError>()
        .map(ConfigParseError::code)
}
