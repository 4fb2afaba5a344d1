//! Cairn CLI: generates frozen build graphs, reports which nodes are out of
//! date and dumps any of the frozen files for diagnosis.

#![warn(missing_docs)]

mod generate;
mod inspect;
mod project;
mod status;

use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Cairn: frozen build graphs and incremental build caches.
#[derive(Parser, Debug)]
#[command(name = "cairn", version, about = "Cairn build cache tools")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `cairn.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a frozen graph from a JSON node description.
    Generate(GenerateArgs),
    /// List the nodes that would run in the next build.
    Status(StatusArgs),
    /// Dump the contents of a .dag, .state, .scancache or .digestcache file.
    Inspect(InspectArgs),
}

/// Arguments for `cairn generate`.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// JSON graph description.
    pub graph: String,

    /// Output path (default: `<cache dir>/build.dag`).
    #[arg(short, long)]
    pub output: Option<String>,
}

/// Arguments for `cairn status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Graph to check (default: `<cache dir>/build.dag`).
    #[arg(long)]
    pub dag: Option<String>,
}

/// Arguments for `cairn inspect`.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// The file to dump.
    pub file: String,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

/// Installs the stderr log subscriber. `RUST_LOG` overrides the flags.
fn init_logging(global: &GlobalArgs) {
    let level = if global.quiet {
        "error"
    } else if global.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };
    init_logging(&global);

    let result = match cli.command {
        Command::Generate(ref args) => generate::run(args, &global),
        Command::Status(ref args) => status::run(args, &global),
        Command::Inspect(ref args) => inspect::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
