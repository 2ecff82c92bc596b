use anyhow::Result;
use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

// CLI Commands (cmd_ prefix)
mod cmd_index;
mod cmd_lock_name;
mod cmd_lookup;
mod cmd_remove;
mod cmd_show;

// Helper modules (no cmd_ prefix)
mod logger;
mod utils;

use artifact_index::constants::{BINARY_NAME, VERSION};

#[derive(Parser)]
#[command(name = BINARY_NAME, bin_name = BINARY_NAME)]
#[command(version = VERSION)]
#[command(about = concat!("artifact-index v", env!("CARGO_PKG_VERSION"), " - flat-file indexes of artifact bundles"))]
#[command(long_about = concat!(
    "artifact-index v", env!("CARGO_PKG_VERSION"), " - flat-file indexes of artifact bundles\n\n",
    "Maintains per-release URL indexes and per-project debug-id indexes that map\n",
    "each file to the artifact bundles containing it, newest bundle last.\n",
    "Indexes are stored as JSON blobs in the store directory."
))]
#[command(propagate_version = true)]
pub struct Cli {
    /// Store directory
    #[arg(short = 'C', long = "dir", global = true, default_value = ".", value_hint = ValueHint::DirPath)]
    dir: PathBuf,

    /// Only print errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Index(cmd_index::IndexCommand),
    Remove(cmd_remove::RemoveCommand),
    Lookup(cmd_lookup::LookupCommand),
    Show(cmd_show::ShowCommand),
    LockName(cmd_lock_name::LockNameCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logger::init_logger(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Index(cmd) => cmd_index::run(cmd, cli.dir, cli.quiet)?,
        Commands::Remove(cmd) => cmd_remove::run(cmd, cli.dir, cli.quiet)?,
        Commands::Lookup(cmd) => cmd_lookup::run(cmd, cli.dir)?,
        Commands::Show(cmd) => cmd_show::run(cmd, cli.dir)?,
        Commands::LockName(cmd) => cmd_lock_name::run(cmd)?,
    }

    Ok(())
}

/// Macro to create clap help templates with examples
/// This works around the limitation that {bin} doesn't work in after_help
#[macro_export]
macro_rules! clap_help {
    (examples: $examples:literal) => {{
        const BIN: &str = env!("CARGO_PKG_NAME");
        concat!(
            "{about-with-newline}\n",
            "{usage-heading} {usage}\n\n",
            "{all-args}\n\n",
            "Examples:\n",
            $examples
        )
        .replace("{bin}", BIN)
    }};
}
