use super::utils;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
#[command(
    about = "Remove a bundle from every index",
    help_template = crate::clap_help!(
        examples: "  # Remove bundle 17 everywhere\n  \
                   {bin} remove --bundle-id 17"
    )
)]
pub struct RemoveCommand {
    /// Bundle id
    #[arg(short, long)]
    pub bundle_id: i64,

    /// Seconds to wait for each index lock
    #[arg(long, default_value = "10")]
    pub lock_timeout: u64,
}

pub fn run(cmd: RemoveCommand, dir: PathBuf, quiet: bool) -> Result<()> {
    let indexer = utils::create_indexer(dir, cmd.lock_timeout)?;
    let removed = indexer.remove_bundle_from_indexes(cmd.bundle_id)?;
    let stats = indexer.stats();

    if !quiet {
        eprintln!("✓ Removed bundle {} from {} indexes", cmd.bundle_id, removed);
    }
    if stats.removal_would_block > 0 {
        eprintln!(
            "⚠️  {} indexes were locked and still reference the bundle; run again later",
            stats.removal_would_block
        );
    }
    if stats.unreadable_indexes > 0 {
        eprintln!(
            "⚠️  {} indexes could not be read and still reference the bundle",
            stats.unreadable_indexes
        );
    }

    Ok(())
}
