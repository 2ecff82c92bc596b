use super::utils::{self, IdentifierArgs};
use anyhow::{Result, bail};
use artifact_index::{archive, constants};
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
#[command(
    about = "List the bundles containing a URL or debug id, newest first",
    help_template = crate::clap_help!(
        examples: "  # Bundles with ~/app.js for release 1.0\n  \
                   {bin} lookup --project 4 --release 1.0 --url '~/app.js'\n\n  \
                   # Bundles with a debug id\n  \
                   {bin} lookup --project 4 --debug-id 2f259f80-58b7-44cb-d7cd-de1505e7e718"
    )
)]
pub struct LookupCommand {
    #[command(flatten)]
    pub target: IdentifierArgs,

    /// File URL (release indexes)
    #[arg(long, conflicts_with = "debug_id", required_unless_present = "debug_id")]
    pub url: Option<String>,

    /// Debug id (debug-id indexes)
    #[arg(long)]
    pub debug_id: Option<String>,

    /// Maximum number of bundles to print
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,
}

pub fn run(cmd: LookupCommand, dir: PathBuf) -> Result<()> {
    let identifier = cmd.target.identifier();
    let indexer = utils::create_indexer(dir, 0)?;
    let index = indexer.load_index(&identifier)?;

    let bundles = match (&cmd.url, &cmd.debug_id) {
        (Some(url), _) => {
            if !identifier.is_indexing_by_release() {
                bail!("--url requires --release");
            }
            index.bundles_for_url(url)
        }
        (None, Some(debug_id)) => {
            if identifier.is_indexing_by_release() {
                bail!("--debug-id cannot be combined with --release");
            }
            index.bundles_for_debug_id(&archive::normalize_debug_id(debug_id))
        }
        (None, None) => bail!("Pass --url or --debug-id"),
    };

    if bundles.is_empty() {
        eprintln!("No bundles found in {}", identifier);
        return Ok(());
    }

    for bundle in bundles.into_iter().take(cmd.limit) {
        println!("{}\t{}", constants::bundle_token(bundle.id), bundle.timestamp.to_rfc3339());
    }

    Ok(())
}
