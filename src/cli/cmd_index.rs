use super::utils;
use anyhow::{Result, bail};
use artifact_index::{BundleArchive, BundleMeta, ManifestArchive};
use clap::{Args, ValueHint};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Args)]
#[command(
    about = "Merge a bundle into its release and debug-id indexes",
    long_about = "Read a bundle's manifest.json and merge its files into every index the bundle
belongs to: the URL index of each project's release (when --release is given)
and each project's debug-id index (when the manifest carries debug ids).

Re-indexing a bundle with an unchanged timestamp leaves the indexes untouched.
Re-indexing with a new timestamp moves the bundle to its new place in every
list.",
    help_template = crate::clap_help!(
        examples: "  # Index bundle 17 for release 1.0 of project 4\n  \
                   {bin} index manifest.json --bundle-id 17 --project 4 --release 1.0\n\n  \
                   # Several projects, explicit upload time\n  \
                   {bin} index manifest.json --bundle-id 17 --project 4 --project 5 \\\n      \
                   --release 1.0 --dist web --timestamp 2024-03-01T12:00:00Z"
    )
)]
pub struct IndexCommand {
    /// Bundle manifest.json
    #[arg(value_hint = ValueHint::FilePath)]
    pub manifest: PathBuf,

    /// Bundle id
    #[arg(short, long)]
    pub bundle_id: i64,

    /// Bundle timestamp, RFC 3339 (defaults to now)
    #[arg(short, long)]
    pub timestamp: Option<String>,

    /// Project id (repeatable)
    #[arg(short, long = "project", required = true)]
    pub projects: Vec<u64>,

    /// Release the bundle was uploaded for
    #[arg(short, long)]
    pub release: Option<String>,

    /// Distribution of the release
    #[arg(short, long, requires = "release")]
    pub dist: Option<String>,

    /// Seconds to wait for an index lock
    #[arg(long, default_value = "10")]
    pub lock_timeout: u64,
}

pub fn run(cmd: IndexCommand, dir: PathBuf, quiet: bool) -> Result<()> {
    let indexer = utils::create_indexer(dir, cmd.lock_timeout)?;
    let archive = ManifestArchive::load(&cmd.manifest)?;
    let bundle_meta = BundleMeta::new(cmd.bundle_id, utils::parse_timestamp(cmd.timestamp.as_deref())?);

    let has_debug_ids = !archive.get_all_debug_ids().is_empty();
    let identifiers = indexer.mark_bundle_for_flat_file_indexing(
        bundle_meta.id,
        has_debug_ids,
        &cmd.projects,
        cmd.release.as_deref(),
        cmd.dist.as_deref(),
    )?;

    if identifiers.is_empty() {
        bail!("Nothing to index: pass --release or upload a bundle with debug ids");
    }

    let start = Instant::now();
    for identifier in &identifiers {
        indexer.update_artifact_bundle_index(&bundle_meta, &archive, identifier)?;
        if !quiet {
            eprintln!("  ✓ {}", identifier);
        }
    }

    if !quiet {
        let stats = indexer.stats();
        eprintln!(
            "\n✓ Indexed bundle {} into {} indexes in {:?}",
            bundle_meta.id,
            identifiers.len(),
            start.elapsed()
        );
        if stats.duplicated_indexing > 0 {
            eprintln!("  Already indexed: {}", stats.duplicated_indexing);
        }
    }

    Ok(())
}
