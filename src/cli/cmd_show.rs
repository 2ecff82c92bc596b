use super::utils::{self, IdentifierArgs};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
#[command(
    about = "Print a stored index",
    help_template = crate::clap_help!(
        examples: "  # Release index as JSON\n  \
                   {bin} show --project 4 --release 1.0\n\n  \
                   # Debug-id index summary\n  \
                   {bin} show --project 4 --summary"
    )
)]
pub struct ShowCommand {
    #[command(flatten)]
    pub target: IdentifierArgs,

    /// Print counts instead of the JSON blob
    #[arg(short, long)]
    pub summary: bool,
}

pub fn run(cmd: ShowCommand, dir: PathBuf) -> Result<()> {
    let identifier = cmd.target.identifier();
    let indexer = utils::create_indexer(dir, 0)?;
    let index = indexer.load_index(&identifier)?;

    if cmd.summary {
        println!("Index:      {}", identifier);
        println!("Lock:       {}", identifier.lock_name());
        println!("Bundles:    {}", index.bundles().len());
        println!("URLs:       {}", index.files_by_url().len());
        println!("Debug ids:  {}", index.files_by_debug_id().len());
        if let Some(newest) = index.bundles().iter().max_by_key(|b| (b.timestamp, b.id)) {
            println!("Newest:     {} ({})", newest.id, newest.timestamp.to_rfc3339());
        }
        return Ok(());
    }

    let value: serde_json::Value = serde_json::from_str(&index.to_json())?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
