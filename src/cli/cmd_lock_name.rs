use super::utils::IdentifierArgs;
use anyhow::Result;
use clap::Args;

#[derive(Args)]
#[command(
    about = "Print the lock name and key hash of an index",
    help_template = crate::clap_help!(
        examples: "  {bin} lock-name --project 4 --release 1.0 --dist web"
    )
)]
pub struct LockNameCommand {
    #[command(flatten)]
    pub target: IdentifierArgs,
}

pub fn run(cmd: LockNameCommand) -> Result<()> {
    let identifier = cmd.target.identifier();
    println!("{}", identifier.lock_name());
    println!("{}", identifier.key_hash());
    Ok(())
}
