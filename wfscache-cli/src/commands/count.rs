//! `wfscache count`: report the layer's feature count.

use clap::Args;

use crate::error::CliError;
use crate::runner::CliRunner;

#[derive(Debug, Args)]
pub struct CountArgs {
    /// Data source descriptor
    #[arg(long)]
    pub uri: String,

    /// Only use what is known locally; never ask the server
    #[arg(long)]
    pub local: bool,
}

pub async fn run(runner: &CliRunner, args: CountArgs) -> Result<(), CliError> {
    runner.log_startup("count");
    let uri = runner.parse_uri(&args.uri)?;
    let cache = runner.open_cache(uri).await?;

    let count = cache.get_feature_count(!args.local).await?;
    if count.exact {
        println!("{}", count.value);
    } else {
        println!("{} (estimate: features cached so far)", count.value);
    }
    Ok(())
}
