use clap::Parser;

use imcatalog::cli::SubCommandExtend;
use imcatalog::config::{Opts, SubCommand};
use imcatalog::metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    let result = match &opts.subcmd {
        SubCommand::Images(config) => config.run(&opts).await,
        SubCommand::Status(config) => config.run(&opts).await,
        SubCommand::Remove(config) => config.run(&opts).await,
        SubCommand::Stats(config) => config.run(&opts).await,
        SubCommand::Ingest(config) => config.run(&opts).await,
        SubCommand::Clean(config) => config.run(&opts).await,
        SubCommand::Audit(config) => config.run(&opts).await,
    };

    if let Some(path) = &opts.metrics_file {
        metrics::dump(path)?;
    }

    result
}
