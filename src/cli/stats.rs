use anyhow::Result;
use clap::Parser;
use serde_json::{Map, Value};

use super::{SubCommandExtend, open_catalog};
use crate::config::{Opts, OutputFormat};
use crate::db::{SizeBucket, Status};

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {
    /// 只显示该尺寸分档：256、512 或 1024
    #[arg(long)]
    pub bucket: Option<SizeBucket>,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = open_catalog(opts).await?;
        let stats = catalog.stats(self.bucket).await?;

        match self.output_format {
            OutputFormat::Json => {
                let mut map = Map::new();
                for (bucket, counts) in &stats {
                    map.insert(bucket.key().to_string(), serde_json::to_value(counts)?);
                }
                println!("{}", serde_json::to_string_pretty(&Value::Object(map))?);
            }
            OutputFormat::Table => {
                let header = Status::ALL.iter().map(|s| s.name()).collect::<Vec<_>>().join("\t");
                println!("size\t{header}\ttotal");
                for (bucket, counts) in &stats {
                    let values = Status::ALL
                        .iter()
                        .map(|&s| counts.get(s).to_string())
                        .collect::<Vec<_>>()
                        .join("\t");
                    println!("{bucket}\t{values}\t{}", counts.total());
                }
            }
        }
        Ok(())
    }
}
