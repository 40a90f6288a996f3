use anyhow::Result;
use chrono::DateTime;
use clap::Parser;

use super::{SubCommandExtend, open_catalog};
use crate::catalog::{ImageItem, PageParams, PageRequest};
use crate::config::{Opts, OutputFormat, PageOptions};
use crate::db::Status;

#[derive(Parser, Debug, Clone)]
pub struct ImagesCommand {
    #[command(flatten)]
    pub page: PageOptions,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ImagesCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        // 参数错误在打开数据库之前返回
        let request = PageRequest::try_from(PageParams::from(&self.page))?;
        let catalog = open_catalog(opts).await?;
        let items = catalog.page(&request).await?;
        print_items(&items, self.output_format)
    }
}

fn print_items(items: &[ImageItem], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items)?);
        }
        OutputFormat::Table => {
            for item in items {
                let status = Status::from_code(item.status).map_or("?", Status::name);
                let updated_at = DateTime::from_timestamp(item.updated_at, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    item.id, status, item.size, item.label_name, updated_at
                );
            }
        }
    }
    Ok(())
}
