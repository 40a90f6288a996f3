use anyhow::Result;
use clap::Parser;

use super::{SubCommandExtend, open_catalog};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct RemoveCommand {
    /// 图片 ID
    pub id: String,
}

impl SubCommandExtend for RemoveCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = open_catalog(opts).await?;
        let transition = catalog.coordinator().delete(&self.id).await?;
        println!("已删除 {}", transition.id);
        Ok(())
    }
}
