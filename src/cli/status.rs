use anyhow::Result;
use clap::Parser;
use log::info;

use super::{SubCommandExtend, open_catalog};
use crate::config::Opts;
use crate::db::Status;

#[derive(Parser, Debug, Clone)]
pub struct StatusCommand {
    /// 图片 ID
    pub id: String,
    /// 新状态：Ready、NG、Pending、OK、Predicted 或对应的编码
    pub status: Status,
}

impl SubCommandExtend for StatusCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = open_catalog(opts).await?;
        let transition = catalog.coordinator().set_status(&self.id, self.status).await?;
        info!("修改了 {} 个计数", transition.counters);
        if let (Some(old), Some(new)) = (transition.old, transition.new) {
            println!("{}\t{} -> {}", transition.id, old, new);
        }
        Ok(())
    }
}
