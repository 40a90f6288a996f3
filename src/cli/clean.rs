use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use tokio::sync::mpsc::channel;
use tokio::task::JoinHandle;

use super::{SubCommandExtend, open_catalog};
use crate::config::Opts;
use crate::db::{Field, Filter, SizeBucket, Status, Value};
use crate::error::CatalogError;
use crate::jobs::{ItemOutcome, WorkerPool, cancel_on_ctrl_c};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {
    /// 只删除该标签的图片
    #[arg(long, value_name = "LABEL")]
    pub name: Option<String>,
    /// 只删除该状态的图片
    #[arg(long)]
    pub status: Option<Status>,
    /// 只删除小于该尺寸分档的图片
    #[arg(long, value_name = "SIZE")]
    pub below: Option<SizeBucket>,
    /// 并发删除的任务数量
    #[arg(short, long, default_value_t = num_cpus::get())]
    pub workers: usize,
    /// 每次扫描读取的记录数
    #[arg(long, default_value_t = 200)]
    pub batch_size: usize,
    /// 只列出将被删除的图片
    #[arg(long)]
    pub dry_run: bool,
}

impl CleanCommand {
    fn filters(&self) -> Result<Vec<Filter>, CatalogError> {
        let mut filters = vec![];
        if let Some(name) = &self.name {
            filters.push(Filter::eq(Field::LabelName, Value::Text(name.clone()))?);
        }
        if let Some(status) = self.status {
            filters.push(Filter::eq(Field::Status, Value::Int(status.code()))?);
        }
        if let Some(bucket) = self.below {
            filters.push(Filter::eq(Field::size_flag(bucket), Value::Bool(false))?);
        }
        Ok(filters)
    }
}

impl SubCommandExtend for CleanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let filters = self.filters()?;
        if filters.is_empty() {
            return Err(anyhow!("至少需要指定 --name、--status、--below 中的一个"));
        }
        let catalog = Arc::new(open_catalog(opts).await?);

        if self.dry_run {
            let mut scanner = catalog.scanner(filters, self.batch_size);
            let mut total = 0;
            while let Some(batch) = scanner.next_batch().await? {
                total += batch.len();
                for record in batch {
                    println!("{}\t{}\t{}\t{}", record.id, record.status, record.size, record.label_name);
                }
            }
            info!("共 {total} 张图片将被删除");
            return Ok(());
        }

        let cancel = cancel_on_ctrl_c();
        let pb = ProgressBar::new(0).with_style(pb_style());

        let (tx, rx) = channel(self.batch_size.max(1));
        let producer: JoinHandle<Result<usize>> = tokio::spawn({
            let catalog = catalog.clone();
            let cancel = cancel.clone();
            let pb = pb.clone();
            let batch_size = self.batch_size;
            async move {
                let mut scanner = catalog.scanner(filters, batch_size);
                let mut total = 0;
                while let Some(batch) = scanner.next_batch().await? {
                    if *cancel.borrow() {
                        break;
                    }
                    total += batch.len();
                    pb.inc_length(batch.len() as u64);
                    for record in batch {
                        if tx.send(record.id).await.is_err() {
                            return Ok(total);
                        }
                    }
                }
                Ok(total)
            }
        });

        let pool = WorkerPool::new(self.workers, cancel, pb.clone());
        let report = pool
            .run(rx, move |id: String| {
                let catalog = catalog.clone();
                async move {
                    match catalog.coordinator().delete(&id).await {
                        Ok(_) => Ok(ItemOutcome::Done),
                        // 已被其他调用方删除
                        Err(CatalogError::NotFound(_)) => Ok(ItemOutcome::Skipped),
                        Err(err) => Err(anyhow::Error::from(err).context(format!("删除失败: {id}"))),
                    }
                }
            })
            .await?;
        let scanned = producer.await??;

        pb.finish_with_message("清理完成");
        info!("扫描 {scanned} 张，删除 {} 张，失败 {} 张", report.succeeded, report.failed);
        println!("deleted {}, skipped {}, failed {}", report.succeeded, report.skipped, report.failed);

        if report.failed > 0 {
            return Err(anyhow!("{} 张图片删除失败", report.failed));
        }
        Ok(())
    }
}
