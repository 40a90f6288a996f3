use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use regex::Regex;
use tokio::sync::mpsc::channel;

use super::{SubCommandExtend, open_catalog};
use crate::catalog::CreateOutcome;
use crate::config::Opts;
use crate::jobs::ingest::{load, scan_directory};
use crate::jobs::{ItemOutcome, WorkerPool, cancel_on_ctrl_c};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct IngestCommand {
    /// 关键点文件所在目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "json")]
    pub suffix: String,
    /// 并发写入的任务数量
    #[arg(short, long, default_value_t = num_cpus::get())]
    pub workers: usize,
    /// 图片地址前缀，图片地址为 `{前缀}/{ID}`
    #[arg(long, value_name = "URL", default_value = "/images")]
    pub image_base_url: String,
    /// 如果图片已添加，是否覆盖旧的记录
    #[arg(long)]
    pub overwrite: bool,
}

impl SubCommandExtend for IngestCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let re_suf = format!("(?i)^({})$", self.suffix.replace(',', "|"));
        let re_suf = Regex::new(&re_suf)?;
        let catalog = Arc::new(open_catalog(opts).await?);

        let entries = scan_directory(&self.path, &re_suf);
        let pb = ProgressBar::new(entries.len() as u64).with_style(pb_style());

        let (tx, rx) = channel(num_cpus::get() * 2);
        let producer = tokio::spawn(async move {
            for entry in entries {
                // 所有 worker 退出后队列关闭
                if tx.send(entry).await.is_err() {
                    break;
                }
            }
        });

        let pool = WorkerPool::new(self.workers, cancel_on_ctrl_c(), pb.clone());
        let base_url: Arc<str> = Arc::from(self.image_base_url.as_str());
        let overwrite = self.overwrite;
        let report = pool
            .run(rx, move |path: PathBuf| {
                let catalog = catalog.clone();
                let base_url = base_url.clone();
                async move {
                    let image = load(&path, &base_url).await?;
                    let outcome = catalog
                        .coordinator()
                        .create(image, overwrite)
                        .await
                        .with_context(|| format!("导入失败: {}", path.display()))?;
                    Ok::<_, anyhow::Error>(match outcome {
                        CreateOutcome::Created | CreateOutcome::Replaced => ItemOutcome::Done,
                        CreateOutcome::Exists => ItemOutcome::Skipped,
                    })
                }
            })
            .await?;
        producer.await?;

        pb.finish_with_message("导入完成");
        info!(
            "导入 {} 张，跳过 {} 张，失败 {} 张",
            report.succeeded, report.skipped, report.failed
        );
        println!("imported {}, skipped {}, failed {}", report.succeeded, report.skipped, report.failed);

        if report.failed > 0 {
            return Err(anyhow!("{} 个文件导入失败", report.failed));
        }
        Ok(())
    }
}
