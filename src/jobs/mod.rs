//! 批处理任务：共享队列上的固定数量 worker，支持中断

pub mod ingest;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use indicatif::ProgressBar;
use log::{debug, warn};
use tokio::sync::mpsc::Receiver;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// 单个任务项的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Done,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl JobReport {
    pub fn processed(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    fn merge(&mut self, other: JobReport) {
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// 收到 Ctrl-C 后置为 `true`
pub fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，等待进行中的任务完成");
            let _ = tx.send(true);
        }
    });
    rx
}

pub struct WorkerPool {
    workers: usize,
    cancel: watch::Receiver<bool>,
    pb: ProgressBar,
}

impl WorkerPool {
    pub fn new(workers: usize, cancel: watch::Receiver<bool>, pb: ProgressBar) -> Self {
        Self { workers: workers.max(1), cancel, pb }
    }

    /// 消费队列直到队列关闭或收到取消信号
    ///
    /// 取消只在取出下一项之前检查，已经开始处理的任务项会正常完成。单项失败只记录日志，不会中止任务。
    pub async fn run<I, F, Fut>(&self, rx: Receiver<I>, handler: F) -> Result<JobReport>
    where
        I: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ItemOutcome>> + Send + 'static,
    {
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(handler);

        let tasks: Vec<JoinHandle<JobReport>> = (0..self.workers)
            .map(|index| {
                let rx = rx.clone();
                let handler = handler.clone();
                let mut cancel = self.cancel.clone();
                let pb = self.pb.clone();
                tokio::spawn(async move {
                    let mut report = JobReport::default();
                    loop {
                        let item = tokio::select! {
                            biased;
                            Ok(_) = cancel.wait_for(|cancelled| *cancelled) => {
                                debug!("worker {index} 已取消");
                                break;
                            }
                            item = async { rx.lock().await.recv().await } => item,
                        };
                        let Some(item) = item else {
                            break;
                        };
                        match handler(item).await {
                            Ok(ItemOutcome::Done) => report.succeeded += 1,
                            Ok(ItemOutcome::Skipped) => report.skipped += 1,
                            Err(err) => {
                                report.failed += 1;
                                warn!("{err:#}");
                            }
                        }
                        pb.inc(1);
                    }
                    report
                })
            })
            .collect();

        let mut report = JobReport::default();
        for task in tasks {
            report.merge(task.await?);
        }
        Ok(report)
    }
}
