use anyhow::{Result, anyhow};
use clap::Parser;

use super::{SubCommandExtend, open_catalog};
use crate::config::Opts;
use crate::db::Status;

#[derive(Parser, Debug, Clone)]
pub struct AuditCommand {
    /// 用统计值覆盖不一致的计数
    #[arg(long)]
    pub repair: bool,
}

impl SubCommandExtend for AuditCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = open_catalog(opts).await?;
        let report = catalog.audit(self.repair).await?;

        println!("scanned {}", report.scanned);
        for entry in &report.buckets {
            let mark = if entry.is_consistent() { "ok" } else { "MISMATCH" };
            println!("{}\t{mark}", entry.bucket);
            for status in Status::ALL {
                let (stored, actual) = (entry.stored.get(status), entry.actual.get(status));
                if stored != actual {
                    println!("  {status}\tstored {stored}\tactual {actual}");
                }
            }
        }

        if !report.is_consistent() && !report.repaired {
            return Err(anyhow!("计数与记录不一致，使用 --repair 修复"));
        }
        Ok(())
    }
}
