use std::collections::BTreeMap;

use log::{info, warn};

use super::scan::Scanner;
use crate::db::{Counts, DocumentStore, SizeBucket};
use crate::error::Result;

const AUDIT_BATCH_SIZE: usize = 500;

/// 单个尺寸分档的校对结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketAudit {
    pub bucket: SizeBucket,
    /// 计数文档中的值
    pub stored: Counts,
    /// 实际记录的统计值
    pub actual: Counts,
}

impl BucketAudit {
    pub fn is_consistent(&self) -> bool {
        self.stored == self.actual
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub scanned: usize,
    pub buckets: Vec<BucketAudit>,
    pub repaired: bool,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.buckets.iter().all(BucketAudit::is_consistent)
    }
}

/// 遍历全部记录重新统计并与计数文档比较
///
/// 统计过程不在事务中，只有在没有其他写入时结果才有意义；`repair` 会用统计值覆盖计数文档。
pub async fn audit<S: DocumentStore>(store: &S, repair: bool) -> Result<AuditReport> {
    let mut actual = SizeBucket::ALL
        .into_iter()
        .map(|bucket| (bucket, Counts::default()))
        .collect::<BTreeMap<_, _>>();

    let mut scanned = 0;
    let mut scanner = Scanner::new(store, vec![], AUDIT_BATCH_SIZE);
    while let Some(batch) = scanner.next_batch().await? {
        scanned += batch.len();
        for record in &batch {
            for bucket in record.buckets() {
                actual.entry(bucket).or_default().add(record.status, 1);
            }
        }
    }
    info!("共统计 {scanned} 条记录");

    let mut buckets = Vec::with_capacity(actual.len());
    for (bucket, actual) in actual {
        let stored = store.get_counts(bucket).await?.unwrap_or_default();
        buckets.push(BucketAudit { bucket, stored, actual });
    }

    let mut repaired = false;
    for entry in buckets.iter().filter(|b| !b.is_consistent()) {
        warn!("{} 计数不一致: 记录 {:?}, 实际 {:?}", entry.bucket, entry.stored, entry.actual);
        if repair {
            store.set_counts(entry.bucket, &entry.actual).await?;
            repaired = true;
        }
    }

    Ok(AuditReport { scanned, buckets, repaired })
}
