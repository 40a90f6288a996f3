use std::collections::BTreeMap;

use crate::db::{Counts, DocumentStore, ImageRecord, SizeBucket, Status, Transaction};
use crate::error::Result;

/// 各尺寸分档的计数账本
///
/// 读取是事务外的快照读，只用于展示；增量只能在调用方管理的事务中进行。
pub struct CounterLedger<'a, S> {
    store: &'a S,
}

impl<'a, S: DocumentStore> CounterLedger<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// 计数文档不存在时返回全零，读取不会创建文档
    pub async fn get(&self, bucket: SizeBucket) -> Result<Counts> {
        Ok(self.store.get_counts(bucket).await?.unwrap_or_default())
    }

    pub async fn get_all(&self) -> Result<Vec<(SizeBucket, Counts)>> {
        let mut all = Vec::with_capacity(SizeBucket::ALL.len());
        for bucket in SizeBucket::ALL {
            all.push((bucket, self.get(bucket).await?));
        }
        Ok(all)
    }

    pub fn increment(tx: &mut S::Tx, bucket: SizeBucket, status: Status, delta: i64) {
        tx.increment(bucket, status, delta);
    }

    /// 将记录从 `old` 变为 `new` 所需的全部计数增量写入事务
    ///
    /// 新旧状态、尺寸标记都相同时不产生任何增量。
    pub fn apply(tx: &mut S::Tx, old: Option<&ImageRecord>, new: Option<&ImageRecord>) -> usize {
        let deltas = deltas(old, new);
        for (&(bucket, status), &delta) in &deltas {
            Self::increment(tx, bucket, status, delta);
        }
        deltas.len()
    }
}

/// 计算合并后非零的计数增量
pub fn deltas(
    old: Option<&ImageRecord>,
    new: Option<&ImageRecord>,
) -> BTreeMap<(SizeBucket, Status), i64> {
    let mut deltas = BTreeMap::new();
    if let Some(old) = old {
        for bucket in old.buckets() {
            *deltas.entry((bucket, old.status)).or_insert(0) -= 1;
        }
    }
    if let Some(new) = new {
        for bucket in new.buckets() {
            *deltas.entry((bucket, new.status)).or_insert(0) += 1;
        }
    }
    deltas.retain(|_, delta| *delta != 0);
    deltas
}
