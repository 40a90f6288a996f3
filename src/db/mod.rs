use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;

use log::info;
use sqlx::{SqlitePool, sqlite::*};

pub mod memory;
pub mod model;
pub mod query;
pub mod sqlite;

pub use memory::MemoryStore;
pub use model::*;
pub use query::*;
pub use sqlite::SqliteStore;

use crate::error::StoreError;

pub type Database = SqlitePool;

pub async fn init_db(filename: impl AsRef<Path>) -> Result<Database, StoreError> {
    let filename = filename.as_ref();
    info!("初始化数据库连接: {}", filename.display());

    let options = SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .filename(filename)
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;

    info!("检查数据库迁移");
    sqlx::migrate!().run(&pool).await?;

    Ok(pool)
}

/// 文档存储
///
/// 点读写与查询都是非事务的快照读；需要原子性的修改必须通过 [`DocumentStore::begin`] 开启的事务完成。
pub trait DocumentStore: Send + Sync + 'static {
    type Tx: Transaction;

    fn get(&self, id: &str)
    -> impl Future<Output = Result<Option<ImageRecord>, StoreError>> + Send;

    /// 直接写入记录，不维护计数
    fn put(&self, record: &ImageRecord) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 直接删除记录，不维护计数
    fn delete(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn query(
        &self,
        query: &StoreQuery,
    ) -> impl Future<Output = Result<Vec<ImageRecord>, StoreError>> + Send;

    /// 读取计数文档，不存在时返回 `None`
    fn get_counts(
        &self,
        bucket: SizeBucket,
    ) -> impl Future<Output = Result<Option<Counts>, StoreError>> + Send;

    /// 覆盖计数文档，仅用于离线校对
    fn set_counts(
        &self,
        bucket: SizeBucket,
        counts: &Counts,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;
}

/// 乐观事务
///
/// 读取时记录版本，写入先缓存，提交时校验所有读取过的版本；任一版本变化则返回
/// [`StoreError::Conflict`]，调用方应当丢弃事务并整体重试。
pub trait Transaction: Send {
    fn get(
        &mut self,
        id: &str,
    ) -> impl Future<Output = Result<Option<ImageRecord>, StoreError>> + Send;

    fn put(&mut self, record: ImageRecord);

    fn delete(&mut self, id: &str);

    /// 原子地增加计数，计数文档不存在时自动创建
    fn increment(&mut self, bucket: SizeBucket, status: Status, delta: i64);

    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// 事务中缓存的读集合与写集合
#[derive(Debug, Default)]
pub struct TxBuffer {
    /// 读取过的记录版本，`None` 表示读取时不存在
    reads: HashMap<String, Option<i64>>,
    /// 待写入的记录，`None` 表示删除
    writes: BTreeMap<String, Option<ImageRecord>>,
    increments: BTreeMap<(SizeBucket, Status), i64>,
}

impl TxBuffer {
    /// 事务内先读自己的写入
    pub fn buffered(&self, id: &str) -> Option<Option<ImageRecord>> {
        self.writes.get(id).cloned()
    }

    /// 只记录第一次读取到的版本
    pub fn observe(&mut self, id: &str, version: Option<i64>) {
        self.reads.entry(id.to_owned()).or_insert(version);
    }

    pub fn put(&mut self, record: ImageRecord) {
        self.writes.insert(record.id.clone(), Some(record));
    }

    pub fn delete(&mut self, id: &str) {
        self.writes.insert(id.to_owned(), None);
    }

    pub fn increment(&mut self, bucket: SizeBucket, status: Status, delta: i64) {
        *self.increments.entry((bucket, status)).or_default() += delta;
    }

    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty() && self.increments.values().all(|&d| d == 0)
    }

    pub fn reads(&self) -> impl Iterator<Item = (&str, Option<i64>)> {
        self.reads.iter().map(|(id, version)| (id.as_str(), *version))
    }

    pub fn writes(&self) -> impl Iterator<Item = (&str, Option<&ImageRecord>)> {
        self.writes.iter().map(|(id, record)| (id.as_str(), record.as_ref()))
    }

    /// 合并后非零的计数增量
    pub fn increments(&self) -> impl Iterator<Item = (SizeBucket, Status, i64)> + '_ {
        self.increments
            .iter()
            .filter(|(_, delta)| **delta != 0)
            .map(|(&(bucket, status), &delta)| (bucket, status, delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_are_netted() {
        let mut buffer = TxBuffer::default();
        buffer.increment(SizeBucket::S0256, Status::Ready, 1);
        buffer.increment(SizeBucket::S0256, Status::Ready, -1);
        buffer.increment(SizeBucket::S0512, Status::OK, 1);
        assert_eq!(buffer.increments().collect::<Vec<_>>(), vec![(SizeBucket::S0512, Status::OK, 1)]);
        assert!(!buffer.is_read_only());
    }

    #[test]
    fn first_observed_version_wins() {
        let mut buffer = TxBuffer::default();
        buffer.observe("a", Some(1));
        buffer.observe("a", Some(2));
        assert_eq!(buffer.reads().collect::<Vec<_>>(), vec![("a", Some(1))]);
        assert!(buffer.is_read_only());
    }
}
