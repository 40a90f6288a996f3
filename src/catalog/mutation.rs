use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use log::{debug, warn};
use rand::Rng;
use tokio::time::sleep;

use super::ledger::CounterLedger;
use crate::db::{DocumentStore, ImageRecord, ImageUpdate, NewImage, Status, Transaction};
use crate::error::{CatalogError, Result};
use crate::metrics;

/// 事务冲突时的重试策略，指数退避加随机抖动
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数，包含第一次
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后的等待时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1 << attempt.saturating_sub(1).min(16));
        let delay = exp.min(self.max_delay);
        let jitter = rand::rng().random_range(0..=delay.as_millis() as u64 / 2);
        delay + Duration::from_millis(jitter)
    }
}

/// 在事务中执行 `body`，冲突时丢弃整个事务并按策略重试
///
/// `body` 可能被执行多次，不能包含事务之外的副作用。
pub async fn run_in_transaction<S, T, F>(
    store: &S,
    policy: &RetryPolicy,
    op: &'static str,
    mut body: F,
) -> Result<T>
where
    S: DocumentStore,
    T: Send,
    F: for<'t> FnMut(&'t mut S::Tx) -> BoxFuture<'t, Result<T>> + Send,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut tx = store.begin().await?;
        let outcome = body(&mut tx).await;
        let result = match outcome {
            Ok(value) => tx.commit().await.map(|()| value).map_err(CatalogError::from),
            Err(err) => Err(err),
        };
        match result {
            Ok(value) => {
                metrics::inc_tx_commit(op);
                return Ok(value);
            }
            Err(err) if err.is_conflict() => {
                metrics::inc_tx_conflict(op);
                if attempt >= max_attempts {
                    metrics::inc_tx_exhausted(op);
                    warn!("{op}: 重试 {attempt} 次后仍然冲突: {err}");
                    return Err(CatalogError::ConflictExhausted { op, attempts: attempt });
                }
                let delay = policy.backoff(attempt);
                debug!("{op}: 第 {attempt} 次尝试冲突，{delay:?} 后重试: {err}");
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// 一次状态变化，`None` 表示记录不存在
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub id: String,
    pub old: Option<Status>,
    pub new: Option<Status>,
    /// 本次提交修改的计数字段数量
    pub counters: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// 已存在并被覆盖
    Replaced,
    /// 已存在，未做修改
    Exists,
}

/// 所有记录修改的唯一入口
///
/// 每次修改与对应的计数增量在同一个事务中提交，因此计数不会与记录集合产生偏差。
pub struct MutationCoordinator<'a, S> {
    store: &'a S,
    retry: RetryPolicy,
}

impl<'a, S: DocumentStore> MutationCoordinator<'a, S> {
    pub fn new(store: &'a S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// 新增记录，初始状态为 Ready
    ///
    /// 记录已存在时，`overwrite` 为真则用新数据覆盖并保留原有状态和创建时间，否则不做修改。
    pub async fn create(&self, new: NewImage, overwrite: bool) -> Result<CreateOutcome> {
        let record = ImageRecord::create(new, Utc::now());
        record.validate()?;

        run_in_transaction(self.store, &self.retry, "create", move |tx| {
            let mut record = record.clone();
            Box::pin(async move {
                let existing = tx.get(&record.id).await?;
                let outcome = match &existing {
                    Some(_) if !overwrite => return Ok(CreateOutcome::Exists),
                    Some(old) => {
                        record.status = old.status;
                        record.created_at = old.created_at;
                        CreateOutcome::Replaced
                    }
                    None => CreateOutcome::Created,
                };
                CounterLedger::<S>::apply(tx, existing.as_ref(), Some(&record));
                tx.put(record);
                Ok::<_, CatalogError>(outcome)
            })
        })
        .await
    }

    pub async fn set_status(&self, id: &str, status: Status) -> Result<Transition> {
        self.update(id, ImageUpdate::status(status)).await
    }

    /// 修改记录字段；状态不变时不做计数操作，但仍然写入记录
    pub async fn update(&self, id: &str, update: ImageUpdate) -> Result<Transition> {
        let id = id.to_owned();
        let transition = run_in_transaction(self.store, &self.retry, "update", move |tx| {
            let id = id.clone();
            let update = update.clone();
            Box::pin(async move {
                let old = tx.get(&id).await?.ok_or_else(|| CatalogError::NotFound(id.clone()))?;
                let mut new = old.clone();
                if let Some(status) = update.status {
                    new.status = status;
                }
                if let Some(label_name) = update.label_name {
                    new.label_name = label_name;
                }
                if let Some(meta) = update.meta {
                    new.meta = meta;
                }
                new.updated_at = Utc::now();
                let counters = CounterLedger::<S>::apply(tx, Some(&old), Some(&new));
                let transition =
                    Transition { id, old: Some(old.status), new: Some(new.status), counters };
                tx.put(new);
                Ok::<_, CatalogError>(transition)
            })
        })
        .await?;
        debug!("{}: {:?} -> {:?}", transition.id, transition.old, transition.new);
        Ok(transition)
    }

    pub async fn delete(&self, id: &str) -> Result<Transition> {
        let id = id.to_owned();
        run_in_transaction(self.store, &self.retry, "delete", move |tx| {
            let id = id.clone();
            Box::pin(async move {
                let old = tx.get(&id).await?.ok_or_else(|| CatalogError::NotFound(id.clone()))?;
                let counters = CounterLedger::<S>::apply(tx, Some(&old), None);
                tx.delete(&id);
                Ok::<_, CatalogError>(Transition { id, old: Some(old.status), new: None, counters })
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::TimeZone;
    use parking_lot::Mutex;

    use super::*;
    use crate::catalog::Catalog;
    use crate::db::memory::MemoryTransaction;
    use crate::db::{Counts, LANDMARK_COUNT, MemoryStore, SizeBucket, StoreQuery};
    use crate::error::StoreError;

    fn new_image(id: &str, size: u32) -> NewImage {
        NewImage {
            id: id.into(),
            image_url: format!("/images/{id}"),
            source_url: String::new(),
            photo_url: String::new(),
            size,
            parts: vec![[3, 4]; LANDMARK_COUNT],
            label_name: "carol".into(),
            published_at: Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
            meta: b"{}".to_vec(),
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    /// 前 `failures` 次提交返回冲突
    #[derive(Clone)]
    struct FlakyStore {
        inner: MemoryStore,
        failures: Arc<AtomicU32>,
    }

    struct FlakyTx {
        inner: MemoryTransaction,
        failures: Arc<AtomicU32>,
    }

    /// 第一个事务提交前，另一个调用方抢先修改同一条记录
    #[derive(Clone)]
    struct RivalStore {
        inner: MemoryStore,
        rival: Arc<Mutex<Option<(String, Status)>>>,
        begins: Arc<AtomicU32>,
    }

    struct RivalTx {
        inner: MemoryTransaction,
        store: MemoryStore,
        rival: Option<(String, Status)>,
    }

    macro_rules! delegate_store {
        () => {
            async fn get(&self, id: &str) -> Result<Option<ImageRecord>, StoreError> {
                self.inner.get(id).await
            }
            async fn put(&self, record: &ImageRecord) -> Result<(), StoreError> {
                self.inner.put(record).await
            }
            async fn delete(&self, id: &str) -> Result<(), StoreError> {
                self.inner.delete(id).await
            }
            async fn query(&self, query: &StoreQuery) -> Result<Vec<ImageRecord>, StoreError> {
                self.inner.query(query).await
            }
            async fn get_counts(&self, bucket: SizeBucket) -> Result<Option<Counts>, StoreError> {
                self.inner.get_counts(bucket).await
            }
            async fn set_counts(&self, bucket: SizeBucket, counts: &Counts) -> Result<(), StoreError> {
                self.inner.set_counts(bucket, counts).await
            }
        };
    }

    macro_rules! delegate_tx {
        () => {
            async fn get(&mut self, id: &str) -> Result<Option<ImageRecord>, StoreError> {
                self.inner.get(id).await
            }
            fn put(&mut self, record: ImageRecord) {
                self.inner.put(record)
            }
            fn delete(&mut self, id: &str) {
                self.inner.delete(id)
            }
            fn increment(&mut self, bucket: SizeBucket, status: Status, delta: i64) {
                self.inner.increment(bucket, status, delta)
            }
        };
    }

    impl DocumentStore for FlakyStore {
        type Tx = FlakyTx;
        delegate_store!();

        async fn begin(&self) -> Result<FlakyTx, StoreError> {
            Ok(FlakyTx { inner: self.inner.begin().await?, failures: self.failures.clone() })
        }
    }

    impl Transaction for FlakyTx {
        delegate_tx!();

        async fn commit(self) -> Result<(), StoreError> {
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(StoreError::Conflict("injected".into()));
            }
            self.inner.commit().await
        }
    }

    impl DocumentStore for RivalStore {
        type Tx = RivalTx;
        delegate_store!();

        async fn begin(&self) -> Result<RivalTx, StoreError> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            Ok(RivalTx {
                inner: self.inner.begin().await?,
                store: self.inner.clone(),
                rival: self.rival.lock().take(),
            })
        }
    }

    impl Transaction for RivalTx {
        delegate_tx!();

        async fn commit(self) -> Result<(), StoreError> {
            if let Some((id, status)) = self.rival {
                Catalog::new(self.store.clone())
                    .coordinator()
                    .set_status(&id, status)
                    .await
                    .map_err(|e| StoreError::Codec(e.to_string()))?;
            }
            self.inner.commit().await
        }
    }

    async fn counts(store: &MemoryStore) -> Vec<Counts> {
        let catalog = Catalog::new(store.clone());
        catalog.ledger().get_all().await.unwrap().into_iter().map(|(_, c)| c).collect()
    }

    #[tokio::test]
    async fn create_then_skip_existing() {
        let catalog = Catalog::new(MemoryStore::new());
        let coordinator = catalog.coordinator();
        assert_eq!(coordinator.create(new_image("a", 1200), false).await.unwrap(), CreateOutcome::Created);
        assert_eq!(coordinator.create(new_image("a", 1200), false).await.unwrap(), CreateOutcome::Exists);
        for (_, counts) in catalog.ledger().get_all().await.unwrap() {
            assert_eq!(counts.ready, 1);
        }
    }

    #[tokio::test]
    async fn overwrite_keeps_status_and_moves_buckets() {
        let catalog = Catalog::new(MemoryStore::new());
        let coordinator = catalog.coordinator();
        coordinator.create(new_image("a", 1200), false).await.unwrap();
        coordinator.set_status("a", Status::OK).await.unwrap();

        let outcome = coordinator.create(new_image("a", 300), true).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Replaced);

        let record = catalog.store().get("a").await.unwrap().unwrap();
        assert_eq!(record.status, Status::OK);
        assert!(record.size0256 && !record.size0512);

        let ledger = catalog.ledger();
        assert_eq!(ledger.get(SizeBucket::S0256).await.unwrap().ok, 1);
        assert_eq!(ledger.get(SizeBucket::S0512).await.unwrap().total(), 0);
        assert_eq!(ledger.get(SizeBucket::S1024).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn same_status_updates_without_counter_work() {
        let catalog = Catalog::new(MemoryStore::new());
        let coordinator = catalog.coordinator();
        coordinator.create(new_image("a", 600), false).await.unwrap();
        let before = catalog.store().get("a").await.unwrap().unwrap();

        let update = ImageUpdate { label_name: Some("dave".into()), ..ImageUpdate::status(Status::Ready) };
        let transition = coordinator.update("a", update).await.unwrap();
        assert_eq!(transition.counters, 0);

        let after = catalog.store().get("a").await.unwrap().unwrap();
        assert_eq!(after.label_name, "dave");
        assert!(after.updated_at >= before.updated_at);
        assert_eq!(catalog.ledger().get(SizeBucket::S0256).await.unwrap().ready, 1);
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let catalog = Catalog::new(MemoryStore::new());
        let err = catalog.coordinator().set_status("ghost", Status::OK).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
        let err = catalog.coordinator().delete("ghost").await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn invalid_record_rejected_before_store() {
        let catalog = Catalog::new(MemoryStore::new());
        let mut image = new_image("a", 600);
        image.parts.truncate(10);
        let err = catalog.coordinator().create(image, false).await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidRequest(_)));
        assert!(catalog.store().is_empty());
    }

    #[tokio::test]
    async fn conflicts_are_retried() {
        let inner = MemoryStore::new();
        let store = FlakyStore { inner: inner.clone(), failures: Arc::new(AtomicU32::new(2)) };
        let catalog = Catalog::new(store).with_retry(fast_retry(3));
        let outcome = catalog.coordinator().create(new_image("a", 600), false).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Created);
        assert_eq!(counts(&inner).await[0].ready, 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let inner = MemoryStore::new();
        let store = FlakyStore { inner: inner.clone(), failures: Arc::new(AtomicU32::new(10)) };
        let catalog = Catalog::new(store).with_retry(fast_retry(3));
        let err = catalog.coordinator().create(new_image("a", 600), false).await.unwrap_err();
        assert!(matches!(err, CatalogError::ConflictExhausted { attempts: 3, .. }));
        assert!(inner.is_empty());
        assert!(counts(&inner).await.iter().all(|c| c.total() == 0));
    }

    #[tokio::test]
    async fn concurrent_status_change_counts_once() {
        let inner = MemoryStore::new();
        Catalog::new(inner.clone()).coordinator().create(new_image("a", 600), false).await.unwrap();

        let store = RivalStore {
            inner: inner.clone(),
            rival: Arc::new(Mutex::new(Some(("a".to_owned(), Status::NG)))),
            begins: Arc::new(AtomicU32::new(0)),
        };
        let catalog = Catalog::new(store.clone()).with_retry(fast_retry(5));
        let transition = catalog.coordinator().set_status("a", Status::OK).await.unwrap();

        // 第二次尝试读到的是对手提交后的 NG
        assert_eq!(store.begins.load(Ordering::SeqCst), 2);
        assert_eq!(transition.old, Some(Status::NG));
        assert_eq!(transition.new, Some(Status::OK));

        let record = inner.get("a").await.unwrap().unwrap();
        assert_eq!(record.status, Status::OK);
        let all = counts(&inner).await;
        for counts in &all[..2] {
            assert_eq!(counts.ok, 1);
            assert_eq!(counts.ng, 0);
            assert_eq!(counts.ready, 0);
            assert_eq!(counts.total(), 1);
        }
        assert_eq!(all[2].total(), 0);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        };
        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(15));
        let capped = policy.backoff(9);
        assert!(capped >= Duration::from_millis(100) && capped <= Duration::from_millis(150));
    }
}
