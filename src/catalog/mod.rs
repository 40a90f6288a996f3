//! 图片目录：分页查询、状态修改与计数维护

pub mod audit;
pub mod ledger;
pub mod mutation;
pub mod page;
pub mod scan;
pub mod sort;

pub use audit::{AuditReport, BucketAudit};
pub use ledger::CounterLedger;
pub use mutation::{CreateOutcome, MutationCoordinator, RetryPolicy, Transition, run_in_transaction};
pub use page::{ImageItem, PageFetcher, PageFilters, PageParams, PageRequest, QueryBuilder};
pub use scan::Scanner;
pub use sort::{SortKey, SortSpec};

use crate::db::{Counts, DocumentStore, Filter, SizeBucket};
use crate::error::Result;

pub struct Catalog<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: DocumentStore> Catalog<S> {
    pub fn new(store: S) -> Self {
        Self { store, retry: RetryPolicy::default() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn query_builder(&self) -> QueryBuilder<'_, S> {
        QueryBuilder::new(&self.store)
    }

    pub fn page_fetcher(&self) -> PageFetcher<'_, S> {
        PageFetcher::new(&self.store)
    }

    pub fn ledger(&self) -> CounterLedger<'_, S> {
        CounterLedger::new(&self.store)
    }

    pub fn coordinator(&self) -> MutationCoordinator<'_, S> {
        MutationCoordinator::new(&self.store, self.retry)
    }

    pub fn scanner(&self, filters: Vec<Filter>, batch_size: usize) -> Scanner<'_, S> {
        Scanner::new(&self.store, filters, batch_size)
    }

    /// 取一页图片
    pub async fn page(&self, request: &PageRequest) -> Result<Vec<ImageItem>> {
        let query = self.query_builder().build(request).await?;
        self.page_fetcher().fetch(&query).await
    }

    /// 各尺寸分档的计数，指定 `bucket` 时只返回该档
    pub async fn stats(&self, bucket: Option<SizeBucket>) -> Result<Vec<(SizeBucket, Counts)>> {
        let ledger = self.ledger();
        match bucket {
            Some(bucket) => Ok(vec![(bucket, ledger.get(bucket).await?)]),
            None => ledger.get_all().await,
        }
    }

    pub async fn audit(&self, repair: bool) -> Result<AuditReport> {
        audit::audit(&self.store, repair).await
    }
}
