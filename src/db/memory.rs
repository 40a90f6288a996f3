use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Counts, DocumentStore, ImageRecord, SizeBucket, Status, StoreQuery, Transaction, TxBuffer};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct MemoryState {
    /// 单调递增的提交序号，作为记录版本
    seq: i64,
    images: BTreeMap<String, (i64, ImageRecord)>,
    counters: HashMap<SizeBucket, Counts>,
}

/// 进程内文档存储，行为与 [`super::SqliteStore`] 一致，主要用于测试
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn get(&self, id: &str) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self.state.lock().images.get(id).map(|(_, record)| record.clone()))
    }

    async fn put(&self, record: &ImageRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.seq += 1;
        let seq = state.seq;
        state.images.insert(record.id.clone(), (seq, record.clone()));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.state.lock().images.remove(id);
        Ok(())
    }

    async fn query(&self, query: &StoreQuery) -> Result<Vec<ImageRecord>, StoreError> {
        query.validate()?;
        let mut records = {
            let state = self.state.lock();
            state
                .images
                .values()
                .filter(|(_, record)| query.matches(record))
                .map(|(_, record)| record.clone())
                .collect::<Vec<_>>()
        };
        records.sort_by(|a, b| query.compare(a, b));
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn get_counts(&self, bucket: SizeBucket) -> Result<Option<Counts>, StoreError> {
        Ok(self.state.lock().counters.get(&bucket).copied())
    }

    async fn set_counts(&self, bucket: SizeBucket, counts: &Counts) -> Result<(), StoreError> {
        self.state.lock().counters.insert(bucket, *counts);
        Ok(())
    }

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(MemoryTransaction { state: self.state.clone(), buffer: TxBuffer::default() })
    }
}

pub struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    buffer: TxBuffer,
}

impl Transaction for MemoryTransaction {
    async fn get(&mut self, id: &str) -> Result<Option<ImageRecord>, StoreError> {
        if let Some(record) = self.buffer.buffered(id) {
            return Ok(record);
        }
        let found = self.state.lock().images.get(id).cloned();
        self.buffer.observe(id, found.as_ref().map(|(version, _)| *version));
        Ok(found.map(|(_, record)| record))
    }

    fn put(&mut self, record: ImageRecord) {
        self.buffer.put(record);
    }

    fn delete(&mut self, id: &str) {
        self.buffer.delete(id);
    }

    fn increment(&mut self, bucket: SizeBucket, status: Status, delta: i64) {
        self.buffer.increment(bucket, status, delta);
    }

    async fn commit(self) -> Result<(), StoreError> {
        if self.buffer.is_read_only() {
            return Ok(());
        }
        let mut state = self.state.lock();
        for (id, expected) in self.buffer.reads() {
            let current = state.images.get(id).map(|(version, _)| *version);
            if current != expected {
                return Err(StoreError::Conflict(id.to_owned()));
            }
        }

        state.seq += 1;
        let seq = state.seq;
        for (id, record) in self.buffer.writes() {
            match record {
                Some(record) => {
                    state.images.insert(id.to_owned(), (seq, record.clone()));
                }
                None => {
                    state.images.remove(id);
                }
            }
        }
        for (bucket, status, delta) in self.buffer.increments() {
            state.counters.entry(bucket).or_default().add(status, delta);
        }
        Ok(())
    }
}
