use crate::db::{Direction, DocumentStore, Field, Filter, ImageRecord, Op, StoreQuery, Value};
use crate::error::Result;

/// 按 ID 升序分批遍历满足条件的全部记录
///
/// 每批以上一批最后的 ID 作为锚点继续，遍历过程中删除已读记录不会导致跳过或重复。
pub struct Scanner<'a, S> {
    store: &'a S,
    filters: Vec<Filter>,
    batch_size: usize,
    last_id: Option<String>,
    done: bool,
}

impl<'a, S: DocumentStore> Scanner<'a, S> {
    /// `filters` 只能包含等值条件
    pub fn new(store: &'a S, filters: Vec<Filter>, batch_size: usize) -> Self {
        Self { store, filters, batch_size: batch_size.max(1), last_id: None, done: false }
    }

    pub async fn next_batch(&mut self) -> Result<Option<Vec<ImageRecord>>> {
        if self.done {
            return Ok(None);
        }

        let mut filters = self.filters.clone();
        let mut limit = self.batch_size;
        if let Some(last_id) = &self.last_id {
            // 锚点条件是包含的，多取一条补上锚点本身
            filters.push(Filter::new(Field::Id, Op::Ge, Value::Text(last_id.clone()))?);
            limit += 1;
        }
        let query = StoreQuery {
            filters,
            order: Some((Field::Id, Direction::Asc)),
            limit: Some(limit),
        };

        let mut records = self.store.query(&query).await?;
        let fetched = records.len();
        if let Some(last_id) = &self.last_id {
            records.retain(|r| &r.id != last_id);
        }
        records.truncate(self.batch_size);

        if fetched < limit {
            self.done = true;
        }
        match records.last() {
            Some(last) => {
                self.last_id = Some(last.id.clone());
                Ok(Some(records))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}
