use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use super::sort::{SortKey, SortSpec};
use crate::db::{Direction, DocumentStore, Field, Filter, ImageRecord, Op, SizeBucket, Status, StoreQuery, Value};
use crate::error::{CatalogError, Result};
use crate::metrics;

pub const DEFAULT_PAGE_SIZE: usize = 30;
pub const MAX_PAGE_SIZE: usize = 500;

/// 来自界面或命令行的原始分页参数
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    /// 标签名
    pub name: Option<String>,
    /// 状态名或编码，`all` 表示不过滤
    pub status: Option<String>,
    /// 尺寸分档，`all` 表示不过滤
    pub size: Option<String>,
    pub sort: Option<String>,
    /// `desc` 为降序，其余为升序
    pub order: Option<String>,
    /// 锚点记录 ID
    pub id: Option<String>,
    #[serde(default)]
    pub reverse: bool,
    pub page_size: Option<usize>,
}

/// 等值过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageFilters {
    pub label: Option<String>,
    pub status: Option<Status>,
    pub size: Option<SizeBucket>,
}

/// 校验后的分页请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub filters: PageFilters,
    pub sort: SortSpec,
    pub anchor: Option<String>,
    pub reverse: bool,
    pub page_size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            filters: PageFilters::default(),
            sort: SortSpec::default(),
            anchor: None,
            reverse: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// 实际遍历方向：`desc XOR reverse`
    pub fn descending(&self) -> bool {
        self.sort.desc ^ self.reverse
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(CatalogError::invalid(format!(
                "分页大小必须在 1 到 {MAX_PAGE_SIZE} 之间，实际为 {}",
                self.page_size
            )));
        }
        Ok(())
    }

    /// 以同样的排序配置取锚点之后（或之前）的一页
    pub fn anchored(&self, anchor: impl Into<String>, reverse: bool) -> Self {
        Self { anchor: Some(anchor.into()), reverse, ..self.clone() }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn unless_all(value: Option<String>) -> Option<String> {
    non_empty(value).filter(|s| s != "all")
}

impl TryFrom<PageParams> for PageRequest {
    type Error = CatalogError;

    fn try_from(params: PageParams) -> Result<Self> {
        let filters = PageFilters {
            label: non_empty(params.name),
            status: unless_all(params.status).map(|s| s.parse()).transpose()?,
            size: unless_all(params.size).map(|s| s.parse()).transpose()?,
        };
        let sort = SortSpec {
            key: non_empty(params.sort).map(|s| s.parse::<SortKey>()).transpose()?.unwrap_or_default(),
            desc: params.order.as_deref() == Some("desc"),
        };
        let request = PageRequest {
            filters,
            sort,
            anchor: non_empty(params.id),
            reverse: params.reverse,
            page_size: params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        };
        request.validate()?;
        Ok(request)
    }
}

/// 将分页请求转换为存储查询，只读
pub struct QueryBuilder<'a, S> {
    store: &'a S,
}

impl<'a, S: DocumentStore> QueryBuilder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn build(&self, request: &PageRequest) -> Result<StoreQuery> {
        request.validate()?;

        let mut filters = vec![];
        if let Some(label) = &request.filters.label {
            filters.push(Filter::eq(Field::LabelName, Value::Text(label.clone()))?);
        }
        if let Some(status) = request.filters.status {
            filters.push(Filter::eq(Field::Status, Value::Int(status.code()))?);
        }
        if let Some(bucket) = request.filters.size {
            filters.push(Filter::eq(Field::size_flag(bucket), Value::Bool(true))?);
        }

        let key = request.sort.key;
        let descending = request.descending();
        if let Some(anchor) = &request.anchor {
            let record = self
                .store
                .get(anchor)
                .await?
                .ok_or_else(|| CatalogError::NotFound(anchor.clone()))?;
            let op = if descending { Op::Le } else { Op::Ge };
            filters.push(Filter::new(key.field(), op, key.anchor_value(&record))?);
        }

        Ok(StoreQuery {
            filters,
            order: Some((key.field(), Direction::descending(descending))),
            limit: Some(request.page_size),
        })
    }
}

/// 返回给调用方的图片条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageItem {
    pub id: String,
    pub image_url: String,
    pub size: u32,
    pub status: i64,
    /// 关键点坐标按 `x0, y0, x1, y1, ...` 展开
    pub parts: Vec<i32>,
    pub label_name: String,
    pub source_url: String,
    pub photo_url: String,
    pub published_at: i64,
    pub updated_at: i64,
    pub meta: String,
}

impl From<&ImageRecord> for ImageItem {
    fn from(record: &ImageRecord) -> Self {
        Self {
            id: record.id.clone(),
            image_url: record.image_url.clone(),
            size: record.size,
            status: record.status.code(),
            parts: record.parts.iter().flatten().copied().collect(),
            label_name: record.label_name.clone(),
            source_url: record.source_url.clone(),
            photo_url: record.photo_url.clone(),
            published_at: record.published_at.timestamp(),
            updated_at: record.updated_at.timestamp(),
            meta: String::from_utf8_lossy(&record.meta).into_owned(),
        }
    }
}

/// 执行存储查询，按存储返回的顺序解码为一页
pub struct PageFetcher<'a, S> {
    store: &'a S,
}

impl<'a, S: DocumentStore> PageFetcher<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn fetch(&self, query: &StoreQuery) -> Result<Vec<ImageItem>> {
        let start = Instant::now();
        let records = self.store.query(query).await?;
        let elapsed = start.elapsed().as_secs_f32();
        metrics::observe_page_fetch(elapsed);
        debug!("获取 {} 条记录，耗时 {:.3}s", records.len(), elapsed);
        Ok(records.iter().map(ImageItem::from).collect())
    }
}
