//! 排序键注册表
//!
//! 查询构建和锚点取值共用同一张表，避免两处维护各自的允许列表。

use std::fmt;
use std::str::FromStr;

use crate::db::{Field, ImageRecord, Value};
use crate::error::CatalogError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortKey {
    #[default]
    Id,
    UpdatedAt,
    PublishedAt,
}

struct SortEntry {
    key: SortKey,
    /// 对外名称，第一个为规范名称
    names: &'static [&'static str],
    field: Field,
}

static SORT_KEYS: [SortEntry; 3] = [
    SortEntry { key: SortKey::Id, names: &["id"], field: Field::Id },
    SortEntry {
        key: SortKey::UpdatedAt,
        names: &["updated_at", "updatedAt"],
        field: Field::UpdatedAt,
    },
    SortEntry {
        key: SortKey::PublishedAt,
        names: &["published_at", "publishedAt"],
        field: Field::PublishedAt,
    },
];

impl SortKey {
    fn entry(self) -> &'static SortEntry {
        SORT_KEYS.iter().find(|e| e.key == self).unwrap_or(&SORT_KEYS[0])
    }

    pub fn name(self) -> &'static str {
        self.entry().names[0]
    }

    pub fn field(self) -> Field {
        self.entry().field
    }

    /// 锚点记录在排序字段上的取值
    pub fn anchor_value(self, record: &ImageRecord) -> Value {
        self.field().value_of(record)
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SortKey {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SORT_KEYS
            .iter()
            .find(|e| e.names.contains(&s))
            .map(|e| e.key)
            .ok_or_else(|| CatalogError::invalid(format!("未知排序字段: {s}")))
    }
}

/// 排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortSpec {
    pub key: SortKey,
    pub desc: bool,
}
