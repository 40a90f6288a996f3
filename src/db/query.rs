//! 与存储无关的查询表示
//!
//! 过滤条件统一表示为 `{field, op, value}`，字段限定在 [`Field`] 白名单内，
//! 再由各存储实现翻译为原生查询。

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::model::{ImageRecord, SizeBucket};
use crate::error::{CatalogError, StoreError};

/// 可查询的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    LabelName,
    Status,
    Size0256,
    Size0512,
    Size1024,
    UpdatedAt,
    PublishedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Int,
    Bool,
    Time,
}

impl Field {
    /// 数据库列名
    pub fn column(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::LabelName => "label_name",
            Field::Status => "status",
            Field::Size0256 => "size0256",
            Field::Size0512 => "size0512",
            Field::Size1024 => "size1024",
            Field::UpdatedAt => "updated_at",
            Field::PublishedAt => "published_at",
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            Field::Id | Field::LabelName => ValueKind::Text,
            Field::Status => ValueKind::Int,
            Field::Size0256 | Field::Size0512 | Field::Size1024 => ValueKind::Bool,
            Field::UpdatedAt | Field::PublishedAt => ValueKind::Time,
        }
    }

    pub fn size_flag(bucket: SizeBucket) -> Self {
        match bucket {
            SizeBucket::S0256 => Field::Size0256,
            SizeBucket::S0512 => Field::Size0512,
            SizeBucket::S1024 => Field::Size1024,
        }
    }

    /// 取出记录中该字段的值
    pub fn value_of(self, record: &ImageRecord) -> Value {
        match self {
            Field::Id => Value::Text(record.id.clone()),
            Field::LabelName => Value::Text(record.label_name.clone()),
            Field::Status => Value::Int(record.status.code()),
            Field::Size0256 => Value::Bool(record.size0256),
            Field::Size0512 => Value::Bool(record.size0512),
            Field::Size1024 => Value::Bool(record.size1024),
            Field::UpdatedAt => Value::Time(record.updated_at),
            Field::PublishedAt => Value::Time(record.published_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Bool(bool),
    Time(DateTime<Utc>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Text(_) => ValueKind::Text,
            Value::Int(_) => ValueKind::Int,
            Value::Bool(_) => ValueKind::Bool,
            Value::Time(_) => ValueKind::Time,
        }
    }

    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ge,
    Le,
}

impl Op {
    pub fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ge => ">=",
            Op::Le => "<=",
        }
    }

    pub fn is_inequality(self) -> bool {
        self != Op::Eq
    }

    fn accepts(self, ord: Ordering) -> bool {
        match self {
            Op::Eq => ord == Ordering::Equal,
            Op::Ge => ord != Ordering::Less,
            Op::Le => ord != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: Field,
    pub op: Op,
    pub value: Value,
}

impl Filter {
    /// 创建过滤条件，值类型必须与字段类型一致
    pub fn new(field: Field, op: Op, value: Value) -> Result<Self, CatalogError> {
        if field.kind() != value.kind() {
            return Err(CatalogError::invalid(format!(
                "字段 {} 需要 {:?} 类型的值，实际为 {:?}",
                field.column(),
                field.kind(),
                value.kind()
            )));
        }
        Ok(Self { field, op, value })
    }

    pub fn eq(field: Field, value: Value) -> Result<Self, CatalogError> {
        Self::new(field, Op::Eq, value)
    }

    pub fn matches(&self, record: &ImageRecord) -> bool {
        self.field
            .value_of(record)
            .compare(&self.value)
            .is_some_and(|ord| self.op.accepts(ord))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn descending(desc: bool) -> Self {
        if desc { Direction::Desc } else { Direction::Asc }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Direction::Asc => " ASC",
            Direction::Desc => " DESC",
        }
    }
}

/// 翻译前的存储查询
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreQuery {
    pub filters: Vec<Filter>,
    pub order: Option<(Field, Direction)>,
    pub limit: Option<usize>,
}

impl StoreQuery {
    /// 检查查询是否满足存储约束：最多一个不等式条件，且必须作用在排序字段上
    pub fn validate(&self) -> Result<(), StoreError> {
        let inequalities = self.filters.iter().filter(|f| f.op.is_inequality()).collect::<Vec<_>>();
        match inequalities.as_slice() {
            [] => Ok(()),
            [filter] => match self.order {
                Some((field, _)) if field == filter.field => Ok(()),
                _ => Err(StoreError::InvalidQuery(format!(
                    "不等式条件 {} 必须作用在排序字段上",
                    filter.field.column()
                ))),
            },
            _ => Err(StoreError::InvalidQuery("最多只能有一个不等式条件".into())),
        }
    }

    pub fn matches(&self, record: &ImageRecord) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    /// 按排序字段比较两条记录，相同时以 ID 决定先后
    pub fn compare(&self, a: &ImageRecord, b: &ImageRecord) -> Ordering {
        let Some((field, direction)) = self.order else {
            return a.id.cmp(&b.id);
        };
        let ord = field
            .value_of(a)
            .compare(&field.value_of(b))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id));
        match direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    }
}
