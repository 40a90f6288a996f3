use thiserror::Error;

/// 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 乐观事务提交时发现读取过的记录已被修改，可以整体重试
    #[error("事务冲突: {0}")]
    Conflict(String),
    /// 查询不满足存储层约束，例如出现多个不等式条件
    #[error("无效查询: {0}")]
    InvalidQuery(String),
    /// 记录编码或解码失败
    #[error("数据编解码失败: {0}")]
    Codec(String),
    #[error("数据库错误: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("数据库迁移失败: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

/// 目录服务错误
#[derive(Debug, Error)]
pub enum CatalogError {
    /// 请求参数不合法，在访问存储之前即被拒绝
    #[error("无效请求: {0}")]
    InvalidRequest(String),
    /// 锚点或被修改的记录不存在
    #[error("记录不存在: {0}")]
    NotFound(String),
    /// 重试次数耗尽后事务仍然冲突
    #[error("{op} 重试 {attempts} 次后仍然冲突")]
    ConflictExhausted { op: &'static str, attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CatalogError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CatalogError::InvalidRequest(msg.into())
    }

    /// 是否为可以整体重试的事务冲突
    pub fn is_conflict(&self) -> bool {
        matches!(self, CatalogError::Store(e) if e.is_conflict())
    }
}

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;
