mod audit;
mod clean;
mod images;
mod ingest;
mod remove;
mod stats;
mod status;

pub use audit::*;
pub use clean::*;
pub use images::*;
pub use ingest::*;
pub use remove::*;
pub use stats::*;
pub use status::*;

use crate::catalog::{Catalog, RetryPolicy};
use crate::config::Opts;
use crate::db::SqliteStore;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 打开配置目录下的数据库，目录不存在时自动创建
pub async fn open_catalog(opts: &Opts) -> anyhow::Result<Catalog<SqliteStore>> {
    if !opts.conf_dir.path().exists() {
        std::fs::create_dir_all(opts.conf_dir.path())?;
    }
    let store = SqliteStore::open(opts.conf_dir.database()).await?;
    Ok(Catalog::new(store).with_retry(RetryPolicy::from(&opts.retry)))
}
