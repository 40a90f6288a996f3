use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::catalog::{PageParams, RetryPolicy};
use crate::cli::*;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "aloxaf", "imcatalog")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".imcatalog"));
    ConfDir { path }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".imcatalog")
}

#[derive(Parser, Debug, Clone)]
pub struct RetryOptions {
    /// 事务冲突时的最大尝试次数
    #[arg(long, value_name = "N", default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,
    /// 第一次重试前的等待时间（毫秒），之后每次翻倍
    #[arg(long, value_name = "MS", default_value_t = 20)]
    pub retry_base_ms: u64,
    /// 两次重试之间的最长等待时间（毫秒）
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub retry_max_ms: u64,
}

impl From<&RetryOptions> for RetryPolicy {
    fn from(opts: &RetryOptions) -> Self {
        RetryPolicy {
            max_attempts: opts.max_attempts,
            base_delay: Duration::from_millis(opts.retry_base_ms),
            max_delay: Duration::from_millis(opts.retry_max_ms.max(opts.retry_base_ms)),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct PageOptions {
    /// 只显示该标签的图片
    #[arg(long, value_name = "LABEL")]
    pub name: Option<String>,
    /// 只显示该状态的图片，可以是状态名或编码，`all` 表示全部
    #[arg(long)]
    pub status: Option<String>,
    /// 只显示不小于该尺寸的图片：256、512 或 1024，`all` 表示全部
    #[arg(long)]
    pub size: Option<String>,
    /// 排序字段：id、updated_at 或 published_at
    #[arg(long, value_name = "KEY")]
    pub sort: Option<String>,
    /// 降序排列
    #[arg(long)]
    pub desc: bool,
    /// 从该 ID 的记录开始（包含该记录）
    #[arg(long, value_name = "ID")]
    pub anchor: Option<String>,
    /// 从锚点向反方向翻页
    #[arg(long)]
    pub reverse: bool,
    /// 每页数量，最大 500
    #[arg(long, value_name = "N")]
    pub page_size: Option<usize>,
}

impl From<&PageOptions> for PageParams {
    fn from(opts: &PageOptions) -> Self {
        PageParams {
            name: opts.name.clone(),
            status: opts.status.clone(),
            size: opts.size.clone(),
            sort: opts.sort.clone(),
            order: opts.desc.then(|| "desc".to_string()),
            id: opts.anchor.clone(),
            reverse: opts.reverse,
            page_size: opts.page_size,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imcatalog", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imcatalog 配置目录，数据库保存在该目录下
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
    #[command(flatten)]
    pub retry: RetryOptions,
    /// 命令结束后将 prometheus 指标以文本格式写入该文件
    #[arg(long, value_name = "PATH")]
    pub metrics_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 分页列出图片
    Images(ImagesCommand),
    /// 修改图片的审核状态
    Status(StatusCommand),
    /// 删除一张图片
    Remove(RemoveCommand),
    /// 显示各尺寸分档的状态计数
    Stats(StatsCommand),
    /// 从关键点文件目录导入图片
    Ingest(IngestCommand),
    /// 批量删除满足条件的图片
    Clean(CleanCommand),
    /// 重新统计计数并与记录比较，只能在没有其他写入时使用
    Audit(AuditCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("imcatalog.db")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    Json,
    #[default]
    Table,
}
