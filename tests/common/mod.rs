#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use imcatalog::Catalog;
use imcatalog::catalog::RetryPolicy;
use imcatalog::db::{DocumentStore, LANDMARK_COUNT, NewImage, Status};

#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Sqlite,
}

/// 分别用内存存储和临时 SQLite 文件执行同一个检查函数
macro_rules! on_backend {
    ($backend:expr, $check:expr) => {
        match $backend {
            $crate::common::Backend::Memory => $check(imcatalog::db::MemoryStore::new()).await,
            $crate::common::Backend::Sqlite => {
                let dir = tempfile::tempdir().unwrap();
                let store = imcatalog::db::SqliteStore::open(dir.path().join("catalog.db"))
                    .await
                    .unwrap();
                $check(store).await
            }
        }
    };
}
pub(crate) use on_backend;

pub fn new_image(id: &str, size: u32, label: &str, published_at: i64) -> NewImage {
    NewImage {
        id: id.to_string(),
        image_url: format!("/images/{id}"),
        source_url: format!("https://example.com/s/{id}"),
        photo_url: format!("https://example.com/p/{id}.jpg"),
        size,
        parts: vec![[1, 2]; LANDMARK_COUNT],
        label_name: label.to_string(),
        published_at: Utc.timestamp_opt(published_at, 0).unwrap(),
        meta: br#"{"angle":0}"#.to_vec(),
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 50,
        base_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(20),
    }
}

/// 创建 `n` 条记录：ID 为 `img00`、`img01`……，发布时间各不相同
pub async fn seed<S: DocumentStore>(catalog: &Catalog<S>, n: usize) {
    let labels = ["alice", "bob"];
    let sizes = [200, 300, 600, 1200];
    for i in 0..n {
        let image = new_image(&format!("img{i:02}"), sizes[i % 4], labels[i % 2], 1_600_000_000 + (i as i64) * 60);
        catalog.coordinator().create(image, false).await.unwrap();
        if i % 3 == 0 {
            catalog.coordinator().set_status(&format!("img{i:02}"), Status::OK).await.unwrap();
        }
    }
}
