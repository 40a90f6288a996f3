//! 人脸关键点文件的解析
//!
//! 每个 `.json` 文件对应一张人脸图片，文件名（不含扩展名）决定记录 ID。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDateTime, TimeZone, Utc};
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::db::{LANDMARK_COUNT, NewImage};
use crate::utils::content_id;

const POSTED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Deserialize)]
pub struct FaceData {
    pub angle: f32,
    pub size: u32,
    pub parts: Vec<[i32; 2]>,
    pub meta: FaceMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceMeta {
    #[serde(default)]
    pub face_id: String,
    #[serde(default)]
    pub photo_id: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub photo_url: String,
    pub posted_at: String,
    #[serde(default)]
    pub label_id: String,
    #[serde(default)]
    pub label_name: String,
}

/// 记录中保存的元数据
#[derive(Debug, Serialize)]
struct StoredMeta {
    angle: f32,
    face_id: i64,
    photo_id: i64,
    label_id: i64,
}

impl FaceData {
    pub fn into_new_image(self, id: String, image_base_url: &str) -> Result<NewImage> {
        if self.parts.len() != LANDMARK_COUNT {
            return Err(anyhow!("关键点数量应为 {LANDMARK_COUNT}，实际为 {}", self.parts.len()));
        }
        let posted_at = NaiveDateTime::parse_from_str(&self.meta.posted_at, POSTED_AT_FORMAT)
            .with_context(|| format!("无法解析发布时间: {}", self.meta.posted_at))?;

        // 非数字的 ID 按 0 处理
        let meta = serde_json::to_vec(&StoredMeta {
            angle: self.angle,
            face_id: self.meta.face_id.parse().unwrap_or_default(),
            photo_id: self.meta.photo_id.parse().unwrap_or_default(),
            label_id: self.meta.label_id.parse().unwrap_or_default(),
        })?;

        Ok(NewImage {
            image_url: format!("{}/{id}", image_base_url.trim_end_matches('/')),
            id,
            source_url: self.meta.source_url,
            photo_url: self.meta.photo_url,
            size: self.size,
            parts: self.parts,
            label_name: self.meta.label_name,
            published_at: Utc.from_utc_datetime(&posted_at),
            meta,
        })
    }
}

/// 读取并解析一个关键点文件
pub async fn load(path: &Path, image_base_url: &str) -> Result<NewImage> {
    let stem = path
        .file_stem()
        .ok_or_else(|| anyhow!("无效的文件名: {}", path.display()))?
        .to_string_lossy();
    let data = tokio::fs::read(path).await?;
    let face: FaceData = serde_json::from_slice(&data)
        .with_context(|| format!("无法解析 {}", path.display()))?;
    face.into_new_image(content_id(&stem), image_base_url)
}

/// 递归扫描目录下所有后缀匹配的文件，按路径排序
pub fn scan_directory(path: impl AsRef<Path>, re_suf: &Regex) -> Vec<PathBuf> {
    info!("开始扫描目录: {}", path.as_ref().display());
    let mut entries = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension().is_some_and(|ext| re_suf.is_match(&ext.to_string_lossy()))
        })
        .collect::<Vec<_>>();
    entries.sort();
    info!("扫描完成，共 {} 个文件", entries.len());
    entries
}
