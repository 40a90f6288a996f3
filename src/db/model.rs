use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// 每张人脸的关键点数量
pub const LANDMARK_COUNT: usize = 68;

/// 图片审核状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    Ready,
    NG,
    Pending,
    OK,
    Predicted,
}

impl Status {
    pub const ALL: [Status; 5] =
        [Status::Ready, Status::NG, Status::Pending, Status::OK, Status::Predicted];

    pub fn name(self) -> &'static str {
        match self {
            Status::Ready => "Ready",
            Status::NG => "NG",
            Status::Pending => "Pending",
            Status::OK => "OK",
            Status::Predicted => "Predicted",
        }
    }

    /// 持久化使用的整数编码
    pub fn code(self) -> i64 {
        match self {
            Status::Ready => 0,
            Status::NG => 1,
            Status::Pending => 2,
            Status::OK => 3,
            Status::Predicted => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Status::ALL.into_iter().find(|s| s.code() == code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Status {
    type Err = CatalogError;

    /// 接受状态名（不区分大小写）或整数编码
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i64>() {
            return Status::from_code(code)
                .ok_or_else(|| CatalogError::invalid(format!("未知状态编码: {code}")));
        }
        Status::ALL
            .into_iter()
            .find(|status| status.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CatalogError::invalid(format!("未知状态: {s}")))
    }
}

/// 尺寸分档，每档对应一个计数文档
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SizeBucket {
    S0256,
    S0512,
    S1024,
}

impl SizeBucket {
    pub const ALL: [SizeBucket; 3] = [SizeBucket::S0256, SizeBucket::S0512, SizeBucket::S1024];

    /// 计数文档 ID
    pub fn key(self) -> &'static str {
        match self {
            SizeBucket::S0256 => "0256",
            SizeBucket::S0512 => "0512",
            SizeBucket::S1024 => "1024",
        }
    }

    /// 像素尺寸阈值，`size >= threshold` 时该档标记为真
    pub fn threshold(self) -> u32 {
        match self {
            SizeBucket::S0256 => 256,
            SizeBucket::S0512 => 512,
            SizeBucket::S1024 => 1024,
        }
    }
}

impl fmt::Display for SizeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SizeBucket {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "256" | "0256" => Ok(SizeBucket::S0256),
            "512" | "0512" => Ok(SizeBucket::S0512),
            "1024" => Ok(SizeBucket::S1024),
            other => Err(CatalogError::invalid(format!("未知尺寸分档: {other}"))),
        }
    }
}

/// 图片记录
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// 由文件名派生的稳定 ID
    pub id: String,
    /// 存储后的图片地址
    pub image_url: String,
    pub source_url: String,
    pub photo_url: String,
    /// 人脸区域像素尺寸
    pub size: u32,
    pub size0256: bool,
    pub size0512: bool,
    pub size1024: bool,
    /// 关键点坐标，固定 68 组
    pub parts: Vec<[i32; 2]>,
    pub label_name: String,
    pub status: Status,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 不参与索引的附加信息
    pub meta: Vec<u8>,
}

impl ImageRecord {
    /// 由入库数据创建记录，尺寸标记由 `size` 推导，初始状态为 Ready
    pub fn create(new: NewImage, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            id: new.id,
            image_url: new.image_url,
            source_url: new.source_url,
            photo_url: new.photo_url,
            size: new.size,
            size0256: false,
            size0512: false,
            size1024: false,
            parts: new.parts,
            label_name: new.label_name,
            status: Status::Ready,
            published_at: new.published_at,
            created_at: now,
            updated_at: now,
            meta: new.meta,
        };
        for bucket in SizeBucket::ALL {
            record.set_flag(bucket, new.size >= bucket.threshold());
        }
        record
    }

    pub fn flag(&self, bucket: SizeBucket) -> bool {
        match bucket {
            SizeBucket::S0256 => self.size0256,
            SizeBucket::S0512 => self.size0512,
            SizeBucket::S1024 => self.size1024,
        }
    }

    fn set_flag(&mut self, bucket: SizeBucket, value: bool) {
        match bucket {
            SizeBucket::S0256 => self.size0256 = value,
            SizeBucket::S0512 => self.size0512 = value,
            SizeBucket::S1024 => self.size1024 = value,
        }
    }

    /// 标记为真的尺寸分档
    pub fn buckets(&self) -> impl Iterator<Item = SizeBucket> + '_ {
        SizeBucket::ALL.into_iter().filter(|&bucket| self.flag(bucket))
    }

    /// 检查记录是否满足写入条件
    ///
    /// 尺寸标记必须是累积的：`size1024 ⇒ size0512 ⇒ size0256`，计数账本依赖这一点。
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.id.is_empty() {
            return Err(CatalogError::invalid("记录 ID 不能为空"));
        }
        if (self.size1024 && !self.size0512) || (self.size0512 && !self.size0256) {
            return Err(CatalogError::invalid(format!("{}: 尺寸标记不是累积的", self.id)));
        }
        if self.parts.len() != LANDMARK_COUNT {
            return Err(CatalogError::invalid(format!(
                "{}: 关键点数量为 {}，应为 {}",
                self.id,
                self.parts.len(),
                LANDMARK_COUNT
            )));
        }
        Ok(())
    }
}

/// 入库时提供的图片数据
#[derive(Debug, Clone)]
pub struct NewImage {
    pub id: String,
    pub image_url: String,
    pub source_url: String,
    pub photo_url: String,
    pub size: u32,
    pub parts: Vec<[i32; 2]>,
    pub label_name: String,
    pub published_at: DateTime<Utc>,
    pub meta: Vec<u8>,
}

/// 非状态字段的修改
#[derive(Debug, Clone, Default)]
pub struct ImageUpdate {
    pub status: Option<Status>,
    pub label_name: Option<String>,
    pub meta: Option<Vec<u8>>,
}

impl ImageUpdate {
    pub fn status(status: Status) -> Self {
        Self { status: Some(status), ..Default::default() }
    }
}

/// 某个尺寸分档下各状态的图片数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Counts {
    #[serde(rename = "Ready")]
    pub ready: i64,
    #[serde(rename = "NG")]
    pub ng: i64,
    #[serde(rename = "Pending")]
    pub pending: i64,
    #[serde(rename = "OK")]
    pub ok: i64,
    #[serde(rename = "Predicted")]
    pub predicted: i64,
}

impl Counts {
    pub fn get(&self, status: Status) -> i64 {
        match status {
            Status::Ready => self.ready,
            Status::NG => self.ng,
            Status::Pending => self.pending,
            Status::OK => self.ok,
            Status::Predicted => self.predicted,
        }
    }

    pub fn add(&mut self, status: Status, delta: i64) {
        let slot = match status {
            Status::Ready => &mut self.ready,
            Status::NG => &mut self.ng,
            Status::Pending => &mut self.pending,
            Status::OK => &mut self.ok,
            Status::Predicted => &mut self.predicted,
        };
        *slot += delta;
    }

    pub fn total(&self) -> i64 {
        Status::ALL.into_iter().map(|s| self.get(s)).sum()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn new_image(size: u32) -> NewImage {
        NewImage {
            id: "a".into(),
            image_url: String::new(),
            source_url: String::new(),
            photo_url: String::new(),
            size,
            parts: vec![[0, 0]; LANDMARK_COUNT],
            label_name: "x".into(),
            published_at: Utc.timestamp_opt(0, 0).unwrap(),
            meta: vec![],
        }
    }

    #[test]
    fn status_parse() {
        assert_eq!("ready".parse::<Status>().unwrap(), Status::Ready);
        assert_eq!("NG".parse::<Status>().unwrap(), Status::NG);
        assert_eq!("4".parse::<Status>().unwrap(), Status::Predicted);
        assert!(matches!("9".parse::<Status>(), Err(CatalogError::InvalidRequest(_))));
        assert!(matches!("Done".parse::<Status>(), Err(CatalogError::InvalidRequest(_))));
    }

    #[test]
    fn bucket_parse() {
        assert_eq!("256".parse::<SizeBucket>().unwrap(), SizeBucket::S0256);
        assert_eq!("0512".parse::<SizeBucket>().unwrap(), SizeBucket::S0512);
        assert!("2048".parse::<SizeBucket>().is_err());
    }

    #[test]
    fn flags_are_cumulative() {
        let now = Utc::now();
        let record = ImageRecord::create(new_image(600), now);
        assert!(record.size0256 && record.size0512 && !record.size1024);
        assert_eq!(record.buckets().collect::<Vec<_>>(), vec![SizeBucket::S0256, SizeBucket::S0512]);
        assert_eq!(record.status, Status::Ready);
        record.validate().unwrap();

        let record = ImageRecord::create(new_image(200), now);
        assert_eq!(record.buckets().count(), 0);
    }

    #[test]
    fn validate_rejects_broken_nesting() {
        let mut record = ImageRecord::create(new_image(1200), Utc::now());
        record.size0512 = false;
        assert!(matches!(record.validate(), Err(CatalogError::InvalidRequest(_))));

        let mut record = ImageRecord::create(new_image(300), Utc::now());
        record.parts.pop();
        assert!(record.validate().is_err());
    }

    #[test]
    fn counts_add() {
        let mut counts = Counts::default();
        counts.add(Status::OK, 2);
        counts.add(Status::Predicted, 1);
        counts.add(Status::OK, -1);
        assert_eq!(counts.get(Status::OK), 1);
        assert_eq!(counts.total(), 2);
    }
}
