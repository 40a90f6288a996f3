use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use sqlx::{Sqlite, SqliteConnection};

use super::{
    Counts, Database, DocumentStore, ImageRecord, SizeBucket, Status, StoreQuery, Transaction,
    TxBuffer, Value, init_db,
};
use crate::error::StoreError;

const SELECT_IMAGE: &str = "SELECT id, image_url, source_url, photo_url, size, size0256, size0512, \
     size1024, parts, label_name, status, published_at, created_at, updated_at, meta, version \
     FROM image";

/// 基于 SQLite 的文档存储
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Database,
}

impl SqliteStore {
    pub async fn open(filename: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self { pool: init_db(filename).await? })
    }

    pub fn pool(&self) -> &Database {
        &self.pool
    }
}

/// image 表中的一行
#[derive(sqlx::FromRow)]
struct ImageRow {
    id: String,
    image_url: String,
    source_url: String,
    photo_url: String,
    size: i64,
    size0256: bool,
    size0512: bool,
    size1024: bool,
    parts: String,
    label_name: String,
    status: i64,
    published_at: i64,
    created_at: i64,
    updated_at: i64,
    meta: Vec<u8>,
    version: i64,
}

impl TryFrom<ImageRow> for ImageRecord {
    type Error = StoreError;

    fn try_from(row: ImageRow) -> Result<Self, Self::Error> {
        let status = Status::from_code(row.status)
            .ok_or_else(|| StoreError::Codec(format!("{}: 未知状态编码 {}", row.id, row.status)))?;
        Ok(ImageRecord {
            size: u32::try_from(row.size)
                .map_err(|_| StoreError::Codec(format!("{}: 无效尺寸 {}", row.id, row.size)))?,
            parts: serde_json::from_str(&row.parts)?,
            published_at: from_micros(row.published_at)?,
            created_at: from_micros(row.created_at)?,
            updated_at: from_micros(row.updated_at)?,
            id: row.id,
            image_url: row.image_url,
            source_url: row.source_url,
            photo_url: row.photo_url,
            size0256: row.size0256,
            size0512: row.size0512,
            size1024: row.size1024,
            label_name: row.label_name,
            status,
            meta: row.meta,
        })
    }
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Codec(format!("无效时间戳: {micros}")))
}

/// SQLITE_BUSY 与 SQLITE_LOCKED 视为可重试的冲突
fn map_err(err: sqlx::Error) -> StoreError {
    let busy = err
        .as_database_error()
        .and_then(|e| e.code())
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6));
    if busy { StoreError::Conflict(err.to_string()) } else { StoreError::Sqlx(err) }
}

fn status_column(status: Status) -> &'static str {
    match status {
        Status::Ready => "ready",
        Status::NG => "ng",
        Status::Pending => "pending",
        Status::OK => "ok",
        Status::Predicted => "predicted",
    }
}

async fn fetch_row(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<(i64, ImageRecord)>, StoreError> {
    let sql = format!("{SELECT_IMAGE} WHERE id = ?");
    let row = sqlx::query_as::<_, ImageRow>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(map_err)?;
    match row {
        Some(row) => {
            let version = row.version;
            Ok(Some((version, row.try_into()?)))
        }
        None => Ok(None),
    }
}

async fn upsert_image(
    conn: &mut SqliteConnection,
    record: &ImageRecord,
    version: i64,
) -> Result<(), StoreError> {
    let parts = serde_json::to_string(&record.parts)?;
    sqlx::query(
        r#"
        INSERT INTO image (id, image_url, source_url, photo_url, size, size0256, size0512, size1024,
                           parts, label_name, status, published_at, created_at, updated_at, meta, version)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            image_url = excluded.image_url,
            source_url = excluded.source_url,
            photo_url = excluded.photo_url,
            size = excluded.size,
            size0256 = excluded.size0256,
            size0512 = excluded.size0512,
            size1024 = excluded.size1024,
            parts = excluded.parts,
            label_name = excluded.label_name,
            status = excluded.status,
            published_at = excluded.published_at,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            meta = excluded.meta,
            version = excluded.version
        "#,
    )
    .bind(&record.id)
    .bind(&record.image_url)
    .bind(&record.source_url)
    .bind(&record.photo_url)
    .bind(i64::from(record.size))
    .bind(record.size0256)
    .bind(record.size0512)
    .bind(record.size1024)
    .bind(parts)
    .bind(&record.label_name)
    .bind(record.status.code())
    .bind(record.published_at.timestamp_micros())
    .bind(record.created_at.timestamp_micros())
    .bind(record.updated_at.timestamp_micros())
    .bind(&record.meta)
    .bind(version)
    .execute(conn)
    .await
    .map_err(map_err)?;
    Ok(())
}

async fn next_seq(conn: &mut SqliteConnection) -> Result<i64, StoreError> {
    sqlx::query_scalar::<_, i64>("UPDATE commit_seq SET value = value + 1 WHERE id = 0 RETURNING value")
        .fetch_one(conn)
        .await
        .map_err(map_err)
}

fn push_value(builder: &mut sqlx::QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Text(s) => builder.push_bind(s.clone()),
        Value::Int(i) => builder.push_bind(*i),
        Value::Bool(b) => builder.push_bind(*b),
        Value::Time(t) => builder.push_bind(t.timestamp_micros()),
    };
}

impl DocumentStore for SqliteStore {
    type Tx = SqliteTransaction;

    async fn get(&self, id: &str) -> Result<Option<ImageRecord>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_err)?;
        Ok(fetch_row(&mut conn, id).await?.map(|(_, record)| record))
    }

    async fn put(&self, record: &ImageRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let seq = next_seq(&mut tx).await?;
        upsert_image(&mut tx, record, seq).await?;
        tx.commit().await.map_err(map_err)?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM image WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn query(&self, query: &StoreQuery) -> Result<Vec<ImageRecord>, StoreError> {
        query.validate()?;

        let mut builder = sqlx::QueryBuilder::<Sqlite>::new(SELECT_IMAGE);
        for (i, filter) in query.filters.iter().enumerate() {
            builder.push(if i == 0 { " WHERE " } else { " AND " });
            builder.push(filter.field.column()).push(" ").push(filter.op.sql()).push(" ");
            push_value(&mut builder, &filter.value);
        }
        if let Some((field, direction)) = query.order {
            builder.push(" ORDER BY ").push(field.column()).push(direction.sql());
            if field.column() != "id" {
                builder.push(", id").push(direction.sql());
            }
        }
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }
        debug!("查询: {}", builder.sql());

        let rows = builder.build_query_as::<ImageRow>().fetch_all(&self.pool).await.map_err(map_err)?;
        rows.into_iter().map(ImageRecord::try_from).collect()
    }

    async fn get_counts(&self, bucket: SizeBucket) -> Result<Option<Counts>, StoreError> {
        sqlx::query_as::<_, Counts>(
            "SELECT ready, ng, pending, ok, predicted FROM counter WHERE bucket = ?",
        )
        .bind(bucket.key())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn set_counts(&self, bucket: SizeBucket, counts: &Counts) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO counter (bucket, ready, ng, pending, ok, predicted)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket) DO UPDATE SET
                ready = excluded.ready,
                ng = excluded.ng,
                pending = excluded.pending,
                ok = excluded.ok,
                predicted = excluded.predicted
            "#,
        )
        .bind(bucket.key())
        .bind(counts.ready)
        .bind(counts.ng)
        .bind(counts.pending)
        .bind(counts.ok)
        .bind(counts.predicted)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(SqliteTransaction { pool: self.pool.clone(), buffer: TxBuffer::default() })
    }
}

/// 读取走连接池快照，提交时在一个 SQLite 写事务中校验版本并写入
pub struct SqliteTransaction {
    pool: Database,
    buffer: TxBuffer,
}

impl Transaction for SqliteTransaction {
    async fn get(&mut self, id: &str) -> Result<Option<ImageRecord>, StoreError> {
        if let Some(record) = self.buffer.buffered(id) {
            return Ok(record);
        }
        let mut conn = self.pool.acquire().await.map_err(map_err)?;
        let found = fetch_row(&mut conn, id).await?;
        self.buffer.observe(id, found.as_ref().map(|(version, _)| *version));
        Ok(found.map(|(_, record)| record))
    }

    fn put(&mut self, record: ImageRecord) {
        self.buffer.put(record);
    }

    fn delete(&mut self, id: &str) {
        self.buffer.delete(id);
    }

    fn increment(&mut self, bucket: SizeBucket, status: Status, delta: i64) {
        self.buffer.increment(bucket, status, delta);
    }

    async fn commit(self) -> Result<(), StoreError> {
        if self.buffer.is_read_only() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        // 先写序号表拿到写锁，之后的版本校验都在锁内完成
        let seq = next_seq(&mut tx).await?;

        for (id, expected) in self.buffer.reads() {
            let current = sqlx::query_scalar::<_, i64>("SELECT version FROM image WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_err)?;
            if current != expected {
                return Err(StoreError::Conflict(id.to_owned()));
            }
        }

        for (id, record) in self.buffer.writes() {
            match record {
                Some(record) => upsert_image(&mut tx, record, seq).await?,
                None => {
                    sqlx::query("DELETE FROM image WHERE id = ?")
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_err)?;
                }
            }
        }

        for (bucket, status, delta) in self.buffer.increments() {
            sqlx::query("INSERT INTO counter (bucket) VALUES (?) ON CONFLICT(bucket) DO NOTHING")
                .bind(bucket.key())
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            let column = status_column(status);
            let sql = format!("UPDATE counter SET {column} = {column} + ? WHERE bucket = ?");
            sqlx::query(&sql)
                .bind(delta)
                .bind(bucket.key())
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
        }

        tx.commit().await.map_err(map_err)?;
        Ok(())
    }
}
