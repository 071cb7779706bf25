use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::config::SqliteStoreConfig;
use crate::item::{
    GeoPoint, ItemId, ItemKind, ItemStatus, NewItem, Owner, Payload, QueueItem,
    StatusCounts,
};
use crate::store::RecordStore;

const ITEM_COLUMNS: &str = "id, kind, filename, mime_type, status, retries, \
     server_id, payload_inline, payload_path, file_size_bytes, latitude, \
     longitude, owner_id, owner_name, created_at_ms";

/// SQLite-backed record store.
///
/// All item families live in one `queue_items` table; each store instance is
/// scoped to a single [`ItemKind`] and never sees rows of another kind.
/// Stores for different kinds can share a pool via [`with_kind`].
///
/// [`with_kind`]: SqliteRecordStore::with_kind
#[derive(Clone, Debug)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
    kind: ItemKind,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database described by `config`.
    pub async fn open(
        config: &SqliteStoreConfig,
        kind: ItemKind,
    ) -> anyhow::Result<Self> {
        let mut options = SqliteConnectOptions::from_str(&config.database_url)
            .with_context(|| {
                format!("invalid database url {}", config.database_url)
            })?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let mut pool_options = SqlitePoolOptions::new();
        if config.is_in_memory() {
            // Every connection to :memory: is a separate database.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            pool_options =
                pool_options.max_connections(config.max_connections.max(1));
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| {
                format!("failed to open queue database {}", config.database_url)
            })?;

        Self::new(pool, kind).await
    }

    /// Transient database discarded when the store is dropped.
    pub async fn open_in_memory(kind: ItemKind) -> anyhow::Result<Self> {
        Self::open(&SqliteStoreConfig::new("sqlite::memory:"), kind).await
    }

    /// Wrap an existing pool, creating the schema if missing.
    pub async fn new(pool: SqlitePool, kind: ItemKind) -> anyhow::Result<Self> {
        let store = Self { pool, kind };
        store.init_schema().await?;
        Ok(store)
    }

    /// Store for another item family over the same pool.
    pub fn with_kind(&self, kind: ItemKind) -> Self {
        Self {
            pool: self.pool.clone(),
            kind,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retries INTEGER NOT NULL DEFAULT 0,
                server_id TEXT,
                payload_inline BLOB,
                payload_path TEXT,
                file_size_bytes INTEGER,
                latitude REAL,
                longitude REAL,
                owner_id INTEGER,
                owner_name TEXT,
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create queue_items table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_items_claim
            ON queue_items (kind, status, created_at_ms, id)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create queue_items index")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_items_owner
            ON queue_items (kind, owner_id)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create owner index")?;

        Ok(())
    }

    /// Single-row status update scoped to this store's kind.
    async fn update_status(
        &self,
        id: ItemId,
        status: ItemStatus,
    ) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE queue_items SET status = ?, updated_at_ms = ? \
             WHERE id = ? AND kind = ?",
        )
        .bind(status.as_str())
        .bind(now_ms())
        .bind(id.0)
        .bind(self.kind.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("{} {} not found", self.kind, id);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn kind(&self) -> ItemKind {
        self.kind
    }

    async fn reserve_pending(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> anyhow::Result<Vec<QueueItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // One statement, so the select and the status flip are atomic with
        // respect to other writers.
        let sql = format!(
            r#"
            UPDATE queue_items
            SET status = 'uploading', updated_at_ms = ?
            WHERE id IN (
                SELECT id FROM queue_items
                WHERE kind = ?
                  AND (status = 'pending'
                       OR (status = 'failed' AND retries < ?))
                ORDER BY created_at_ms ASC, id ASC
                LIMIT ?
            )
            RETURNING {ITEM_COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(now_ms())
            .bind(self.kind.as_str())
            .bind(i64::from(max_retries))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let mut items = rows
            .iter()
            .map(item_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        items.sort_by_key(|item| (item.created_at_ms, item.id));

        debug!(
            item_kind = %self.kind,
            claimed = items.len(),
            "reserved pending items"
        );
        Ok(items)
    }

    async fn mark_uploaded(
        &self,
        id: ItemId,
        server_id: &str,
    ) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'uploaded', server_id = ?, updated_at_ms = ?
            WHERE id = ? AND kind = ?
              AND (server_id IS NULL OR server_id = ?)
            "#,
        )
        .bind(server_id)
        .bind(now_ms())
        .bind(id.0)
        .bind(self.kind.as_str())
        .bind(server_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get(id).await? {
            None => anyhow::bail!("{} {} not found", self.kind, id),
            Some(existing) => anyhow::bail!(
                "{} {} already uploaded as {}, refusing server id {}",
                self.kind,
                id,
                existing.server_id.as_deref().unwrap_or("<none>"),
                server_id
            ),
        }
    }

    async fn mark_failed(&self, id: ItemId) -> anyhow::Result<()> {
        self.update_status(id, ItemStatus::Failed).await
    }

    async fn set_pending(&self, id: ItemId) -> anyhow::Result<()> {
        self.update_status(id, ItemStatus::Pending).await
    }

    async fn increment_retry_capped(
        &self,
        id: ItemId,
        max: u32,
    ) -> anyhow::Result<u32> {
        let row = sqlx::query(
            r#"
            UPDATE queue_items
            SET retries = CASE WHEN retries < ? THEN retries + 1
                               ELSE retries END,
                updated_at_ms = ?
            WHERE id = ? AND kind = ?
            RETURNING retries
            "#,
        )
        .bind(i64::from(max))
        .bind(now_ms())
        .bind(id.0)
        .bind(self.kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            anyhow::bail!("{} {} not found", self.kind, id);
        };
        let retries: i64 = row.try_get("retries")?;
        Ok(u32::try_from(retries)?)
    }

    async fn reset_failed(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'pending', retries = 0, updated_at_ms = ?
            WHERE kind = ? AND status = 'failed'
            "#,
        )
        .bind(now_ms())
        .bind(self.kind.as_str())
        .execute(&self.pool)
        .await?;

        let reset = result.rows_affected();
        if reset > 0 {
            info!(item_kind = %self.kind, reset, "failed items reset to pending");
        }
        Ok(reset)
    }

    async fn reset_one(&self, id: ItemId) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'pending', retries = 0, updated_at_ms = ?
            WHERE id = ? AND kind = ? AND status IN ('failed', 'pending')
            "#,
        )
        .bind(now_ms())
        .bind(id.0)
        .bind(self.kind.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get(id).await? {
            None => anyhow::bail!("{} {} not found", self.kind, id),
            Some(existing) => anyhow::bail!(
                "{} {} is {}, only failed items can be retried",
                self.kind,
                id,
                existing.status
            ),
        }
    }

    async fn count_pending(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_items WHERE kind = ? AND status = 'pending'",
        )
        .bind(self.kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count)?)
    }

    async fn requeue_interrupted(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'pending', updated_at_ms = ?
            WHERE kind = ? AND status = 'uploading'
            "#,
        )
        .bind(now_ms())
        .bind(self.kind.as_str())
        .execute(&self.pool)
        .await?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            info!(
                item_kind = %self.kind,
                requeued,
                "interrupted uploads returned to pending"
            );
        }
        Ok(requeued)
    }

    async fn insert(&self, item: NewItem) -> anyhow::Result<ItemId> {
        let (inline, path) = match item.payload {
            Payload::Inline { bytes } => (Some(bytes), None),
            Payload::Path { path } => {
                (None, Some(path.to_string_lossy().into_owned()))
            }
        };
        let file_size = item.file_size_bytes.map(i64::try_from).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO queue_items (
                kind, filename, mime_type, status, retries, server_id,
                payload_inline, payload_path, file_size_bytes, latitude,
                longitude, owner_id, owner_name, created_at_ms, updated_at_ms
            )
            VALUES (?, ?, ?, 'pending', 0, NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.kind.as_str())
        .bind(&item.filename)
        .bind(&item.mime_type)
        .bind(inline)
        .bind(path)
        .bind(file_size)
        .bind(item.location.map(|l| l.latitude))
        .bind(item.location.map(|l| l.longitude))
        .bind(item.owner.as_ref().map(|o| o.user_id))
        .bind(item.owner.as_ref().map(|o| o.display_name.clone()))
        .bind(item.created_at_ms)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        let id = ItemId(result.last_insert_rowid());
        debug!(item_kind = %self.kind, item_id = %id, "item inserted");
        Ok(id)
    }

    async fn get(&self, id: ItemId) -> anyhow::Result<Option<QueueItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM queue_items WHERE id = ? AND kind = ?"
        );
        let row = sqlx::query(&sql)
            .bind(id.0)
            .bind(self.kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn list(&self) -> anyhow::Result<Vec<QueueItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM queue_items WHERE kind = ? \
             ORDER BY created_at_ms DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(self.kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn list_by_owner(&self, user_id: i64) -> anyhow::Result<Vec<QueueItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM queue_items \
             WHERE kind = ? AND owner_id = ? \
             ORDER BY created_at_ms DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(self.kind.as_str())
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn delete(&self, id: ItemId) -> anyhow::Result<bool> {
        let result =
            sqlx::query("DELETE FROM queue_items WHERE id = ? AND kind = ?")
                .bind(id.0)
                .bind(self.kind.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn status_counts(&self) -> anyhow::Result<StatusCounts> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n
            FROM queue_items
            WHERE kind = ?
            GROUP BY status
            "#,
        )
        .bind(self.kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            counts.add(status.parse()?, u64::try_from(n)?);
        }
        Ok(counts)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn item_from_row(row: &SqliteRow) -> anyhow::Result<QueueItem> {
    let id = ItemId(row.try_get("id")?);
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let retries: i64 = row.try_get("retries")?;

    let inline: Option<Vec<u8>> = row.try_get("payload_inline")?;
    let path: Option<String> = row.try_get("payload_path")?;
    let payload = match (inline, path) {
        (Some(bytes), _) => Payload::Inline { bytes },
        (None, Some(path)) => Payload::Path {
            path: PathBuf::from(path),
        },
        (None, None) => anyhow::bail!("item {id} has no payload"),
    };

    let file_size: Option<i64> = row.try_get("file_size_bytes")?;
    let owner_id: Option<i64> = row.try_get("owner_id")?;
    let owner_name: Option<String> = row.try_get("owner_name")?;
    let latitude: Option<f64> = row.try_get("latitude")?;
    let longitude: Option<f64> = row.try_get("longitude")?;

    Ok(QueueItem {
        id,
        kind: kind.parse()?,
        filename: row.try_get("filename")?,
        status: status
            .parse()
            .with_context(|| format!("item {id} has invalid status"))?,
        retries: u32::try_from(retries)?,
        server_id: row.try_get("server_id")?,
        payload,
        mime_type: row.try_get("mime_type")?,
        file_size_bytes: file_size.map(u64::try_from).transpose()?,
        created_at_ms: row.try_get("created_at_ms")?,
        owner: owner_id.map(|user_id| Owner {
            user_id,
            display_name: owner_name.unwrap_or_default(),
        }),
        location: match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(name: &str) -> NewItem {
        NewItem::new(
            name,
            "image/jpeg",
            Payload::Inline {
                bytes: vec![1, 2, 3],
            },
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let store = SqliteRecordStore::open_in_memory(ItemKind::Asset)
            .await
            .unwrap();

        let id = store
            .insert(
                photo("IMG_1.jpg")
                    .with_owner(3, "surveyor")
                    .with_location(47.6, -122.3),
            )
            .await
            .unwrap();

        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.filename, "IMG_1.jpg");
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.retries, 0);
        assert_eq!(item.file_size_bytes, Some(3));
        assert_eq!(item.owner.unwrap().display_name, "surveyor");
        assert_eq!(item.location.unwrap().latitude, 47.6);
    }

    #[tokio::test]
    async fn test_kinds_are_isolated() {
        let assets = SqliteRecordStore::open_in_memory(ItemKind::Asset)
            .await
            .unwrap();
        let files = assets.with_kind(ItemKind::File);

        let id = assets.insert(photo("a.jpg")).await.unwrap();
        files
            .insert(NewItem::new(
                "report.csv",
                "text/csv",
                Payload::Path {
                    path: PathBuf::from("/tmp/report.csv"),
                },
            ))
            .await
            .unwrap();

        assert!(files.get(id).await.unwrap().is_none());
        assert_eq!(assets.count_pending().await.unwrap(), 1);
        assert_eq!(files.count_pending().await.unwrap(), 1);
        assert_eq!(files.reserve_pending(10, 5).await.unwrap().len(), 1);
        assert_eq!(assets.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reserve_claims_oldest_first() {
        let store = SqliteRecordStore::open_in_memory(ItemKind::Asset)
            .await
            .unwrap();
        for (name, ts) in [("c", 300), ("a", 100), ("b", 200)] {
            store
                .insert(photo(name).with_created_at_ms(ts))
                .await
                .unwrap();
        }

        let claimed = store.reserve_pending(2, 5).await.unwrap();
        let names: Vec<_> =
            claimed.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(claimed.iter().all(|i| i.status == ItemStatus::Uploading));
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_uploaded_rejects_conflicting_server_id() {
        let store = SqliteRecordStore::open_in_memory(ItemKind::Asset)
            .await
            .unwrap();
        let id = store.insert(photo("x.jpg")).await.unwrap();

        store.mark_uploaded(id, "srv-1").await.unwrap();
        store.mark_uploaded(id, "srv-1").await.unwrap();
        assert!(store.mark_uploaded(id, "srv-2").await.is_err());
        assert!(store.mark_uploaded(ItemId(999), "srv-3").await.is_err());

        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.server_id.as_deref(), Some("srv-1"));
        assert_eq!(item.status, ItemStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_reset_one_only_revives_failed_items() {
        let store = SqliteRecordStore::open_in_memory(ItemKind::Asset)
            .await
            .unwrap();
        let failed = store.insert(photo("failed.jpg")).await.unwrap();
        let done = store.insert(photo("done.jpg")).await.unwrap();

        store.increment_retry_capped(failed, 5).await.unwrap();
        store.mark_failed(failed).await.unwrap();
        store.mark_uploaded(done, "srv-1").await.unwrap();

        store.reset_one(failed).await.unwrap();
        let item = store.get(failed).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.retries, 0);

        let err = store.reset_one(done).await.unwrap_err();
        assert!(err.to_string().contains("only failed items"));
        let item = store.get(done).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Uploaded);
        assert_eq!(item.server_id.as_deref(), Some("srv-1"));

        assert!(store.reset_one(ItemId(999)).await.is_err());
    }

    #[tokio::test]
    async fn test_increment_retry_is_capped() {
        let store = SqliteRecordStore::open_in_memory(ItemKind::Asset)
            .await
            .unwrap();
        let id = store.insert(photo("x.jpg")).await.unwrap();

        for expected in 1..=3 {
            assert_eq!(store.increment_retry_capped(id, 3).await.unwrap(), expected);
        }
        assert_eq!(store.increment_retry_capped(id, 3).await.unwrap(), 3);
        assert!(store.increment_retry_capped(ItemId(42), 3).await.is_err());
    }

    #[tokio::test]
    async fn test_status_counts_and_delete() {
        let store = SqliteRecordStore::open_in_memory(ItemKind::Asset)
            .await
            .unwrap();
        let a = store.insert(photo("a")).await.unwrap();
        let b = store.insert(photo("b")).await.unwrap();
        store.insert(photo("c")).await.unwrap();
        store.mark_uploaded(a, "srv-a").await.unwrap();
        store.mark_failed(b).await.unwrap();

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.uploaded, 1);
        assert_eq!(counts.failed, 1);

        assert!(store.delete(b).await.unwrap());
        assert!(!store.delete(b).await.unwrap());
        assert_eq!(store.status_counts().await.unwrap().total(), 2);
    }
}
