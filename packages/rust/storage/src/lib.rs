//! libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a local libSQL database holding
//! benchmark datasets and the annotation cache. It also implements
//! [`DatasetStore`], so `benchforge upload --local` can materialize
//! datasets without a remote dataset service.
//!
//! Item inserts made through [`DatasetStore::create_dataset_item`] are
//! batched in one transaction that [`DatasetStore::flush`] commits.

mod migrations;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use benchforge_shared::{
    BenchError, BenchmarkRecord, DatasetStore, FlushReport, RecordInput, RecordMetadata,
    RemoteDataset, Result,
};
use chrono::Utc;
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    /// Set while a batch of item inserts is open and not yet committed.
    batch_open: AtomicBool,
    /// Items inserted into the open batch.
    batch_items: AtomicUsize,
}

fn db_err(e: libsql::Error) -> BenchError {
    BenchError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BenchError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            batch_open: AtomicBool::new(false),
            batch_items: AtomicUsize::new(0),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` without write access.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            batch_open: AtomicBool::new(false),
            batch_items: AtomicUsize::new(0),
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    BenchError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(BenchError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Datasets
    // -----------------------------------------------------------------------

    /// Look up a dataset and count its items.
    pub async fn find_dataset(&self, name: &str) -> Result<Option<RemoteDataset>> {
        let mut rows = self
            .conn
            .query(
                "SELECT d.name, COUNT(i.id)
                 FROM datasets d
                 LEFT JOIN dataset_items i ON i.dataset_id = d.id
                 WHERE d.name = ?1
                 GROUP BY d.id",
                params![name],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let name: String = row.get(0).map_err(db_err)?;
                let count: i64 = row.get(1).map_err(db_err)?;
                Ok(Some(RemoteDataset {
                    name,
                    item_count: usize::try_from(count).unwrap_or(0),
                }))
            }
            None => Ok(None),
        }
    }

    /// Create a dataset. Creating a name that already exists is a no-op.
    pub async fn insert_dataset(&self, name: &str) -> Result<()> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO datasets (id, name, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO NOTHING",
                params![id.as_str(), name, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Append a record at the end of a dataset.
    pub async fn insert_item(&self, dataset_name: &str, record: &BenchmarkRecord) -> Result<()> {
        self.check_writable()?;
        let dataset_id = self.dataset_id(dataset_name).await?.ok_or_else(|| {
            BenchError::Storage(format!("dataset '{dataset_name}' does not exist"))
        })?;

        let input_json =
            serde_json::to_string(&record.input).map_err(|e| BenchError::parse(e.to_string()))?;
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| BenchError::parse(e.to_string()))?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO dataset_items
                   (id, dataset_id, position, input_json, expected_output, metadata_json, created_at)
                 VALUES (?1, ?2,
                   (SELECT COALESCE(MAX(position) + 1, 0) FROM dataset_items WHERE dataset_id = ?2),
                   ?3, ?4, ?5, ?6)",
                params![
                    id.as_str(),
                    dataset_id.as_str(),
                    input_json.as_str(),
                    record.expected_output.as_str(),
                    metadata_json.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// All records of a dataset in insertion order.
    pub async fn list_items(&self, dataset_name: &str) -> Result<Vec<BenchmarkRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT i.input_json, i.expected_output, i.metadata_json
                 FROM dataset_items i
                 JOIN datasets d ON d.id = i.dataset_id
                 WHERE d.name = ?1
                 ORDER BY i.position",
                params![dataset_name],
            )
            .await
            .map_err(db_err)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn dataset_id(&self, name: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT id FROM datasets WHERE name = ?1", params![name])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    /// Open the insert batch if none is running.
    async fn begin_batch(&self) -> Result<()> {
        if self
            .batch_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Err(e) = self.conn.execute("BEGIN", params![]).await {
                self.batch_open.store(false, Ordering::Release);
                return Err(db_err(e));
            }
            tracing::debug!("opened dataset item batch");
        }
        Ok(())
    }

    /// Commit the insert batch, if one is open. Returns the items it held.
    async fn commit_batch(&self) -> Result<usize> {
        let items = self.batch_items.swap(0, Ordering::AcqRel);
        if self.batch_open.swap(false, Ordering::AcqRel) {
            self.conn
                .execute("COMMIT", params![])
                .await
                .map_err(db_err)?;
            tracing::debug!(items, "committed dataset item batch");
        }
        Ok(items)
    }

    // -----------------------------------------------------------------------
    // Annotation cache
    // -----------------------------------------------------------------------

    /// Look up a cached annotation by prompt hash and model.
    pub async fn get_annotation_cache(
        &self,
        prompt_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result_json FROM annotation_cache
                 WHERE prompt_hash = ?1 AND model_id = ?2",
                params![prompt_hash, model_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    /// Store an annotation in the cache (upserts).
    pub async fn set_annotation_cache(
        &self,
        prompt_hash: &str,
        model_id: &str,
        result_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO annotation_cache (id, prompt_hash, model_id, result_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(prompt_hash, model_id) DO UPDATE SET
                   result_json = excluded.result_json,
                   created_at = excluded.created_at",
                params![id.as_str(), prompt_hash, model_id, result_json, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Drop every cached annotation. Returns the number of rows removed.
    pub async fn clear_annotation_cache(&self) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM annotation_cache", params![])
            .await
            .map_err(db_err)
    }
}

impl DatasetStore for Storage {
    async fn get_dataset(&self, name: &str) -> Result<Option<RemoteDataset>> {
        self.find_dataset(name).await
    }

    async fn create_dataset(&self, name: &str) -> Result<()> {
        self.insert_dataset(name).await
    }

    async fn create_dataset_item(&self, dataset_name: &str, record: &BenchmarkRecord) -> Result<()> {
        self.check_writable()?;
        self.begin_batch().await?;
        self.insert_item(dataset_name, record).await?;
        self.batch_items.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn flush(&self) -> Result<FlushReport> {
        let delivered = self.commit_batch().await?;
        Ok(FlushReport {
            delivered,
            rejected: 0,
        })
    }
}

fn row_to_record(row: &libsql::Row) -> Result<BenchmarkRecord> {
    let input_json: String = row.get(0).map_err(db_err)?;
    let expected_output: String = row.get(1).map_err(db_err)?;
    let metadata_json: String = row.get(2).map_err(db_err)?;

    let input: RecordInput = serde_json::from_str(&input_json)
        .map_err(|e| BenchError::parse(format!("stored input: {e}")))?;
    let metadata: RecordMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| BenchError::parse(format!("stored metadata: {e}")))?;

    Ok(BenchmarkRecord {
        input,
        expected_output,
        metadata,
    })
}
