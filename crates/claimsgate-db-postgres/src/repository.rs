//! PostgreSQL implementation of [`JobRepository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx_core::query::query;
use sqlx_core::row::Row;
use sqlx_postgres::{PgPool, PgRow};
use tracing::{debug, instrument};
use uuid::Uuid;

use claimsgate_storage::{
    Batch, BatchFile, BatchStatus, JobRepository, StorageError, validate_submission,
};

use crate::error::storage_error;

const BATCH_COLUMNS: &str = r#"
    batch_id, job_id, organization_id, organization_npi, provider_id, provider_npi,
    patients, resource_types, since, transaction_time, priority, is_bulk, status,
    total_patients, patients_processed, submit_time, update_time, complete_time,
    request_url, request_ip, worker_id
"#;

const FILE_COLUMNS: &str =
    "f.batch_id, f.resource_type, f.sequence, f.file_name, f.count, f.checksum, f.file_length";

/// Job repository backed by PostgreSQL.
///
/// Submissions are written in one transaction; claims use
/// `FOR UPDATE SKIP LOCKED` so concurrent workers never share a batch.
#[derive(Debug, Clone)]
pub struct PostgresJobRepository {
    pool: PgPool,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Explains why a guarded status update touched no rows.
    async fn transition_error(&self, batch_id: Uuid, to: BatchStatus) -> StorageError {
        match self.batch(batch_id).await {
            Ok(Some(batch)) => StorageError::invalid_transition(batch_id, batch.status, to),
            Ok(None) => StorageError::not_found("batch", batch_id.to_string()),
            Err(e) => e,
        }
    }
}

fn row_to_batch(row: &PgRow) -> Result<Batch, StorageError> {
    let status: String = row.try_get("status").map_err(storage_error)?;
    let patients: String = row.try_get("patients").map_err(storage_error)?;
    let resource_types: String = row.try_get("resource_types").map_err(storage_error)?;

    Ok(Batch {
        batch_id: row.try_get("batch_id").map_err(storage_error)?,
        job_id: row.try_get("job_id").map_err(storage_error)?,
        organization_id: row.try_get("organization_id").map_err(storage_error)?,
        organization_npi: row.try_get("organization_npi").map_err(storage_error)?,
        provider_id: row.try_get("provider_id").map_err(storage_error)?,
        provider_npi: row.try_get("provider_npi").map_err(storage_error)?,
        patients: Batch::split_patients(&patients),
        resource_types: Batch::split_resource_types(&resource_types)?,
        since: row.try_get("since").map_err(storage_error)?,
        transaction_time: row.try_get("transaction_time").map_err(storage_error)?,
        priority: row.try_get("priority").map_err(storage_error)?,
        is_bulk: row.try_get("is_bulk").map_err(storage_error)?,
        status: status.parse().map_err(StorageError::internal)?,
        total_patients: row.try_get("total_patients").map_err(storage_error)?,
        patients_processed: row.try_get("patients_processed").map_err(storage_error)?,
        submit_time: row.try_get("submit_time").map_err(storage_error)?,
        update_time: row.try_get("update_time").map_err(storage_error)?,
        complete_time: row.try_get("complete_time").map_err(storage_error)?,
        request_url: row.try_get("request_url").map_err(storage_error)?,
        request_ip: row.try_get("request_ip").map_err(storage_error)?,
        worker_id: row.try_get("worker_id").map_err(storage_error)?,
    })
}

fn row_to_file(row: &PgRow) -> Result<BatchFile, StorageError> {
    let resource_type: String = row.try_get("resource_type").map_err(storage_error)?;
    Ok(BatchFile {
        batch_id: row.try_get("batch_id").map_err(storage_error)?,
        resource_type: resource_type.parse().map_err(StorageError::internal)?,
        sequence: row.try_get("sequence").map_err(storage_error)?,
        file_name: row.try_get("file_name").map_err(storage_error)?,
        count: row.try_get("count").map_err(storage_error)?,
        checksum: row.try_get("checksum").map_err(storage_error)?,
        file_length: row.try_get("file_length").map_err(storage_error)?,
    })
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    #[instrument(skip(self, batches), fields(batches = batches.len()))]
    async fn create_batches(&self, batches: &[Batch]) -> Result<(), StorageError> {
        validate_submission(batches)?;

        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        for batch in batches {
            query(
                r#"
                INSERT INTO job_queue_batch (
                    batch_id, job_id, organization_id, organization_npi, provider_id,
                    provider_npi, patients, resource_types, since, transaction_time,
                    priority, is_bulk, status, total_patients, patients_processed,
                    submit_time, request_url, request_ip
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                "#,
            )
            .bind(batch.batch_id)
            .bind(batch.job_id)
            .bind(batch.organization_id)
            .bind(&batch.organization_npi)
            .bind(&batch.provider_id)
            .bind(&batch.provider_npi)
            .bind(batch.patients_joined())
            .bind(batch.resource_types_joined())
            .bind(batch.since)
            .bind(batch.transaction_time)
            .bind(batch.priority)
            .bind(batch.is_bulk)
            .bind(batch.status.as_str())
            .bind(batch.total_patients)
            .bind(batch.patients_processed)
            .bind(batch.submit_time)
            .bind(&batch.request_url)
            .bind(&batch.request_ip)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        }
        tx.commit().await.map_err(storage_error)?;

        debug!(job_id = %batches[0].job_id, "stored job batches");
        Ok(())
    }

    async fn batches_for_job(&self, job_id: Uuid) -> Result<Vec<Batch>, StorageError> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM job_queue_batch WHERE job_id = $1 ORDER BY submit_time, batch_id"
        );
        let rows: Vec<PgRow> = query(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.iter().map(row_to_batch).collect()
    }

    async fn files_for_job(&self, job_id: Uuid) -> Result<Vec<BatchFile>, StorageError> {
        let sql = format!(
            r#"SELECT {FILE_COLUMNS}
               FROM job_queue_batch_file f
               JOIN job_queue_batch b ON b.batch_id = f.batch_id
               WHERE b.job_id = $1
               ORDER BY f.batch_id, f.resource_type, f.sequence"#
        );
        let rows: Vec<PgRow> = query(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.iter().map(row_to_file).collect()
    }

    async fn batch(&self, batch_id: Uuid) -> Result<Option<Batch>, StorageError> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM job_queue_batch WHERE batch_id = $1");
        let row: Option<PgRow> = query(&sql)
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        row.as_ref().map(row_to_batch).transpose()
    }

    async fn find_file(&self, file_name: &str) -> Result<Option<BatchFile>, StorageError> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM job_queue_batch_file f WHERE f.file_name = $1");
        let row: Option<PgRow> = query(&sql)
            .bind(file_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        row.as_ref().map(row_to_file).transpose()
    }

    #[instrument(skip(self))]
    async fn claim_batch(&self, worker_id: Uuid) -> Result<Option<Batch>, StorageError> {
        let sql = format!(
            r#"UPDATE job_queue_batch
               SET status = 'RUNNING', worker_id = $1, update_time = now()
               WHERE batch_id = (
                   SELECT batch_id FROM job_queue_batch
                   WHERE status = 'QUEUED'
                   ORDER BY priority, submit_time
                   LIMIT 1
                   FOR UPDATE SKIP LOCKED
               )
               RETURNING {BATCH_COLUMNS}"#
        );
        let row: Option<PgRow> = query(&sql)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        row.as_ref().map(row_to_batch).transpose()
    }

    async fn update_progress(&self, batch_id: Uuid, processed: i32) -> Result<(), StorageError> {
        let result = query(
            r#"UPDATE job_queue_batch
               SET patients_processed = $2, update_time = now()
               WHERE batch_id = $1 AND status = 'RUNNING'"#,
        )
        .bind(batch_id)
        .bind(processed)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(batch_id, BatchStatus::Running).await);
        }
        Ok(())
    }

    #[instrument(skip(self, files), fields(files = files.len()))]
    async fn complete_batch(
        &self,
        batch_id: Uuid,
        files: &[BatchFile],
    ) -> Result<(), StorageError> {
        if let Some(foreign) = files.iter().find(|f| f.batch_id != batch_id) {
            return Err(StorageError::invalid_batch(format!(
                "file {} does not belong to batch {batch_id}",
                foreign.file_name
            )));
        }

        let now: DateTime<Utc> = Utc::now();
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let result = query(
            r#"UPDATE job_queue_batch
               SET status = 'COMPLETED', complete_time = $2, update_time = $2
               WHERE batch_id = $1 AND status = 'RUNNING'"#,
        )
        .bind(batch_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(storage_error)?;
            return Err(self.transition_error(batch_id, BatchStatus::Completed).await);
        }

        for file in files {
            query(
                r#"INSERT INTO job_queue_batch_file
                   (batch_id, resource_type, sequence, file_name, count, checksum, file_length)
                   VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
            )
            .bind(file.batch_id)
            .bind(file.resource_type.as_str())
            .bind(file.sequence)
            .bind(&file.file_name)
            .bind(file.count)
            .bind(&file.checksum)
            .bind(file.file_length)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        }
        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn fail_batch(&self, batch_id: Uuid) -> Result<(), StorageError> {
        let result = query(
            r#"UPDATE job_queue_batch
               SET status = 'FAILED', complete_time = now(), update_time = now()
               WHERE batch_id = $1 AND status IN ('QUEUED', 'RUNNING')"#,
        )
        .bind(batch_id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(batch_id, BatchStatus::Failed).await);
        }
        Ok(())
    }
}
