//! Repository traits that every storage backend implements.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageError;
use crate::types::{Batch, BatchFile};

/// Persistence boundary for batches and the files they produce.
///
/// A job is never stored on its own: it is the set of batches sharing a
/// `job_id`, and it exists exactly as long as at least one of those batches
/// does. Callers must not assume a job can be looked up independently of its
/// batches.
///
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use claimsgate_storage::{JobRepository, StorageError};
///
/// async fn progress(repo: &dyn JobRepository, job_id: uuid::Uuid) -> Result<i32, StorageError> {
///     let batches = repo.batches_for_job(job_id).await?;
///     Ok(batches.iter().map(|b| b.patients_processed).sum())
/// }
/// ```
#[async_trait]
pub trait JobRepository: Send + Sync {
    // ==================== Submission ====================

    /// Persists every batch of one job atomically.
    ///
    /// Either all batches become visible or none do.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidBatch` if the slice is empty, mixes job
    /// ids, or any batch violates its invariants.
    async fn create_batches(&self, batches: &[Batch]) -> Result<(), StorageError>;

    // ==================== Lookup ====================

    /// All batches of a job, ordered by submit time. Empty when the job is unknown.
    async fn batches_for_job(&self, job_id: Uuid) -> Result<Vec<Batch>, StorageError>;

    /// All files produced by the batches of a job.
    async fn files_for_job(&self, job_id: Uuid) -> Result<Vec<BatchFile>, StorageError>;

    /// Reads one batch by id.
    async fn batch(&self, batch_id: Uuid) -> Result<Option<Batch>, StorageError>;

    /// Looks up a produced file by its deterministic name.
    async fn find_file(&self, file_name: &str) -> Result<Option<BatchFile>, StorageError>;

    // ==================== Worker lifecycle ====================

    /// Claims the next QUEUED batch for `worker_id` and marks it RUNNING.
    ///
    /// Lowest priority value first, then oldest submit time. Returns `None`
    /// when nothing is claimable. A batch is never handed to two workers.
    async fn claim_batch(&self, worker_id: Uuid) -> Result<Option<Batch>, StorageError>;

    /// Records how many patients of a RUNNING batch have been processed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidTransition` if the batch is not RUNNING,
    /// and `StorageError::InvalidBatch` if `processed` exceeds the total.
    async fn update_progress(&self, batch_id: Uuid, processed: i32) -> Result<(), StorageError>;

    /// Marks a RUNNING batch COMPLETED and records its files in the same step.
    async fn complete_batch(
        &self,
        batch_id: Uuid,
        files: &[BatchFile],
    ) -> Result<(), StorageError>;

    /// Marks a batch FAILED.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidTransition` if the batch is already terminal.
    async fn fail_batch(&self, batch_id: Uuid) -> Result<(), StorageError>;
}

/// Checks the shape of a submission before it is persisted.
pub fn validate_submission(batches: &[Batch]) -> Result<(), StorageError> {
    let Some(first) = batches.first() else {
        return Err(StorageError::invalid_batch("a job needs at least one batch"));
    };
    for batch in batches {
        if batch.job_id != first.job_id {
            return Err(StorageError::invalid_batch(format!(
                "batch {} belongs to job {}, expected {}",
                batch.batch_id, batch.job_id, first.job_id
            )));
        }
        batch.check_invariants()?;
    }
    Ok(())
}
