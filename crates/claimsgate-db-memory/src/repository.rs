use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use claimsgate_storage::{
    Batch, BatchFile, BatchStatus, JobRepository, StorageError, validate_submission,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    batches: HashMap<Uuid, Batch>,
    /// Files keyed by their deterministic name.
    files: HashMap<String, BatchFile>,
}

/// Job repository held entirely in memory.
///
/// Every mutation takes the single write lock, so a submission of many
/// batches becomes visible in one step and a claim can never race another.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    state: RwLock<State>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored batches across all jobs.
    pub async fn len(&self) -> usize {
        self.state.read().await.batches.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn running_batch(state: &mut State, batch_id: Uuid, to: BatchStatus) -> Result<&mut Batch, StorageError> {
    let batch = state
        .batches
        .get_mut(&batch_id)
        .ok_or_else(|| StorageError::not_found("batch", batch_id.to_string()))?;
    if batch.status != BatchStatus::Running {
        return Err(StorageError::invalid_transition(batch_id, batch.status, to));
    }
    Ok(batch)
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create_batches(&self, batches: &[Batch]) -> Result<(), StorageError> {
        validate_submission(batches)?;
        let mut state = self.state.write().await;
        if let Some(dup) = batches.iter().find(|b| state.batches.contains_key(&b.batch_id)) {
            return Err(StorageError::invalid_batch(format!(
                "batch {} already exists",
                dup.batch_id
            )));
        }
        for batch in batches {
            state.batches.insert(batch.batch_id, batch.clone());
        }
        tracing::debug!(
            job_id = %batches[0].job_id,
            batches = batches.len(),
            "stored job batches"
        );
        Ok(())
    }

    async fn batches_for_job(&self, job_id: Uuid) -> Result<Vec<Batch>, StorageError> {
        let state = self.state.read().await;
        let mut batches: Vec<Batch> = state
            .batches
            .values()
            .filter(|b| b.job_id == job_id)
            .cloned()
            .collect();
        batches.sort_by(|a, b| {
            a.submit_time
                .cmp(&b.submit_time)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });
        Ok(batches)
    }

    async fn files_for_job(&self, job_id: Uuid) -> Result<Vec<BatchFile>, StorageError> {
        let state = self.state.read().await;
        let mut files: Vec<BatchFile> = state
            .files
            .values()
            .filter(|f| {
                state
                    .batches
                    .get(&f.batch_id)
                    .is_some_and(|b| b.job_id == job_id)
            })
            .cloned()
            .collect();
        files.sort_by(|a, b| {
            (a.batch_id, a.resource_type, a.sequence).cmp(&(b.batch_id, b.resource_type, b.sequence))
        });
        Ok(files)
    }

    async fn batch(&self, batch_id: Uuid) -> Result<Option<Batch>, StorageError> {
        Ok(self.state.read().await.batches.get(&batch_id).cloned())
    }

    async fn find_file(&self, file_name: &str) -> Result<Option<BatchFile>, StorageError> {
        Ok(self.state.read().await.files.get(file_name).cloned())
    }

    async fn claim_batch(&self, worker_id: Uuid) -> Result<Option<Batch>, StorageError> {
        let mut state = self.state.write().await;
        let next = state
            .batches
            .values()
            .filter(|b| b.status == BatchStatus::Queued)
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.submit_time.cmp(&b.submit_time))
            })
            .map(|b| b.batch_id);

        let Some(batch_id) = next else {
            return Ok(None);
        };
        let Some(batch) = state.batches.get_mut(&batch_id) else {
            return Ok(None);
        };
        batch.status = BatchStatus::Running;
        batch.worker_id = Some(worker_id);
        batch.update_time = Some(Utc::now());
        Ok(Some(batch.clone()))
    }

    async fn update_progress(&self, batch_id: Uuid, processed: i32) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        let batch = running_batch(&mut state, batch_id, BatchStatus::Running)?;
        if processed < 0 || processed > batch.total_patients {
            return Err(StorageError::invalid_batch(format!(
                "batch {batch_id}: progress {processed} outside 0..={}",
                batch.total_patients
            )));
        }
        batch.patients_processed = processed;
        batch.update_time = Some(Utc::now());
        Ok(())
    }

    async fn complete_batch(
        &self,
        batch_id: Uuid,
        files: &[BatchFile],
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        if let Some(foreign) = files.iter().find(|f| f.batch_id != batch_id) {
            return Err(StorageError::invalid_batch(format!(
                "file {} does not belong to batch {batch_id}",
                foreign.file_name
            )));
        }
        if let Some(dup) = files.iter().find(|f| state.files.contains_key(&f.file_name)) {
            return Err(StorageError::invalid_batch(format!(
                "file {} already recorded",
                dup.file_name
            )));
        }

        let now = Utc::now();
        let batch = running_batch(&mut state, batch_id, BatchStatus::Completed)?;
        batch.status = BatchStatus::Completed;
        batch.complete_time = Some(now);
        batch.update_time = Some(now);

        for file in files {
            state.files.insert(file.file_name.clone(), file.clone());
        }
        Ok(())
    }

    async fn fail_batch(&self, batch_id: Uuid) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        let batch = state
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| StorageError::not_found("batch", batch_id.to_string()))?;
        if !batch.status.can_transition_to(BatchStatus::Failed) {
            return Err(StorageError::invalid_transition(
                batch_id,
                batch.status,
                BatchStatus::Failed,
            ));
        }
        let now = Utc::now();
        batch.status = BatchStatus::Failed;
        batch.complete_time = Some(now);
        batch.update_time = Some(now);
        Ok(())
    }
}
