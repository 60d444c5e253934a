//! Background batch workers
//!
//! Each worker claims the next QUEUED batch, looks every patient up in the
//! claims source, writes the returned resources to NDJSON and finishes the
//! batch as COMPLETED (with its files) or FAILED. Workers are the only writers
//! of batch status and progress.

use std::path::PathBuf;
use std::time::Duration;

use chrono::SecondsFormat;
use claimsgate_api::OperationOutcome;
use claimsgate_bfd::{BfdError, Bundle, DynClaimsSource};
use claimsgate_storage::{Batch, BatchFile, DynJobRepository, ResourceType, StorageError};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::export::{NdjsonWriter, NdjsonWriterError};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("claims source: {0}")]
    Claims(#[from] BfdError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("output: {0}")]
    Output(#[from] NdjsonWriterError),
}

/// `_lastUpdated` lower bound for incremental exports.
pub fn since_param(batch: &Batch) -> Option<String> {
    batch
        .since
        .map(|s| format!("gt{}", s.to_rfc3339_opts(SecondsFormat::Nanos, true)))
}

/// Error line recorded for a patient the claims source does not know.
pub fn not_found_outcome(mbi: &str) -> Value {
    let outcome = OperationOutcome::single(
        "error",
        "not-found",
        format!("Error retrieving beneficiary for patient identifier {mbi}"),
    );
    serde_json::to_value(outcome).unwrap_or(Value::Null)
}

#[derive(Clone)]
pub struct BatchWorker {
    id: Uuid,
    repo: DynJobRepository,
    claims: DynClaimsSource,
    export_root: PathBuf,
    max_resources_per_file: usize,
}

impl BatchWorker {
    pub fn new(
        repo: DynJobRepository,
        claims: DynClaimsSource,
        export_root: impl Into<PathBuf>,
        max_resources_per_file: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            repo,
            claims,
            export_root: export_root.into(),
            max_resources_per_file,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Claims and processes at most one batch.
    ///
    /// Returns the id of the batch that was handled, `None` when the queue is empty.
    pub async fn run_once(&self) -> Result<Option<Uuid>, StorageError> {
        let Some(batch) = self.repo.claim_batch(self.id).await? else {
            return Ok(None);
        };
        let span = info_span!(
            "batch",
            job_id = %batch.job_id,
            batch_id = %batch.batch_id,
            worker_id = %self.id
        );
        self.handle_batch(&batch).instrument(span).await?;
        Ok(Some(batch.batch_id))
    }

    async fn handle_batch(&self, batch: &Batch) -> Result<(), StorageError> {
        info!(patients = batch.total_patients, "batch claimed");
        match self.process_batch(batch).await {
            Ok(files) => {
                if let Err(e) = self.repo.complete_batch(batch.batch_id, &files).await {
                    error!(error = %e, "recording batch completion failed");
                    self.repo.fail_batch(batch.batch_id).await?;
                    return Err(e);
                }
                info!(files = files.len(), "batch completed");
            }
            Err(e) => {
                error!(error = %e, "batch failed");
                self.repo.fail_batch(batch.batch_id).await?;
            }
        }
        Ok(())
    }

    async fn process_batch(&self, batch: &Batch) -> Result<Vec<BatchFile>, WorkerError> {
        let mut writer =
            NdjsonWriter::new(&self.export_root, batch.batch_id, self.max_resources_per_file)
                .await?;
        match self.export_patients(batch, &mut writer).await {
            Ok(()) => Ok(writer.finish().await?),
            Err(e) => {
                if let Err(cleanup) = writer.abandon().await {
                    warn!(error = %cleanup, "could not remove partial output");
                }
                Err(e)
            }
        }
    }

    async fn export_patients(
        &self,
        batch: &Batch,
        writer: &mut NdjsonWriter,
    ) -> Result<(), WorkerError> {
        let since = since_param(batch);
        for (done, mbi) in (1..).zip(batch.patients.iter()) {
            match self.resolve_beneficiary(mbi).await? {
                None => {
                    warn!(position = done, "beneficiary not found");
                    writer
                        .write_resource(ResourceType::OperationOutcome, &not_found_outcome(mbi))
                        .await?;
                }
                Some(beneficiary_id) => {
                    for resource_type in &batch.resource_types {
                        let bundle = self
                            .fetch(*resource_type, &beneficiary_id, batch, since.as_deref())
                            .await?;
                        writer.write_resources(*resource_type, &bundle.entries).await?;
                    }
                }
            }
            self.repo.update_progress(batch.batch_id, done).await?;
        }
        Ok(())
    }

    async fn resolve_beneficiary(&self, mbi: &str) -> Result<Option<String>, BfdError> {
        let hashed = self.claims.hash_identifier(mbi);
        let raw = self.claims.fetch_by_identifier_hash(&hashed).await?;
        let bundle = Bundle::from_json(&raw)?;
        Ok(bundle.first_id().map(str::to_string))
    }

    async fn fetch(
        &self,
        resource_type: ResourceType,
        beneficiary_id: &str,
        batch: &Batch,
        since: Option<&str>,
    ) -> Result<Bundle, BfdError> {
        let requester = batch.organization_npi.as_str();
        let as_of = batch.transaction_time;
        match resource_type {
            ResourceType::Patient => {
                self.claims
                    .fetch_patient(beneficiary_id, batch.job_id, requester, since, as_of)
                    .await
            }
            ResourceType::Coverage => {
                self.claims
                    .fetch_coverage(beneficiary_id, batch.job_id, requester, since, as_of)
                    .await
            }
            ResourceType::ExplanationOfBenefit => {
                self.claims
                    .fetch_explanation_of_benefit(
                        beneficiary_id,
                        batch.job_id,
                        requester,
                        since,
                        as_of,
                        None,
                    )
                    .await
            }
            ResourceType::OperationOutcome => Ok(Bundle::default()),
        }
    }

    /// Processes batches until `shutdown` flips to true.
    ///
    /// A batch in progress is always finished before the worker exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>, idle_sleep: Duration) {
        info!(worker_id = %self.id, "batch worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.run_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "batch worker storage error");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(idle_sleep) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!(worker_id = %self.id, "batch worker stopped");
    }
}

/// A fixed set of workers sharing one shutdown signal.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(config: &WorkerConfig, template: &BatchWorker) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handles = (0..config.concurrency)
            .map(|_| {
                let worker = BatchWorker {
                    id: Uuid::new_v4(),
                    ..template.clone()
                };
                tokio::spawn(worker.run(rx.clone(), config.poll_interval()))
            })
            .collect();
        Self { shutdown, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signals every worker and waits for them to finish their current batch.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in futures_util::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "batch worker task panicked");
            }
        }
    }
}
