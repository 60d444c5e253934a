//! Turns an export request into a job: a set of batches persisted together.

use chrono::{DateTime, Utc};
use claimsgate_storage::{Batch, DynJobRepository, DynRosterDirectory, JobSpec, ResourceType};
use uuid::Uuid;

use super::ExportError;

/// Priority of a job for exactly one subject. Lower runs first.
pub const SINGLE_SUBJECT_PRIORITY: i32 = 1000;
/// Priority of every multi-subject job.
pub const BULK_PRIORITY: i32 = 5000;

/// Everything needed to submit one export.
#[derive(Debug, Clone)]
pub struct ExportSubmission {
    pub organization_id: Uuid,
    pub provider_id: String,
    /// Beneficiary identifiers, in roster order
    pub subjects: Vec<String>,
    pub resource_types: Vec<ResourceType>,
    pub since: Option<DateTime<Utc>>,
    pub request_url: String,
    pub request_ip: Option<String>,
}

pub fn priority_for(subject_count: usize) -> i32 {
    if subject_count == 1 {
        SINGLE_SUBJECT_PRIORITY
    } else {
        BULK_PRIORITY
    }
}

pub struct JobOrchestrator {
    repo: DynJobRepository,
    directory: DynRosterDirectory,
    batch_size: usize,
}

impl JobOrchestrator {
    pub fn new(repo: DynJobRepository, directory: DynRosterDirectory, batch_size: usize) -> Self {
        Self {
            repo,
            directory,
            batch_size: batch_size.max(1),
        }
    }

    /// Validates the submission, resolves requester NPIs and persists every
    /// batch of the new job in one repository call.
    pub async fn submit_export(&self, request: ExportSubmission) -> Result<Uuid, ExportError> {
        if request.subjects.is_empty() {
            return Err(ExportError::validation("no patients found for export request"));
        }
        if request.resource_types.is_empty() {
            return Err(ExportError::validation("at least one resource type is required"));
        }
        if let Some(bad) = request.resource_types.iter().find(|t| !t.is_requestable()) {
            return Err(ExportError::validation(format!(
                "resource type {bad} cannot be exported"
            )));
        }

        let organization_npi = self
            .directory
            .organization_npi(request.organization_id)
            .await?
            .ok_or_else(|| {
                ExportError::validation(format!(
                    "data error: no NPI for organization {}",
                    request.organization_id
                ))
            })?;
        let provider_npi = self
            .directory
            .provider_npi(request.organization_id, &request.provider_id)
            .await?
            .ok_or_else(|| {
                ExportError::validation(format!(
                    "data error: no NPI for provider {}",
                    request.provider_id
                ))
            })?;

        let subject_count = request.subjects.len();
        let spec = JobSpec {
            job_id: Uuid::new_v4(),
            organization_id: request.organization_id,
            organization_npi,
            provider_id: request.provider_id,
            provider_npi,
            resource_types: request.resource_types,
            since: request.since,
            transaction_time: Utc::now(),
            priority: priority_for(subject_count),
            is_bulk: subject_count > 1,
            request_url: request.request_url,
            request_ip: request.request_ip,
        };

        let batches: Vec<Batch> = request
            .subjects
            .chunks(self.batch_size)
            .map(|chunk| Batch::queued(&spec, chunk.to_vec()))
            .collect();

        self.repo.create_batches(&batches).await?;

        tracing::info!(
            job_id = %spec.job_id,
            organization_id = %spec.organization_id,
            batches = batches.len(),
            patients = subject_count,
            priority = spec.priority,
            "export job submitted"
        );
        Ok(spec.job_id)
    }
}
