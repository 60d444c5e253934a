//! Batch model types shared by the repository backends and the server.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

/// Clinical resource types handled by the export pipeline.
///
/// `OperationOutcome` never appears in a request; it only tags error files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Patient,
    Coverage,
    ExplanationOfBenefit,
    OperationOutcome,
}

impl ResourceType {
    /// Resource types a client may request, in export order.
    pub const REQUESTABLE: [ResourceType; 3] = [
        ResourceType::Patient,
        ResourceType::Coverage,
        ResourceType::ExplanationOfBenefit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "Patient",
            Self::Coverage => "Coverage",
            Self::ExplanationOfBenefit => "ExplanationOfBenefit",
            Self::OperationOutcome => "OperationOutcome",
        }
    }

    /// Lowercase form used in output file names.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Coverage => "coverage",
            Self::ExplanationOfBenefit => "explanationofbenefit",
            Self::OperationOutcome => "operationoutcome",
        }
    }

    /// Error files go to the manifest `error` array, everything else to `output`.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::OperationOutcome)
    }

    pub fn is_requestable(&self) -> bool {
        !self.is_error()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Patient" => Ok(Self::Patient),
            "Coverage" => Ok(Self::Coverage),
            "ExplanationOfBenefit" => Ok(Self::ExplanationOfBenefit),
            "OperationOutcome" => Ok(Self::OperationOutcome),
            other => Err(format!("unknown resource type: {other}")),
        }
    }
}

/// Batch status as persisted by the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the worker lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Queued, Self::Failed)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown batch status: {other}")),
        }
    }
}

/// One unit of retrieval work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: Uuid,
    pub job_id: Uuid,
    pub organization_id: Uuid,
    pub organization_npi: String,
    pub provider_id: String,
    pub provider_npi: String,
    pub patients: Vec<String>,
    pub resource_types: Vec<ResourceType>,
    pub since: Option<DateTime<Utc>>,
    pub transaction_time: DateTime<Utc>,
    pub priority: i32,
    pub is_bulk: bool,
    pub status: BatchStatus,
    pub total_patients: i32,
    pub patients_processed: i32,
    pub submit_time: DateTime<Utc>,
    pub update_time: Option<DateTime<Utc>>,
    pub complete_time: Option<DateTime<Utc>>,
    pub request_url: String,
    pub request_ip: Option<String>,
    pub worker_id: Option<Uuid>,
}

/// Fields that are constant across every batch of one job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_id: Uuid,
    pub organization_id: Uuid,
    pub organization_npi: String,
    pub provider_id: String,
    pub provider_npi: String,
    pub resource_types: Vec<ResourceType>,
    pub since: Option<DateTime<Utc>>,
    pub transaction_time: DateTime<Utc>,
    pub priority: i32,
    pub is_bulk: bool,
    pub request_url: String,
    pub request_ip: Option<String>,
}

impl Batch {
    /// A freshly submitted batch for one chunk of patients.
    pub fn queued(spec: &JobSpec, patients: Vec<String>) -> Self {
        let total = patients.len() as i32;
        Self {
            batch_id: Uuid::new_v4(),
            job_id: spec.job_id,
            organization_id: spec.organization_id,
            organization_npi: spec.organization_npi.clone(),
            provider_id: spec.provider_id.clone(),
            provider_npi: spec.provider_npi.clone(),
            patients,
            resource_types: spec.resource_types.clone(),
            since: spec.since,
            transaction_time: spec.transaction_time,
            priority: spec.priority,
            is_bulk: spec.is_bulk,
            status: BatchStatus::Queued,
            total_patients: total,
            patients_processed: 0,
            submit_time: spec.transaction_time,
            update_time: None,
            complete_time: None,
            request_url: spec.request_url.clone(),
            request_ip: spec.request_ip.clone(),
            worker_id: None,
        }
    }

    /// Comma-joined patient list, the storage form.
    pub fn patients_joined(&self) -> String {
        self.patients.join(",")
    }

    pub fn split_patients(joined: &str) -> Vec<String> {
        joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn resource_types_joined(&self) -> String {
        self.resource_types
            .iter()
            .map(ResourceType::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn split_resource_types(joined: &str) -> Result<Vec<ResourceType>, StorageError> {
        joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().map_err(StorageError::invalid_batch))
            .collect()
    }

    /// Checks the progress invariants every backend must uphold.
    pub fn check_invariants(&self) -> Result<(), StorageError> {
        if self.patients_processed < 0 || self.patients_processed > self.total_patients {
            return Err(StorageError::invalid_batch(format!(
                "batch {}: patients_processed {} outside 0..={}",
                self.batch_id, self.patients_processed, self.total_patients
            )));
        }
        if self.status.is_terminal() != self.complete_time.is_some() {
            return Err(StorageError::invalid_batch(format!(
                "batch {}: complete_time must be set exactly when status is terminal (status {})",
                self.batch_id, self.status
            )));
        }
        Ok(())
    }
}

/// One output file produced by a completed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFile {
    pub batch_id: Uuid,
    pub resource_type: ResourceType,
    pub sequence: i32,
    pub file_name: String,
    pub count: i64,
    pub checksum: String,
    pub file_length: i64,
}

impl BatchFile {
    /// Deterministic output name: `{batch_id}-{sequence}.{resource path}`.
    pub fn form_file_name(batch_id: Uuid, resource_type: ResourceType, sequence: i32) -> String {
        format!("{}-{}.{}", batch_id, sequence, resource_type.path())
    }
}
