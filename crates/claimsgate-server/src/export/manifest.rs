//! Bulk data manifest for a completed job.

use chrono::{DateTime, Utc};
use claimsgate_storage::{Batch, BatchFile, ResourceType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub transaction_time: DateTime<Utc>,
    pub request: String,
    pub requires_access_token: bool,
    pub output: Vec<OutputEntry>,
    pub error: Vec<ErrorEntry>,
    pub extension: JobTimes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub url: String,
    pub count: i64,
    pub extension: FileExtension,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileExtension {
    /// `sha256:` followed by the lowercase hex digest of the file bytes
    pub checksum: String,
    pub file_length: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub url: String,
}

/// Keys stay snake_case on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTimes {
    pub submit_time: DateTime<Utc>,
    pub complete_time: DateTime<Utc>,
}

/// Download URL of one output file.
pub fn file_url(base_url: &str, file: &BatchFile) -> String {
    format!("{}/Data/{}.ndjson", base_url.trim_end_matches('/'), file.file_name)
}

impl Manifest {
    /// Builds the manifest of a job whose batches are all COMPLETED.
    ///
    /// Returns `None` for an empty batch set.
    pub fn build(
        batches: &[Batch],
        files: &[BatchFile],
        base_url: &str,
        complete_time: DateTime<Utc>,
    ) -> Option<Self> {
        let first = batches.first()?;
        let submit_time = batches.iter().map(|b| b.submit_time).min()?;

        let mut ordered: Vec<&BatchFile> = files.iter().collect();
        ordered.sort_by(|a, b| {
            (a.resource_type, &a.file_name).cmp(&(b.resource_type, &b.file_name))
        });

        let mut output = Vec::new();
        let mut error = Vec::new();
        for file in ordered {
            let url = file_url(base_url, file);
            if file.resource_type.is_error() {
                error.push(ErrorEntry {
                    resource_type: ResourceType::OperationOutcome,
                    url,
                });
            } else {
                output.push(OutputEntry {
                    resource_type: file.resource_type,
                    url,
                    count: file.count,
                    extension: FileExtension {
                        checksum: format!("sha256:{}", file.checksum),
                        file_length: file.file_length,
                    },
                });
            }
        }

        Some(Self {
            transaction_time: first.transaction_time,
            request: first.request_url.clone(),
            requires_access_token: true,
            output,
            error,
            extension: JobTimes {
                submit_time,
                complete_time,
            },
        })
    }
}
