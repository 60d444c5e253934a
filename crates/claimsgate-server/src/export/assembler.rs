//! Inline output for synchronous exports.
//!
//! Files are read straight from the store instead of through manifest URLs.
//! Lines are embedded as raw JSON; they are syntax-checked but never
//! re-validated as FHIR.

use claimsgate_api::{Bundle, BundleEntry, OperationOutcome, RawJson};
use claimsgate_storage::BatchFile;
use serde::Serialize;

use super::{ExportError, FileStore};

/// What a synchronous export returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Assembled {
    Bundle(Bundle),
    Outcome(OperationOutcome),
}

impl Assembled {
    pub fn resource_type(&self) -> &str {
        match self {
            Self::Bundle(b) => &b.resource_type,
            Self::Outcome(o) => &o.resource_type,
        }
    }
}

fn ordered(files: &[BatchFile]) -> Vec<&BatchFile> {
    let mut ordered: Vec<&BatchFile> = files.iter().collect();
    ordered.sort_by_key(|f| (f.resource_type, f.sequence));
    ordered
}

/// Builds the response body of a finished single-subject job.
///
/// When every produced file is an error file, their issues are merged into a
/// single OperationOutcome; otherwise every line of every file becomes one
/// entry of a `searchset` Bundle.
pub async fn assemble_direct(
    store: &FileStore,
    files: &[BatchFile],
) -> Result<Assembled, ExportError> {
    let files = ordered(files);

    if !files.is_empty() && files.iter().all(|f| f.resource_type.is_error()) {
        let mut issues = Vec::new();
        for file in files {
            for line in store.read_lines(&file.file_name).await? {
                let outcome: OperationOutcome = serde_json::from_str(&line).map_err(|e| {
                    ExportError::Assembly(format!("{}: bad OperationOutcome line: {e}", file.file_name))
                })?;
                issues.extend(outcome.issue);
            }
        }
        return Ok(Assembled::Outcome(OperationOutcome::new(issues)));
    }

    let mut entries = Vec::new();
    for file in files {
        for line in store.read_lines(&file.file_name).await? {
            let raw = RawJson::from_string(line).map_err(|e| {
                ExportError::Assembly(format!("{}: malformed line: {e}", file.file_name))
            })?;
            entries.push(BundleEntry::from_resource(raw));
        }
    }
    Ok(Assembled::Bundle(Bundle::searchset(entries)))
}
