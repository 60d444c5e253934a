//! Synchronous single-patient export (`Patient/{id}/$everything`).
//!
//! Submits a one-subject job, waits for the batch worker by re-reading the
//! repository on a fixed interval, then returns the produced files inline.
//! The wait is bounded by a deadline and is dropped with the request future
//! when the client goes away.

use std::time::Duration;

use axum::{
    extract::{OriginalUri, Path, Query, State},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use claimsgate_api::{ApiError, ApiResponse};
use claimsgate_storage::{Batch, BatchStatus, JobRepository, ResourceType};
use serde::Deserialize;
use uuid::Uuid;

use super::kickoff::{parse_since, request_url};
use super::{ExportError, ExportSubmission, assemble_direct};
use crate::context::RequestContext;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EverythingParams {
    #[serde(rename = "_since")]
    pub since: Option<String>,
}

async fn poll_until_done(
    repo: &dyn JobRepository,
    job_id: Uuid,
    interval: Duration,
) -> Result<Vec<Batch>, ExportError> {
    loop {
        let batches = repo.batches_for_job(job_id).await?;
        if batches.iter().any(|b| b.status == BatchStatus::Failed) {
            return Err(ExportError::Failed(job_id));
        }
        if !batches.is_empty() && batches.iter().all(|b| b.status == BatchStatus::Completed) {
            return Ok(batches);
        }
        tokio::time::sleep(interval).await;
    }
}

/// Polls until every batch of the job is COMPLETED.
///
/// Any FAILED batch ends the wait with [`ExportError::Failed`]; running out
/// of `deadline` with [`ExportError::Timeout`].
pub async fn wait_for_job(
    repo: &dyn JobRepository,
    job_id: Uuid,
    interval: Duration,
    deadline: Duration,
) -> Result<Vec<Batch>, ExportError> {
    tokio::time::timeout(deadline, poll_until_done(repo, job_id, interval))
        .await
        .map_err(|_| ExportError::Timeout(job_id))?
}

/// GET /Patient/{id}/$everything
pub async fn patient_everything(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(patient_id): Path<String>,
    Query(params): Query<EverythingParams>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, ApiError> {
    let provider_id = ctx.require_provider()?.to_string();
    let since = parse_since(params.since.as_deref(), Utc::now())?;

    let mbi = state
        .directory
        .patient_identifier(ctx.organization_id, &patient_id)
        .await
        .map_err(ExportError::from)?
        .ok_or_else(|| ExportError::NotFound(format!("Patient/{patient_id}")))?;

    let job_id = state
        .orchestrator
        .submit_export(ExportSubmission {
            organization_id: ctx.organization_id,
            provider_id,
            subjects: vec![mbi],
            resource_types: ResourceType::REQUESTABLE.to_vec(),
            since,
            request_url: request_url(&state.base_url, &uri),
            request_ip: ctx.request_ip.clone(),
        })
        .await?;

    let everything = &state.config.everything;
    wait_for_job(
        state.repo.as_ref(),
        job_id,
        everything.poll_interval(),
        everything.timeout(),
    )
    .await
    .inspect_err(|e| {
        tracing::error!(job_id = %job_id, patient_id = %patient_id, error = %e, "synchronous export did not complete");
    })?;

    let files = state
        .repo
        .files_for_job(job_id)
        .await
        .map_err(ExportError::from)?;
    let body = assemble_direct(&state.files, &files).await.inspect_err(|e| {
        tracing::error!(job_id = %job_id, error = %e, "failed to assemble synchronous export");
    })?;

    tracing::debug!(job_id = %job_id, resource_type = body.resource_type(), "synchronous export served");
    Ok(ApiResponse::ok(body).into_response())
}
