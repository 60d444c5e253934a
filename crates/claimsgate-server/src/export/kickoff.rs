//! Bulk data kick-off and status endpoints.
//!
//! - `GET|POST /Group/{id}/$export` validates the request, submits one job
//!   for the group's roster and answers `202 Accepted` with a
//!   `Content-Location` pointing at the status endpoint.
//! - `GET /Jobs/{job_id}` reports the job state derived from its batches.

use std::time::SystemTime;

use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use claimsgate_api::{ApiError, ApiResponse};
use claimsgate_storage::ResourceType;
use serde::Deserialize;
use uuid::Uuid;

use super::status::{JobState, aggregate};
use super::{ExportError, ExportSubmission};
use crate::context::RequestContext;
use crate::server::AppState;

pub const X_PROGRESS: HeaderName = HeaderName::from_static("x-progress");

pub const PREFER_MISSING: &str = "The 'Prefer' header is required and must be 'respond-async'";
pub const PREFER_INVALID: &str = "The 'Prefer' header must be 'respond-async'";

/// `_outputFormat` values accepted at kick-off.
pub const OUTPUT_FORMATS: [&str; 3] = ["application/fhir+ndjson", "application/ndjson", "ndjson"];

#[derive(Debug, Default, Deserialize)]
pub struct KickoffParams {
    #[serde(rename = "_outputFormat")]
    pub output_format: Option<String>,
    #[serde(rename = "_type")]
    pub types: Option<String>,
    #[serde(rename = "_since")]
    pub since: Option<String>,
}

/// A kick-off request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedKickoff {
    pub resource_types: Vec<ResourceType>,
    pub since: Option<DateTime<Utc>>,
}

/// The `Prefer` header must be exactly `respond-async`.
pub fn check_prefer(headers: &HeaderMap) -> Result<(), ExportError> {
    let Some(value) = headers.get("prefer") else {
        return Err(ExportError::validation(PREFER_MISSING));
    };
    match value.to_str() {
        Ok(v) if v.trim() == "respond-async" => Ok(()),
        _ => Err(ExportError::validation(PREFER_INVALID)),
    }
}

pub fn check_output_format(format: Option<&str>) -> Result<(), ExportError> {
    match format {
        Some(f) if OUTPUT_FORMATS.contains(&f) => Ok(()),
        _ => Err(ExportError::validation(format!(
            "_outputFormat parameter must be one of {}",
            OUTPUT_FORMATS.join(", ")
        ))),
    }
}

/// Parses `_type`; absent means every requestable type.
pub fn parse_types(raw: Option<&str>) -> Result<Vec<ResourceType>, ExportError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(ResourceType::REQUESTABLE.to_vec());
    };
    let mut types = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let rt: ResourceType = name
            .parse()
            .ok()
            .filter(ResourceType::is_requestable)
            .ok_or_else(|| {
                ExportError::validation(format!("invalid resource type for _type: {name}"))
            })?;
        if !types.contains(&rt) {
            types.push(rt);
        }
    }
    Ok(types)
}

/// Parses `_since` as RFC 3339; it may not lie in the future.
pub fn parse_since(
    raw: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ExportError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let since = DateTime::parse_from_rfc3339(raw)
        .map_err(|_| {
            ExportError::validation(format!("_since must be an RFC 3339 timestamp, got {raw}"))
        })?
        .with_timezone(&Utc);
    if since > now {
        return Err(ExportError::validation("_since must not be in the future"));
    }
    Ok(Some(since))
}

/// Runs the kick-off preconditions in order.
pub fn validate_kickoff(
    headers: &HeaderMap,
    params: &KickoffParams,
    now: DateTime<Utc>,
) -> Result<ValidatedKickoff, ExportError> {
    check_prefer(headers)?;
    check_output_format(params.output_format.as_deref())?;
    Ok(ValidatedKickoff {
        resource_types: parse_types(params.types.as_deref())?,
        since: parse_since(params.since.as_deref(), now)?,
    })
}

/// Full URL of the request as the client sent it.
pub fn request_url(base_url: &str, uri: &axum::http::Uri) -> String {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("{base_url}{path}")
}

/// GET|POST /Group/{id}/$export
pub async fn group_export(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(group_id): Path<String>,
    Query(params): Query<KickoffParams>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let validated = validate_kickoff(&headers, &params, Utc::now()).inspect_err(|e| {
        tracing::info!(group_id = %group_id, error = %e, "export kick-off rejected");
    })?;

    let roster = state
        .directory
        .group_roster(ctx.organization_id, &group_id)
        .await
        .map_err(ExportError::from)?
        .ok_or_else(|| ExportError::NotFound(format!("Group/{group_id}")))?;

    let job_id = state
        .orchestrator
        .submit_export(ExportSubmission {
            organization_id: ctx.organization_id,
            provider_id: roster.provider_id,
            subjects: roster.patients,
            resource_types: validated.resource_types,
            since: validated.since,
            request_url: request_url(&state.base_url, &uri),
            request_ip: ctx.request_ip.clone(),
        })
        .await
        .inspect_err(|e| {
            tracing::warn!(group_id = %group_id, organization_id = %ctx.organization_id, error = %e, "export submission failed");
        })?;

    let location = format!("{}/Jobs/{job_id}", state.base_url);
    let location = HeaderValue::from_str(&location)
        .map_err(|e| ApiError::internal(format!("invalid Content-Location: {e}")))?;

    Ok((StatusCode::ACCEPTED, [(header::CONTENT_LOCATION, location)]).into_response())
}

/// GET /Jobs/{job_id}
pub async fn job_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|_| ApiError::bad_request(format!("invalid job id: {job_id}")))?;

    let all = state
        .repo
        .batches_for_job(job_id)
        .await
        .map_err(ExportError::from)?;
    let found = all.len();
    let batches: Vec<_> = all
        .into_iter()
        .filter(|b| b.organization_id == ctx.organization_id)
        .collect();
    if found > 0 && batches.is_empty() {
        return Err(ApiError::not_found(format!("Job/{job_id} not found")));
    }

    let files = state
        .repo
        .files_for_job(job_id)
        .await
        .map_err(ExportError::from)?;

    match aggregate(&batches, &files, &state.base_url, Utc::now()) {
        JobState::Failed => {
            tracing::error!(job_id = %job_id, "job failed");
            Err(ExportError::Failed(job_id).into())
        }
        JobState::InProgress(progress) => {
            let value = HeaderValue::from_str(&progress.to_string())
                .map_err(|e| ApiError::internal(e.to_string()))?;
            Ok((StatusCode::ACCEPTED, [(X_PROGRESS, value)]).into_response())
        }
        JobState::Pending => Ok(StatusCode::ACCEPTED.into_response()),
        JobState::Complete(manifest, expires) => {
            let expires = httpdate::fmt_http_date(SystemTime::from(expires));
            let expires = HeaderValue::from_str(&expires)
                .map_err(|e| ApiError::internal(e.to_string()))?;
            Ok(ApiResponse::ok(*manifest)
                .with_header(header::EXPIRES, expires)
                .into_response())
        }
        JobState::Stale => {
            tracing::info!(job_id = %job_id, "job results expired");
            Err(ExportError::Stale(job_id).into())
        }
    }
}
