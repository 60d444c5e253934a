use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use claimsgate_api::ApiResponse;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": "Claimsgate",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Ready once the job repository answers a query.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.repo.batches_for_job(Uuid::nil()).await {
        Ok(_) => (StatusCode::OK, Json(HealthResponse { status: "ready" })),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                }),
            )
        }
    }
}

pub async fn metadata() -> impl IntoResponse {
    let body = json!({
        "resourceType": "CapabilityStatement",
        "status": "active",
        "kind": "instance",
        "software": { "name": "Claimsgate", "version": env!("CARGO_PKG_VERSION") },
        "fhirVersion": "4.0.1",
        "format": ["application/fhir+json"],
        "rest": [{
            "mode": "server",
            "resource": [
                { "type": "Group", "operation": [{ "name": "export" }] },
                { "type": "Patient", "operation": [{ "name": "everything" }] }
            ]
        }]
    });
    ApiResponse::ok(body)
}
