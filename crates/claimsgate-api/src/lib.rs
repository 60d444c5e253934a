use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::sync::Arc;
use thiserror::Error;

/// FHIR JSON content type used for every JSON body this gateway returns.
pub const FHIR_JSON: &str = "application/fhir+json";

/// NDJSON content type used for export files.
pub const FHIR_NDJSON: &str = "application/fhir+ndjson";

// -------------------------
// Raw JSON Type for Zero-Copy Serialization
// -------------------------

/// Raw JSON that serializes directly without re-parsing.
///
/// Export files hold one resource per line; each line is embedded as-is
/// into the response bundle. Syntax is checked once at construction, the
/// content is never interpreted as a FHIR resource.
#[derive(Debug, Clone)]
pub struct RawJson(Arc<Box<RawValue>>);

impl RawJson {
    /// Create from a raw JSON string, checking syntax once.
    pub fn from_string(s: impl Into<String>) -> Result<Self, serde_json::Error> {
        Ok(Self(Arc::new(RawValue::from_string(s.into())?)))
    }

    /// Get the raw JSON string.
    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// Parse the raw JSON into a Value.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(self.0.get())
    }
}

impl PartialEq for RawJson {
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}

impl Serialize for RawJson {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RawJson {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Ok(RawJson(Arc::new(raw)))
    }
}

impl TryFrom<serde_json::Value> for RawJson {
    type Error = serde_json::Error;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        Self::from_string(serde_json::to_string(&value)?)
    }
}

// -------------------------
// OperationOutcome
// -------------------------

/// FHIR OperationOutcome used for error responses and merged error reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationOutcome {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(default)]
    pub issue: Vec<serde_json::Value>,
}

impl OperationOutcome {
    pub fn new(issue: Vec<serde_json::Value>) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue,
        }
    }

    pub fn single(severity: &str, code: &str, diagnostics: impl Into<String>) -> Self {
        Self::new(vec![issue(severity, code, diagnostics)])
    }

    pub fn has_issues(&self) -> bool {
        !self.issue.is_empty()
    }
}

/// Build one OperationOutcome issue.
pub fn issue(severity: &str, code: &str, diagnostics: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "severity": severity,
        "code": code,
        "diagnostics": diagnostics.into(),
    })
}

// -------------------------
// Errors
// -------------------------

/// High-level API errors mapped to HTTP responses and FHIR OperationOutcome
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Gone: {0}")]
    Gone(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn gone(msg: impl Into<String>) -> Self {
        Self::Gone(msg.into())
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_operation_outcome(&self) -> OperationOutcome {
        match self {
            ApiError::BadRequest(msg) => OperationOutcome::single("error", "invalid", msg),
            ApiError::Unauthorized(msg) => OperationOutcome::single("error", "unauthorized", msg),
            ApiError::NotFound(msg) => OperationOutcome::single("error", "not-found", msg),
            ApiError::Gone(msg) => OperationOutcome::single("error", "expired", msg),
            ApiError::Internal(msg) => OperationOutcome::single("fatal", "exception", msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        ApiResponse::new(self.to_operation_outcome(), self.status_code()).into_response()
    }
}

// -------------------------
// API Response Wrapper
// -------------------------

#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub value: T,
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

impl<T> ApiResponse<T> {
    pub fn new(value: T, status: StatusCode) -> Self {
        Self {
            value,
            status,
            headers: Vec::new(),
        }
    }

    pub fn ok(value: T) -> Self {
        Self::new(value, StatusCode::OK)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = match serde_json::to_vec(&self.value) {
            Ok(b) => b,
            Err(_) => serde_json::to_vec(&OperationOutcome::single(
                "fatal",
                "exception",
                "Serialization failure",
            ))
            .unwrap_or_else(|_| b"{}".to_vec()),
        };
        let mut builder = axum::http::Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
        for (n, v) in self.headers.into_iter() {
            builder = builder.header(n, v);
        }
        builder
            .body(axum::body::Body::from(body))
            .unwrap_or_else(|_| {
                let mut fallback = Response::new(axum::body::Body::from("{}"));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
                fallback
            })
    }
}

// -------------------------
// FHIR Bundle Types
// -------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "fullUrl")]
    pub full_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<RawJson>,
}

impl BundleEntry {
    pub fn from_resource(resource: RawJson) -> Self {
        Self {
            full_url: None,
            resource: Some(resource),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bundle {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(rename = "type")]
    pub bundle_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub entry: Vec<BundleEntry>,
}

impl Bundle {
    pub fn searchset(entries: Vec<BundleEntry>) -> Self {
        Self {
            resource_type: "Bundle".to_string(),
            bundle_type: "searchset".to_string(),
            total: Some(entries.len() as u64),
            entry: entries,
        }
    }
}
