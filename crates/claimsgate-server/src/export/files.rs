//! On-disk export files and the `/Data/{file}` download endpoint.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use axum::{
    body::Body,
    extract::{Path as UrlPath, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use claimsgate_api::{ApiError, FHIR_NDJSON};
use tokio::fs;

use super::ExportError;
use crate::context::RequestContext;
use crate::server::AppState;

/// `{root}/{file_name}.ndjson`
pub fn ndjson_path(root: &Path, file_name: &str) -> PathBuf {
    root.join(format!("{file_name}.ndjson"))
}

/// Read access to the files batch workers produced.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        ndjson_path(&self.root, file_name)
    }

    pub async fn read(&self, file_name: &str) -> Result<Vec<u8>, ExportError> {
        match fs::read(self.path_for(file_name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ExportError::NotFound(format!("file {file_name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Non-empty lines of one file, in order.
    pub async fn read_lines(&self, file_name: &str) -> Result<Vec<String>, ExportError> {
        let bytes = self.read(file_name).await?;
        let text = String::from_utf8(bytes)
            .map_err(|e| ExportError::Assembly(format!("{file_name} is not UTF-8: {e}")))?;
        Ok(text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Deletes `.ndjson` files whose age has reached `max_age`.
    pub async fn remove_expired(&self, max_age: Duration) -> std::io::Result<usize> {
        if let Err(err) = fs::metadata(&self.root).await {
            if err.kind() == std::io::ErrorKind::NotFound {
                return Ok(0);
            }
            return Err(err);
        }

        let now = SystemTime::now();
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ndjson") {
                continue;
            }
            if let Ok(metadata) = entry.metadata().await
                && metadata.is_file()
                && let Ok(modified) = metadata.modified()
                && let Ok(age) = now.duration_since(modified)
                && age >= max_age
            {
                tracing::info!(
                    path = %path.display(),
                    age_hours = age.as_secs() / 3600,
                    "removing expired export file"
                );
                fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Periodically removes expired export files.
pub fn start_cleanup_task(
    store: FileStore,
    max_age: Duration,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match store.remove_expired(max_age).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "export cleanup finished"),
                Err(e) => tracing::warn!(error = %e, "export cleanup failed"),
            }
        }
    })
}

/// GET /Data/{file}
///
/// Accepts the name with or without the `.ndjson` suffix. Files of other
/// organizations are reported as missing.
pub async fn download(
    State(state): State<AppState>,
    ctx: RequestContext,
    UrlPath(file): UrlPath<String>,
) -> Result<Response, ApiError> {
    let file_name = file.strip_suffix(".ndjson").unwrap_or(&file);
    let not_found = || ApiError::not_found(format!("file {file_name} not found"));

    let Some(record) = state.repo.find_file(file_name).await.map_err(ExportError::from)? else {
        return Err(not_found());
    };
    let owner = state
        .repo
        .batch(record.batch_id)
        .await
        .map_err(ExportError::from)?;
    if owner.map(|b| b.organization_id) != Some(ctx.organization_id) {
        return Err(not_found());
    }

    let bytes = state.files.read(file_name).await.map_err(|e| {
        tracing::error!(file = file_name, batch_id = %record.batch_id, error = %e, "export file unreadable");
        ApiError::from(e)
    })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_NDJSON))],
        Body::from(bytes),
    )
        .into_response())
}
