//! NDJSON writer for one batch
//!
//! Resources are appended per resource type; a type's output is split into a
//! new file every `max_resources_per_file` lines. Each file's line count,
//! byte length and SHA-256 are tracked while writing, so `finish` only has to
//! flush and report.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use claimsgate_storage::{BatchFile, ResourceType};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

use super::files::ndjson_path;

/// Errors that can occur during NDJSON writing
#[derive(Debug, Error)]
pub enum NdjsonWriterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The file currently receiving lines for one resource type
struct OpenFile {
    file_name: String,
    writer: BufWriter<File>,
    hasher: Sha256,
    count: i64,
    length: i64,
}

/// Writer state for a specific resource type
struct TypeWriter {
    resource_type: ResourceType,
    next_sequence: i32,
    current: Option<OpenFile>,
    done: Vec<BatchFile>,
}

impl TypeWriter {
    fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            next_sequence: 0,
            current: None,
            done: Vec::new(),
        }
    }

    async fn close_current(&mut self, batch_id: Uuid) -> Result<(), NdjsonWriterError> {
        if let Some(mut open) = self.current.take() {
            open.writer.flush().await?;
            open.writer.get_mut().sync_all().await?;
            self.done.push(BatchFile {
                batch_id,
                resource_type: self.resource_type,
                sequence: self.next_sequence - 1,
                file_name: open.file_name,
                count: open.count,
                checksum: hex::encode(open.hasher.finalize()),
                file_length: open.length,
            });
        }
        Ok(())
    }

    async fn write_line(
        &mut self,
        root: &Path,
        batch_id: Uuid,
        max_per_file: usize,
        line: &[u8],
    ) -> Result<(), NdjsonWriterError> {
        let full = self
            .current
            .as_ref()
            .is_some_and(|open| open.count as usize >= max_per_file);
        if full {
            self.close_current(batch_id).await?;
        }

        if self.current.is_none() {
            let file_name =
                BatchFile::form_file_name(batch_id, self.resource_type, self.next_sequence);
            let file = File::create(ndjson_path(root, &file_name)).await?;
            self.next_sequence += 1;
            self.current = Some(OpenFile {
                file_name,
                writer: BufWriter::new(file),
                hasher: Sha256::new(),
                count: 0,
                length: 0,
            });
        }

        if let Some(open) = self.current.as_mut() {
            open.writer.write_all(line).await?;
            open.hasher.update(line);
            open.count += 1;
            open.length += line.len() as i64;
        }
        Ok(())
    }
}

/// NDJSON output of one batch
pub struct NdjsonWriter {
    root: PathBuf,
    batch_id: Uuid,
    max_resources_per_file: usize,
    writers: BTreeMap<ResourceType, TypeWriter>,
}

impl NdjsonWriter {
    /// Create a writer whose files land directly in `root`.
    pub async fn new(
        root: impl AsRef<Path>,
        batch_id: Uuid,
        max_resources_per_file: usize,
    ) -> Result<Self, NdjsonWriterError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            batch_id,
            max_resources_per_file: max_resources_per_file.max(1),
            writers: BTreeMap::new(),
        })
    }

    /// Write one resource as a single line
    pub async fn write_resource(
        &mut self,
        resource_type: ResourceType,
        resource: &Value,
    ) -> Result<(), NdjsonWriterError> {
        let mut line = serde_json::to_vec(resource)?;
        line.push(b'\n');

        let writer = self
            .writers
            .entry(resource_type)
            .or_insert_with(|| TypeWriter::new(resource_type));
        writer
            .write_line(&self.root, self.batch_id, self.max_resources_per_file, &line)
            .await
    }

    /// Write multiple resources of the same type
    pub async fn write_resources(
        &mut self,
        resource_type: ResourceType,
        resources: &[Value],
    ) -> Result<usize, NdjsonWriterError> {
        for resource in resources {
            self.write_resource(resource_type, resource).await?;
        }
        Ok(resources.len())
    }

    /// Number of lines written so far for `resource_type`.
    pub fn count(&self, resource_type: ResourceType) -> i64 {
        self.writers
            .get(&resource_type)
            .map(|w| {
                w.done.iter().map(|f| f.count).sum::<i64>()
                    + w.current.as_ref().map_or(0, |open| open.count)
            })
            .unwrap_or(0)
    }

    /// Flush every open file and describe what was written, ordered by
    /// resource type then sequence.
    pub async fn finish(mut self) -> Result<Vec<BatchFile>, NdjsonWriterError> {
        let mut files = Vec::new();
        for writer in self.writers.values_mut() {
            writer.close_current(self.batch_id).await?;
            files.append(&mut writer.done);
        }
        Ok(files)
    }

    /// Delete everything written so far. Used when the batch fails.
    pub async fn abandon(mut self) -> Result<(), NdjsonWriterError> {
        let mut names = Vec::new();
        for writer in self.writers.values_mut() {
            if let Some(open) = writer.current.take() {
                names.push(open.file_name);
            }
            names.extend(writer.done.drain(..).map(|f| f.file_name));
        }
        for name in names {
            match fs::remove_file(ndjson_path(&self.root, &name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
