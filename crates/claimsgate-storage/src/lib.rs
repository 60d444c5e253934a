//! # claimsgate-storage
//!
//! Batch model and repository traits for the claimsgate export pipeline.
//!
//! This crate defines the types and traits that all storage backends must
//! implement. It does not contain any implementations; those live in
//! `claimsgate-db-memory` and `claimsgate-db-postgres`.
//!
//! ## Overview
//!
//! - [`JobRepository`] persists batches and batch files and lets workers
//!   claim and finish batches.
//! - [`RosterDirectory`] answers the organization, provider and roster
//!   questions the export controllers ask.

pub mod directory;
mod error;
mod traits;
mod types;

pub use directory::{GroupRoster, RosterDirectory};
pub use error::{ErrorCategory, StorageError};
pub use traits::{JobRepository, validate_submission};
pub use types::{Batch, BatchFile, BatchStatus, JobSpec, ResourceType};

/// Type alias for a shareable repository.
pub type DynJobRepository = std::sync::Arc<dyn JobRepository>;

/// Type alias for a shareable roster directory.
pub type DynRosterDirectory = std::sync::Arc<dyn RosterDirectory>;

/// Result alias for repository operations.
pub type StorageResult<T> = Result<T, StorageError>;
