//! In-memory storage backend for claimsgate.
//!
//! Provides [`InMemoryJobRepository`] and [`InMemoryRosterDirectory`], used by
//! tests and by single-process deployments that do not need durability.
//!
//! # Example
//!
//! ```ignore
//! use claimsgate_db_memory::InMemoryJobRepository;
//! use claimsgate_storage::JobRepository;
//!
//! let repo = InMemoryJobRepository::new();
//! repo.create_batches(&batches).await?;
//! let claimed = repo.claim_batch(worker_id).await?;
//! ```

pub mod directory;
pub mod repository;

pub use directory::{InMemoryRosterDirectory, OrganizationSeed, RosterSeed};
pub use repository::InMemoryJobRepository;

use std::sync::Arc;

use claimsgate_storage::{DynJobRepository, DynRosterDirectory};

/// Creates a new, empty in-memory repository.
pub fn create_job_repository() -> DynJobRepository {
    Arc::new(InMemoryJobRepository::new())
}

/// Creates a roster directory from seed data.
pub fn create_roster_directory(seed: RosterSeed) -> DynRosterDirectory {
    Arc::new(InMemoryRosterDirectory::from_seed(seed))
}
