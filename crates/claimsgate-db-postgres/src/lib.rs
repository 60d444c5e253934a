//! # claimsgate-db-postgres
//!
//! PostgreSQL backend for the claimsgate batch queue.
//!
//! - [`PostgresJobRepository`] stores batches and batch files.
//! - [`PostgresRosterDirectory`] answers roster lookups from tables owned by
//!   the administrative service.
//!
//! ## Example
//!
//! ```ignore
//! use claimsgate_db_postgres::{PostgresConfig, create_pool, migrations, PostgresJobRepository};
//!
//! let config = PostgresConfig::new("postgres://localhost/claimsgate");
//! let pool = create_pool(&config).await?;
//! migrations::run(&pool).await?;
//! let repo = PostgresJobRepository::new(pool);
//! ```

mod config;
pub mod directory;
mod error;
pub mod migrations;
mod pool;
pub mod repository;

pub use config::PostgresConfig;
pub use directory::PostgresRosterDirectory;
pub use error::{PostgresError, Result, storage_error};
pub use pool::{create_pool, test_connection};
pub use repository::PostgresJobRepository;

pub use sqlx_postgres::PgPool;
