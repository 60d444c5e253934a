//! # claimsgate-bfd
//!
//! Client for the external claims data source.
//!
//! Every request goes out over mutual TLS, carries correlation headers, and
//! is retried with exponential backoff. Searches follow `next` links and
//! return one accumulated [`Bundle`]. Beneficiary identifiers are hashed with
//! [`IdentifierHasher`] before lookup.

mod bundle;
mod client;
mod config;
mod error;
mod hash;
pub mod query;
mod retry;

pub use bundle::Bundle;
pub use client::{BfdClient, ClaimsSource};
pub use config::BfdConfig;
pub use error::BfdError;
pub use hash::IdentifierHasher;
pub use query::ClaimsWindow;
pub use retry::RetryPolicy;

/// Type alias for a shareable claims source.
pub type DynClaimsSource = std::sync::Arc<dyn ClaimsSource>;
