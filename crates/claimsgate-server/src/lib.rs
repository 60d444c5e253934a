pub mod config;
pub mod context;
pub mod export;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod worker;

pub use config::{AppConfig, ServerConfig, StorageBackend};
pub use context::RequestContext;
pub use observability::init_tracing;
pub use server::{AppState, ClaimsgateServer, ServerBuilder, build_app};
pub use worker::{BatchWorker, WorkerPool};
