use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::get,
};
use claimsgate_bfd::{BfdClient, DynClaimsSource};
use claimsgate_db_memory::{RosterSeed, create_job_repository, create_roster_directory};
use claimsgate_db_postgres::{
    PostgresJobRepository, PostgresRosterDirectory, create_pool, migrations, test_connection,
};
use claimsgate_storage::{DynJobRepository, DynRosterDirectory};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::{AppConfig, StorageBackend};
use crate::export::{FileStore, JobOrchestrator, everything, files, kickoff};
use crate::worker::{BatchWorker, WorkerPool};
use crate::{handlers, middleware as app_middleware};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repo: DynJobRepository,
    pub directory: DynRosterDirectory,
    pub orchestrator: Arc<JobOrchestrator>,
    pub files: FileStore,
    /// Public base URL without a trailing slash
    pub base_url: Arc<str>,
}

impl AppState {
    pub fn new(config: AppConfig, repo: DynJobRepository, directory: DynRosterDirectory) -> Self {
        let orchestrator =
            JobOrchestrator::new(repo.clone(), directory.clone(), config.jobs.batch_size);
        Self {
            files: FileStore::new(&config.export.path),
            base_url: Arc::from(config.base_url()),
            orchestrator: Arc::new(orchestrator),
            config: Arc::new(config),
            repo,
            directory,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metadata", get(handlers::metadata))
        // Bulk data
        .route(
            "/Group/{group_id}/$export",
            get(kickoff::group_export).post(kickoff::group_export),
        )
        .route("/Jobs/{job_id}", get(kickoff::job_status))
        .route("/Data/{file}", get(files::download))
        // Synchronous single-patient export
        .route(
            "/Patient/{patient_id}/$everything",
            get(everything::patient_everything),
        )
        .with_state(state)
        // Outermost first: request id -> trace -> cors -> compression -> body limit
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(app_middleware::request_id))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            use tracing::field::Empty;
                            let req_id = req
                                .extensions()
                                .get::<axum::http::HeaderValue>()
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("")
                                .to_string();
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri(),
                                http.status_code = Empty,
                                request_id = %req_id
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new())
                .layer(axum::extract::DefaultBodyLimit::max(body_limit)),
        )
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    claims: Option<DynClaimsSource>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            claims: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Use this claims source instead of building the mTLS client from `bfd`.
    pub fn with_claims_source(mut self, claims: DynClaimsSource) -> Self {
        self.claims = Some(claims);
        self
    }

    pub async fn build(self) -> anyhow::Result<ClaimsgateServer> {
        let cfg = self.config;
        let (repo, directory) = open_storage(&cfg).await?;

        let workers = if cfg.worker.enabled {
            let claims = match self.claims {
                Some(claims) => claims,
                None => Arc::new(
                    BfdClient::new(cfg.bfd.clone()).context("building claims source client")?,
                ),
            };
            let template = BatchWorker::new(
                repo.clone(),
                claims,
                &cfg.export.path,
                cfg.export.max_resources_per_file,
            );
            let pool = WorkerPool::spawn(&cfg.worker, &template);
            tracing::info!(workers = pool.len(), "batch workers started");
            Some(pool)
        } else {
            tracing::info!("batch workers disabled");
            None
        };

        let cleanup = files::start_cleanup_task(
            FileStore::new(&cfg.export.path),
            cfg.export.retention(),
            Duration::from_secs(cfg.export.cleanup_interval_secs.max(1)),
        );

        let app = build_app(AppState::new(cfg, repo, directory));
        Ok(ClaimsgateServer {
            addr: self.addr,
            app,
            workers,
            cleanup,
        })
    }
}

async fn open_storage(cfg: &AppConfig) -> anyhow::Result<(DynJobRepository, DynRosterDirectory)> {
    match cfg.storage.backend {
        StorageBackend::Memory => {
            let seed = match &cfg.directory.seed_file {
                Some(path) => RosterSeed::from_file(path)?,
                None => {
                    tracing::warn!("no roster seed configured; every group lookup will miss");
                    RosterSeed::default()
                }
            };
            tracing::info!(
                organizations = seed.organizations.len(),
                "using in-memory storage"
            );
            Ok((create_job_repository(), create_roster_directory(seed)))
        }
        StorageBackend::Postgres => {
            let pg = cfg
                .storage
                .postgres
                .as_ref()
                .context("storage.postgres is required for the postgres backend")?;
            let pool = create_pool(pg).await.context("connecting to postgres")?;
            test_connection(&pool).await.context("checking postgres connectivity")?;
            if pg.run_migrations {
                migrations::run(&pool).await.context("running migrations")?;
            }
            tracing::info!(pool_size = pg.pool_size, "using postgres storage");
            Ok((
                Arc::new(PostgresJobRepository::new(pool.clone())),
                Arc::new(PostgresRosterDirectory::new(pool)),
            ))
        }
    }
}

pub struct ClaimsgateServer {
    addr: SocketAddr,
    app: Router,
    workers: Option<WorkerPool>,
    cleanup: JoinHandle<()>,
}

impl ClaimsgateServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        if let Some(workers) = self.workers {
            workers.shutdown().await;
        }
        self.cleanup.abort();
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
