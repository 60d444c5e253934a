use claimsgate_bfd::BfdConfig;
use claimsgate_db_postgres::PostgresConfig;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Claims source client
    #[serde(default)]
    pub bfd: BfdConfig,
    /// Job submission
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Synchronous `$everything` export
    #[serde(default)]
    pub everything: EverythingConfig,
    /// Export file store
    #[serde(default)]
    pub export: ExportConfig,
    /// Background batch workers
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Roster directory seed (memory backend only)
    #[serde(default)]
    pub directory: DirectoryConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        if let Some(ref base) = self.server.base_url {
            url::Url::parse(base).map_err(|e| format!("server.base_url is not a URL: {e}"))?;
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Storage validation
        if self.storage.backend == StorageBackend::Postgres {
            match self.storage.postgres {
                None => return Err("storage.backend=postgres requires storage.postgres".into()),
                Some(ref pg) if pg.url.trim().is_empty() => {
                    return Err("storage.postgres.url must not be empty".into());
                }
                Some(ref pg) if pg.pool_size == 0 => {
                    return Err("storage.postgres.pool_size must be > 0".into());
                }
                Some(_) => {}
            }
        }
        // Claims source validation
        url::Url::parse(&self.bfd.server_url)
            .map_err(|e| format!("bfd.server_url is not a URL: {e}"))?;
        if self.bfd.max_tries == 0 {
            return Err("bfd.max_tries must be > 0".into());
        }
        if self.bfd.timeout_ms == 0 || self.bfd.initial_interval_ms == 0 {
            return Err("bfd timeouts and intervals must be > 0".into());
        }
        if self.bfd.max_interval_ms < self.bfd.initial_interval_ms {
            return Err("bfd.max_interval_ms must be >= bfd.initial_interval_ms".into());
        }
        if self.bfd.hash_iterations == 0 {
            return Err("bfd.hash_iterations must be > 0".into());
        }
        // Job and export validations
        if self.jobs.batch_size == 0 {
            return Err("jobs.batch_size must be > 0".into());
        }
        if self.everything.poll_interval_ms == 0 || self.everything.timeout_ms == 0 {
            return Err("everything intervals must be > 0".into());
        }
        if self.export.max_resources_per_file == 0 {
            return Err("export.max_resources_per_file must be > 0".into());
        }
        if self.export.retention_hours < 24 {
            return Err("export.retention_hours must be >= 24".into());
        }
        if self.worker.enabled && (self.worker.concurrency == 0 || self.worker.poll_interval_ms == 0)
        {
            return Err("worker.concurrency and worker.poll_interval_ms must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    /// Returns the base URL for the server.
    /// If `base_url` is configured, returns that; otherwise computes from host:port.
    pub fn base_url(&self) -> String {
        self.server
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.server.host, self.server.port))
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL used in `Content-Location` and manifest links.
    /// If not set, defaults to http://{host}:{port}
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3000
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: None,
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Required when `backend = "postgres"`
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Patients per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    100
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EverythingConfig {
    #[serde(default = "default_everything_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_everything_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_everything_poll_ms() -> u64 {
    250
}
fn default_everything_timeout_ms() -> u64 {
    30_000
}

impl EverythingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EverythingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_everything_poll_ms(),
            timeout_ms: default_everything_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory holding `{file_name}.ndjson` output files
    #[serde(default = "default_export_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_resources_per_file")]
    pub max_resources_per_file: usize,
    /// Output files older than this are deleted from disk
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_export_path() -> PathBuf {
    PathBuf::from("./data/exports")
}
fn default_max_resources_per_file() -> usize {
    50_000
}
fn default_retention_hours() -> u64 {
    24
}
fn default_cleanup_interval_secs() -> u64 {
    3600
}

impl ExportConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: default_export_path(),
            max_resources_per_file: default_max_resources_per_file(),
            retention_hours: default_retention_hours(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Run batch workers inside the server process
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,
    /// Idle sleep when no batch is claimable
    #[serde(default = "default_worker_poll_ms")]
    pub poll_interval_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_worker_concurrency() -> usize {
    2
}
fn default_worker_poll_ms() -> u64 {
    1000
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            concurrency: default_worker_concurrency(),
            poll_interval_ms: default_worker_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DirectoryConfig {
    /// JSON roster seed loaded into the in-memory directory
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File, FileFormat};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "claimsgate.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf).format(FileFormat::Toml));
        }
        // Environment variable overrides, e.g., CLAIMSGATE__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("CLAIMSGATE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.jobs.batch_size, 100);
        assert_eq!(cfg.everything.poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.everything.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn base_url_falls_back_to_listen_address() {
        let mut cfg = AppConfig::default();
        assert_eq!(cfg.base_url(), "http://0.0.0.0:3000");
        cfg.server.base_url = Some("https://export.example.org/api/v2/".into());
        assert_eq!(cfg.base_url(), "https://export.example.org/api/v2");
    }

    #[test]
    fn postgres_backend_requires_url() {
        let mut cfg = AppConfig::default();
        cfg.storage.backend = StorageBackend::Postgres;
        assert!(cfg.validate().is_err());

        cfg.storage.postgres = Some(PostgresConfig::new(""));
        assert!(cfg.validate().unwrap_err().contains("url"));

        cfg.storage.postgres = Some(PostgresConfig::new("postgres://db/claims"));
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_zero_sizes_and_unknown_levels() {
        let mut cfg = AppConfig::default();
        cfg.jobs.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.logging.level = "chatty".into();
        assert!(cfg.validate().unwrap_err().contains("logging.level"));

        let mut cfg = AppConfig::default();
        cfg.everything.poll_interval_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.export.retention_hours = 1;
        assert!(cfg.validate().is_err());
    }
}
