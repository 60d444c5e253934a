// Tracing setup with a level that can be replaced after the config is loaded.
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Set when `RUST_LOG` supplied the filter; config levels are ignored then.
static ENV_OVERRIDE: OnceLock<bool> = OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    let from_env = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok());
    let _ = ENV_OVERRIDE.set(from_env.is_some());
    let base_filter = from_env.unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Apply `logging.level` from the config unless `RUST_LOG` is set.
pub fn apply_logging_level(level: &str) {
    if ENV_OVERRIDE.get().copied().unwrap_or(false) {
        tracing::debug!(level, "RUST_LOG set; ignoring configured log level");
        return;
    }
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|f| {
            *f = EnvFilter::new(level);
        });
    }
}
