//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Everything the client needs to reach the claims source.
///
/// Read-only once the client is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BfdConfig {
    /// Scheme, host and port, e.g. `https://prod-sbx.bfd.cms.gov`.
    pub server_url: String,
    /// Path prefix of the FHIR endpoint, e.g. `/v2/fhir`.
    pub base_path: String,
    /// Per-request transport timeout.
    pub timeout_ms: u64,
    /// Page size sent as `_count`; zero leaves paging to the server.
    pub page_size: u32,
    /// Attempts per HTTP request, the first one included.
    pub max_tries: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    /// PEM client certificate.
    pub client_cert_file: Option<PathBuf>,
    /// PKCS#8 PEM private key matching `client_cert_file`.
    pub client_key_file: Option<PathBuf>,
    /// PEM bundle of CAs trusted for the server certificate.
    pub ca_cert_file: Option<PathBuf>,
    pub check_certificate: bool,
    /// Hex-encoded PBKDF2 salt shared with the claims source.
    pub hash_pepper: String,
    pub hash_iterations: u32,
}

impl Default for BfdConfig {
    fn default() -> Self {
        Self {
            server_url: "https://localhost:9954".to_string(),
            base_path: "/v2/fhir".to_string(),
            timeout_ms: 30_000,
            page_size: 0,
            max_tries: 3,
            initial_interval_ms: 500,
            max_interval_ms: 10_000,
            client_cert_file: None,
            client_key_file: None,
            ca_cert_file: None,
            check_certificate: true,
            hash_pepper: String::new(),
            hash_iterations: 1000,
        }
    }
}

impl BfdConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `server_url` joined with `base_path` and `resource`, without duplicate slashes.
    pub fn resource_url(&self, resource: &str) -> String {
        let mut url = self.server_url.trim_end_matches('/').to_string();
        for segment in [self.base_path.trim_matches('/'), resource.trim_start_matches('/')] {
            if !segment.is_empty() {
                url.push('/');
                url.push_str(segment);
            }
        }
        url
    }
}
