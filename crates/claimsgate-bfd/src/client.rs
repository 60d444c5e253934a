//! mTLS client for the external claims source.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::Value;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::bundle::Bundle;
use crate::config::BfdConfig;
use crate::error::BfdError;
use crate::hash::IdentifierHasher;
use crate::query::{ClaimsWindow, SearchKind, identifier_params, search_params};
use crate::retry::RetryPolicy;

/// Longest error body kept in [`BfdError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// What the export worker needs from the claims source.
///
/// `since` must already be lower-bound shaped (`gt<instant>`) to take effect;
/// `as_of` is the job's transaction time.
#[async_trait]
pub trait ClaimsSource: Send + Sync {
    async fn fetch_patient(
        &self,
        patient_id: &str,
        job_id: Uuid,
        requester_id: &str,
        since: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Result<Bundle, BfdError>;

    async fn fetch_coverage(
        &self,
        beneficiary_id: &str,
        job_id: Uuid,
        requester_id: &str,
        since: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Result<Bundle, BfdError>;

    async fn fetch_explanation_of_benefit(
        &self,
        patient_id: &str,
        job_id: Uuid,
        requester_id: &str,
        since: Option<&str>,
        as_of: DateTime<Utc>,
        claims_window: Option<&ClaimsWindow>,
    ) -> Result<Bundle, BfdError>;

    /// Raw search document for a hashed identifier.
    async fn fetch_by_identifier_hash(&self, hashed_id: &str) -> Result<String, BfdError>;

    /// Raw capability statement.
    async fn fetch_metadata(&self) -> Result<String, BfdError>;

    fn hash_identifier(&self, raw_id: &str) -> String;
}

/// Correlation values sent with every request of one fetch.
#[derive(Debug, Clone, Copy)]
struct Correlation<'a> {
    job_id: Uuid,
    requester_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct BfdClient {
    http: reqwest::Client,
    config: Arc<BfdConfig>,
    hasher: IdentifierHasher,
    retry: RetryPolicy,
}

impl BfdClient {
    /// Builds the mTLS client.
    ///
    /// Fails when the certificate pair is unset or unreadable; no request can
    /// be made without it.
    pub fn new(config: BfdConfig) -> Result<Self, BfdError> {
        let cert_path = config
            .client_cert_file
            .as_ref()
            .ok_or_else(|| BfdError::Config("client_cert_file is not set".into()))?;
        let key_path = config
            .client_key_file
            .as_ref()
            .ok_or_else(|| BfdError::Config("client_key_file is not set".into()))?;

        let cert = read_pem(cert_path)?;
        let key = read_pem(key_path)?;
        let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key)
            .map_err(|e| BfdError::Tls(format!("client identity: {e}")))?;

        let mut builder = reqwest::Client::builder()
            .identity(identity)
            .timeout(config.timeout())
            .gzip(true)
            .user_agent(concat!("claimsgate/", env!("CARGO_PKG_VERSION")));

        if config.check_certificate {
            if let Some(ca_path) = &config.ca_cert_file {
                let bundle = read_pem(ca_path)?;
                let certs = reqwest::Certificate::from_pem_bundle(&bundle)
                    .map_err(|e| BfdError::Tls(format!("CA bundle: {e}")))?;
                for cert in certs {
                    builder = builder.add_root_certificate(cert);
                }
            }
        } else {
            warn!(
                server_url = %config.server_url,
                "server certificate verification is disabled for the claims source"
            );
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| BfdError::Tls(format!("building HTTP client: {e}")))?;
        Self::from_parts(config, http)
    }

    fn from_parts(config: BfdConfig, http: reqwest::Client) -> Result<Self, BfdError> {
        let hasher = IdentifierHasher::new(&config.hash_pepper, config.hash_iterations)?;
        let retry = RetryPolicy::from_config(&config);
        Ok(Self {
            http,
            config: Arc::new(config),
            hasher,
            retry,
        })
    }

    pub fn config(&self) -> &BfdConfig {
        &self.config
    }

    /// Issues one GET and returns the body of a 2xx response.
    async fn get_once(
        &self,
        url: &Url,
        extra_headers: &[(&str, &str)],
        correlation: Option<Correlation<'_>>,
    ) -> Result<String, BfdError> {
        let mut request = self
            .http
            .get(url.clone())
            .header("BFD-OriginalQueryId", Uuid::new_v4().to_string())
            .header("BFD-OriginalQueryTimestamp", Utc::now().to_rfc3339())
            .header("BFD-OriginalQueryCounter", "1")
            .header("BFD-OriginalUrl", url.as_str())
            .header("BFD-OriginalQuery", url.query().unwrap_or_default())
            .header("IncludeIdentifiers", "mbi");
        if let Some(c) = correlation {
            request = request
                .header("BULK-JOBID", c.job_id.to_string())
                .header("BULK-CLIENTID", c.requester_id);
        }
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(BfdError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Runs a search and follows `next` links until the last page.
    async fn search(
        &self,
        kind: SearchKind,
        params: Vec<(String, String)>,
        correlation: Correlation<'_>,
    ) -> Result<Bundle, BfdError> {
        let first = self.config.resource_url(&format!("{}/", kind.resource()));
        let mut url = parse_url(&first, &params)?;
        let mut accumulated: Option<Bundle> = None;
        let mut pages = 0u32;

        loop {
            let page_url = &url;
            let page = self
                .retry
                .run(kind.resource(), || async move {
                    let body = self
                        .get_once(page_url, kind.headers(), Some(correlation))
                        .await?;
                    Bundle::from_json(&body)
                })
                .await?;
            pages += 1;
            debug!(page = pages, entries = page.entries.len(), "fetched page");

            let next = page.next.clone();
            accumulated = Some(match accumulated.take() {
                None => page,
                Some(mut acc) => {
                    acc.append(page);
                    acc
                }
            });

            match next {
                Some(next) => url = parse_url(&next, &[])?,
                None => break,
            }
        }

        let bundle = accumulated.unwrap_or_default();
        info!(pages, entries = bundle.entries.len(), "fetch complete");
        Ok(bundle)
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch(
        &self,
        kind: SearchKind,
        subject_id: &str,
        job_id: Uuid,
        requester_id: &str,
        since: Option<&str>,
        as_of: DateTime<Utc>,
        claims_window: Option<&ClaimsWindow>,
    ) -> Result<Bundle, BfdError> {
        let params = search_params(
            kind,
            subject_id,
            since,
            as_of,
            claims_window,
            self.config.page_size,
        );
        let span = info_span!(
            "claims_fetch",
            %job_id,
            requester_id,
            resource_type = kind.resource()
        );
        self.search(
            kind,
            params,
            Correlation {
                job_id,
                requester_id,
            },
        )
        .instrument(span)
        .await
    }
}

fn read_pem(path: &std::path::Path) -> Result<Vec<u8>, BfdError> {
    std::fs::read(path).map_err(|e| BfdError::Config(format!("reading {}: {e}", path.display())))
}

fn parse_url(base: &str, params: &[(String, String)]) -> Result<Url, BfdError> {
    let parsed = if params.is_empty() {
        Url::parse(base)
    } else {
        Url::parse_with_params(base, params)
    };
    parsed.map_err(|e| BfdError::Config(format!("invalid URL {base}: {e}")))
}

#[async_trait]
impl ClaimsSource for BfdClient {
    async fn fetch_patient(
        &self,
        patient_id: &str,
        job_id: Uuid,
        requester_id: &str,
        since: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Result<Bundle, BfdError> {
        self.fetch(SearchKind::Patient, patient_id, job_id, requester_id, since, as_of, None)
            .await
    }

    async fn fetch_coverage(
        &self,
        beneficiary_id: &str,
        job_id: Uuid,
        requester_id: &str,
        since: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Result<Bundle, BfdError> {
        self.fetch(
            SearchKind::Coverage,
            beneficiary_id,
            job_id,
            requester_id,
            since,
            as_of,
            None,
        )
        .await
    }

    async fn fetch_explanation_of_benefit(
        &self,
        patient_id: &str,
        job_id: Uuid,
        requester_id: &str,
        since: Option<&str>,
        as_of: DateTime<Utc>,
        claims_window: Option<&ClaimsWindow>,
    ) -> Result<Bundle, BfdError> {
        self.fetch(
            SearchKind::ExplanationOfBenefit,
            patient_id,
            job_id,
            requester_id,
            since,
            as_of,
            claims_window,
        )
        .await
    }

    async fn fetch_by_identifier_hash(&self, hashed_id: &str) -> Result<String, BfdError> {
        let base = self.config.resource_url("Patient/");
        let url = parse_url(&base, &identifier_params(hashed_id, self.config.page_size))?;
        let url = &url;
        self.retry
            .run("Patient identifier", || async move {
                let body = self.get_once(url, &[], None).await?;
                Bundle::from_json(&body)?;
                Ok(body)
            })
            .await
    }

    async fn fetch_metadata(&self) -> Result<String, BfdError> {
        let base = self.config.resource_url("metadata");
        let url = parse_url(&base, &[("_format".into(), "application/fhir+json".into())])?;
        let url = &url;
        self.retry
            .run("metadata", || async move {
                let body = self.get_once(url, &[], None).await?;
                serde_json::from_str::<Value>(&body)?;
                Ok(body)
            })
            .await
    }

    fn hash_identifier(&self, raw_id: &str) -> String {
        self.hasher.hash(raw_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn config(server: &MockServer, max_tries: u32) -> BfdConfig {
        BfdConfig {
            server_url: server.uri(),
            base_path: "/v2/fhir".into(),
            max_tries,
            initial_interval_ms: 1,
            max_interval_ms: 5,
            hash_pepper: "73616c74".into(),
            hash_iterations: 1,
            ..Default::default()
        }
    }

    fn client(server: &MockServer, max_tries: u32) -> BfdClient {
        BfdClient::from_parts(config(server, max_tries), reqwest::Client::new()).unwrap()
    }

    fn page(ids: &[&str], next: Option<String>) -> serde_json::Value {
        let mut links = vec![json!({"relation": "self", "url": "ignored"})];
        if let Some(next) = next {
            links.push(json!({"relation": "next", "url": next}));
        }
        json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "link": links,
            "entry": ids
                .iter()
                .map(|id| json!({"resource": {"resourceType": "Coverage", "id": id}}))
                .collect::<Vec<_>>()
        })
    }

    fn ids(bundle: &Bundle) -> Vec<String> {
        bundle
            .entries
            .iter()
            .map(|e| e["id"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn follows_next_links_and_concatenates_in_page_order() {
        let server = MockServer::start().await;
        let second = format!("{}/v2/fhir/Coverage/?page=2", server.uri());
        let third = format!("{}/v2/fhir/Coverage/?page=3", server.uri());

        Mock::given(method("GET"))
            .and(path("/v2/fhir/Coverage/"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(&["e", "f"], None)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/fhir/Coverage/"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(page(&["c", "d"], Some(third))),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/fhir/Coverage/"))
            .and(query_param("beneficiary", "bene-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(page(&["a", "b"], Some(second))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let bundle = client(&server, 3)
            .fetch_coverage("bene-1", Uuid::new_v4(), "1234567890", None, Utc::now())
            .await
            .unwrap();

        assert_eq!(ids(&bundle), vec!["a", "b", "c", "d", "e", "f"]);
        assert!(bundle.next.is_none());
    }

    #[tokio::test]
    async fn single_page_fetch_returns_that_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/fhir/Coverage/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(&["only"], None)))
            .expect(1)
            .mount(&server)
            .await;

        let bundle = client(&server, 3)
            .fetch_coverage("bene-1", Uuid::new_v4(), "npi", None, Utc::now())
            .await
            .unwrap();
        assert_eq!(ids(&bundle), vec!["only"]);
    }

    #[tokio::test]
    async fn always_failing_target_is_tried_exactly_max_tries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(4)
            .mount(&server)
            .await;

        let err = client(&server, 4)
            .fetch_patient("p1", Uuid::new_v4(), "npi", None, Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, BfdError::Exhausted { attempts: 4, .. }));
        assert!(err.to_string().contains('4'));
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn unparseable_body_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server, 2)
            .fetch_coverage("b", Uuid::new_v4(), "npi", None, Utc::now())
            .await
            .unwrap_err();
        match err {
            BfdError::Exhausted { attempts, source } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, BfdError::Parse(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn sends_correlation_and_inclusion_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/fhir/ExplanationOfBenefit/"))
            .and(header("IncludeTaxNumbers", "true"))
            .and(header("IncludeIdentifiers", "mbi"))
            .and(header("BFD-OriginalQueryCounter", "1"))
            .and(header("BULK-CLIENTID", "1234567890"))
            .and(query_param("excludeSAMHSA", "true"))
            .and(query_param("patient", "p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(&[], None)))
            .expect(1)
            .mount(&server)
            .await;

        let job_id = Uuid::new_v4();
        client(&server, 1)
            .fetch_explanation_of_benefit("p1", job_id, "1234567890", None, Utc::now(), None)
            .await
            .unwrap();

        let requests: Vec<Request> = server.received_requests().await.unwrap();
        let req = &requests[0];
        assert_eq!(
            req.headers.get("BULK-JOBID").unwrap().to_str().unwrap(),
            job_id.to_string()
        );
        assert!(req.headers.get("IncludeAddressFields").is_none());
        let query_id = req.headers.get("BFD-OriginalQueryId").unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(query_id).is_ok());
        let original_query = req.headers.get("BFD-OriginalQuery").unwrap().to_str().unwrap();
        assert!(original_query.contains("excludeSAMHSA=true"));
        assert!(req.headers.get("Accept-Encoding").is_some());
    }

    #[tokio::test]
    async fn patient_fetch_requests_address_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/fhir/Patient/"))
            .and(header("IncludeAddressFields", "true"))
            .and(query_param("_id", "p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(&["p1"], None)))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, 1)
            .fetch_patient(
                "p1",
                Uuid::new_v4(),
                "npi",
                Some("gt2026-01-01T00:00:00Z"),
                Utc::now(),
            )
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let last_updated: Vec<String> = requests[0]
            .url
            .query_pairs()
            .filter(|(k, _)| k == "_lastUpdated")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(last_updated.len(), 2);
        assert!(last_updated[0].starts_with("le"));
        assert_eq!(last_updated[1], "gt2026-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn identifier_lookup_returns_raw_document() {
        let server = MockServer::start().await;
        let client = client(&server, 1);
        let hashed = client.hash_identifier("passwd");
        let identifier = format!(
            "https://bluebutton.cms.gov/resources/identifier/mbi-hash|{hashed}"
        );
        Mock::given(method("GET"))
            .and(path("/v2/fhir/Patient/"))
            .and(query_param("identifier", identifier.as_str()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({
                    "resourceType": "Bundle",
                    "total": 1,
                    "entry": [{"resource": {"resourceType": "Patient", "id": "-19990000000001"}}]
                })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let raw = client.fetch_by_identifier_hash(&hashed).await.unwrap();
        let bundle = Bundle::from_json(&raw).unwrap();
        assert_eq!(bundle.first_id(), Some("-19990000000001"));
    }

    #[tokio::test]
    async fn metadata_is_returned_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/fhir/metadata"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"resourceType":"CapabilityStatement"}"#),
            )
            .mount(&server)
            .await;

        let raw = client(&server, 1).fetch_metadata().await.unwrap();
        assert_eq!(raw, r#"{"resourceType":"CapabilityStatement"}"#);
    }

    #[test]
    fn construction_requires_certificate_pair() {
        let err = BfdClient::new(BfdConfig::default()).unwrap_err();
        assert!(matches!(err, BfdError::Config(_)));

        let err = BfdClient::new(BfdConfig {
            client_cert_file: Some("/nonexistent/cert.pem".into()),
            client_key_file: Some("/nonexistent/key.pem".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, BfdError::Config(_)));
    }

    #[test]
    fn construction_rejects_invalid_identity() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let err = BfdClient::new(BfdConfig {
            client_cert_file: Some(cert),
            client_key_file: Some(key),
            hash_pepper: "00".into(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, BfdError::Tls(_)));
    }
}
