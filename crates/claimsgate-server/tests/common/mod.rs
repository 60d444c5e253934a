#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claimsgate_bfd::{BfdError, Bundle, ClaimsSource, ClaimsWindow};
use claimsgate_db_memory::{
    InMemoryJobRepository, InMemoryRosterDirectory, OrganizationSeed, RosterSeed,
    directory::{GroupSeed, PatientSeed, ProviderSeed},
};
use claimsgate_server::{AppConfig, AppState, build_app};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const ORG_ID: &str = "46ac7ad6-7487-4dd0-baa0-6e2c8cae76a0";
pub const OTHER_ORG_ID: &str = "0c527d2e-2e8a-4808-b11d-0fa06baf8254";
pub const KNOWN_MBI: &str = "1SQ3F00AA00";
pub const UNKNOWN_MBI: &str = "9ZZ9Z99ZZ99";

pub fn org_id() -> Uuid {
    Uuid::parse_str(ORG_ID).unwrap()
}

pub fn seed() -> RosterSeed {
    RosterSeed {
        organizations: vec![OrganizationSeed {
            id: org_id(),
            npi: "1234567890".into(),
            providers: vec![ProviderSeed {
                id: "prov-1".into(),
                npi: "0987654321".into(),
            }],
            groups: vec![GroupSeed {
                id: "grp-1".into(),
                provider_id: "prov-1".into(),
                patients: vec![KNOWN_MBI.into(), UNKNOWN_MBI.into()],
            }],
            patients: vec![
                PatientSeed {
                    id: "pat-1".into(),
                    mbi: KNOWN_MBI.into(),
                },
                PatientSeed {
                    id: "pat-2".into(),
                    mbi: UNKNOWN_MBI.into(),
                },
            ],
        }],
    }
}

/// Claims source that knows one beneficiary.
pub struct FakeClaims;

fn bundle(entries: Vec<Value>) -> Bundle {
    Bundle {
        total: Some(entries.len() as u64),
        entries,
        next: None,
    }
}

#[async_trait]
impl ClaimsSource for FakeClaims {
    async fn fetch_patient(
        &self,
        patient_id: &str,
        _job_id: Uuid,
        _requester_id: &str,
        _since: Option<&str>,
        _as_of: DateTime<Utc>,
    ) -> Result<Bundle, BfdError> {
        Ok(bundle(vec![json!({"resourceType": "Patient", "id": patient_id})]))
    }

    async fn fetch_coverage(
        &self,
        beneficiary_id: &str,
        _job_id: Uuid,
        _requester_id: &str,
        _since: Option<&str>,
        _as_of: DateTime<Utc>,
    ) -> Result<Bundle, BfdError> {
        Ok(bundle(vec![
            json!({"resourceType": "Coverage", "id": format!("part-a-{beneficiary_id}")}),
        ]))
    }

    async fn fetch_explanation_of_benefit(
        &self,
        patient_id: &str,
        _job_id: Uuid,
        _requester_id: &str,
        _since: Option<&str>,
        _as_of: DateTime<Utc>,
        _claims_window: Option<&ClaimsWindow>,
    ) -> Result<Bundle, BfdError> {
        Ok(bundle(vec![
            json!({"resourceType": "ExplanationOfBenefit", "id": format!("carrier-{patient_id}")}),
            json!({"resourceType": "ExplanationOfBenefit", "id": format!("outpatient-{patient_id}")}),
        ]))
    }

    async fn fetch_by_identifier_hash(&self, hashed_id: &str) -> Result<String, BfdError> {
        let body = if hashed_id == format!("hash:{KNOWN_MBI}") {
            json!({
                "resourceType": "Bundle",
                "total": 1,
                "entry": [{"resource": {"resourceType": "Patient", "id": "-19990000000001"}}]
            })
        } else {
            json!({"resourceType": "Bundle", "total": 0})
        };
        Ok(body.to_string())
    }

    async fn fetch_metadata(&self) -> Result<String, BfdError> {
        Ok(json!({"resourceType": "CapabilityStatement"}).to_string())
    }

    fn hash_identifier(&self, raw_id: &str) -> String {
        format!("hash:{raw_id}")
    }
}

pub fn test_config(export_dir: &std::path::Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.server.base_url = Some("http://gw.test".into());
    cfg.export.path = export_dir.to_path_buf();
    cfg.everything.poll_interval_ms = 20;
    cfg.everything.timeout_ms = 5_000;
    cfg
}

pub fn test_state(cfg: AppConfig) -> (AppState, Arc<InMemoryJobRepository>) {
    let repo = Arc::new(InMemoryJobRepository::new());
    let directory = Arc::new(InMemoryRosterDirectory::from_seed(seed()));
    (AppState::new(cfg, repo.clone(), directory), repo)
}

pub async fn start_server(state: AppState) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let app = build_app(state);

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = rx.await;
        })
        .await;
    });

    (format!("http://{addr}"), tx, server)
}
