use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use claimsgate_storage::{GroupRoster, RosterDirectory, StorageError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seed document for [`InMemoryRosterDirectory`].
///
/// ```json
/// {
///   "organizations": [{
///     "id": "46ac7ad6-7487-4dd0-baa0-6e2c8cae76a0",
///     "npi": "1234567890",
///     "providers": [{ "id": "prov-1", "npi": "0987654321" }],
///     "groups": [{ "id": "grp-1", "provider_id": "prov-1", "patients": ["1SQ3F00AA00"] }],
///     "patients": [{ "id": "pat-1", "mbi": "1SQ3F00AA00" }]
///   }]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterSeed {
    #[serde(default)]
    pub organizations: Vec<OrganizationSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationSeed {
    pub id: Uuid,
    pub npi: String,
    #[serde(default)]
    pub providers: Vec<ProviderSeed>,
    #[serde(default)]
    pub groups: Vec<GroupSeed>,
    #[serde(default)]
    pub patients: Vec<PatientSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSeed {
    pub id: String,
    pub npi: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSeed {
    pub id: String,
    pub provider_id: String,
    #[serde(default)]
    pub patients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientSeed {
    pub id: String,
    pub mbi: String,
}

impl RosterSeed {
    /// Reads a JSON seed file.
    pub fn from_file(path: &Path) -> Result<Self, StorageError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StorageError::connection_error(format!("reading roster seed {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            StorageError::internal(format!("parsing roster seed {}: {e}", path.display()))
        })
    }
}

#[derive(Debug, Default)]
struct Organization {
    npi: String,
    providers: HashMap<String, String>,
    groups: HashMap<String, GroupRoster>,
    patients: HashMap<String, String>,
}

/// Roster directory built once from seed data; read-only afterwards.
#[derive(Debug, Default)]
pub struct InMemoryRosterDirectory {
    organizations: HashMap<Uuid, Organization>,
}

impl InMemoryRosterDirectory {
    pub fn from_seed(seed: RosterSeed) -> Self {
        let organizations = seed
            .organizations
            .into_iter()
            .map(|org| {
                let entry = Organization {
                    npi: org.npi,
                    providers: org.providers.into_iter().map(|p| (p.id, p.npi)).collect(),
                    groups: org
                        .groups
                        .into_iter()
                        .map(|g| {
                            (
                                g.id,
                                GroupRoster {
                                    provider_id: g.provider_id,
                                    patients: g.patients,
                                },
                            )
                        })
                        .collect(),
                    patients: org.patients.into_iter().map(|p| (p.id, p.mbi)).collect(),
                };
                (org.id, entry)
            })
            .collect();
        Self { organizations }
    }
}

#[async_trait]
impl RosterDirectory for InMemoryRosterDirectory {
    async fn organization_npi(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<String>, StorageError> {
        Ok(self
            .organizations
            .get(&organization_id)
            .map(|o| o.npi.clone()))
    }

    async fn provider_npi(
        &self,
        organization_id: Uuid,
        provider_id: &str,
    ) -> Result<Option<String>, StorageError> {
        Ok(self
            .organizations
            .get(&organization_id)
            .and_then(|o| o.providers.get(provider_id).cloned()))
    }

    async fn group_roster(
        &self,
        organization_id: Uuid,
        group_id: &str,
    ) -> Result<Option<GroupRoster>, StorageError> {
        Ok(self
            .organizations
            .get(&organization_id)
            .and_then(|o| o.groups.get(group_id).cloned()))
    }

    async fn patient_identifier(
        &self,
        organization_id: Uuid,
        patient_id: &str,
    ) -> Result<Option<String>, StorageError> {
        Ok(self
            .organizations
            .get(&organization_id)
            .and_then(|o| o.patients.get(patient_id).cloned()))
    }
}
