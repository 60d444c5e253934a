//! Read-only lookup of organizations, providers and rosters.
//!
//! The administrative data behind these lookups is owned elsewhere; the
//! export pipeline only needs the answers below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

/// The patients attributed to one provider group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRoster {
    pub provider_id: String,
    pub patients: Vec<String>,
}

#[async_trait]
pub trait RosterDirectory: Send + Sync {
    /// NPI of the organization, `None` when the organization is unknown.
    async fn organization_npi(&self, organization_id: Uuid)
    -> Result<Option<String>, StorageError>;

    /// NPI of a provider registered under the organization.
    async fn provider_npi(
        &self,
        organization_id: Uuid,
        provider_id: &str,
    ) -> Result<Option<String>, StorageError>;

    /// Roster of a group owned by the organization.
    async fn group_roster(
        &self,
        organization_id: Uuid,
        group_id: &str,
    ) -> Result<Option<GroupRoster>, StorageError>;

    /// Beneficiary identifier (MBI) of a patient registered under the organization.
    async fn patient_identifier(
        &self,
        organization_id: Uuid,
        patient_id: &str,
    ) -> Result<Option<String>, StorageError>;
}
