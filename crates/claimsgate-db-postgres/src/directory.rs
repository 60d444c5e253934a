//! Read-only roster queries.

use async_trait::async_trait;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;
use uuid::Uuid;

use claimsgate_storage::{GroupRoster, RosterDirectory, StorageError};

use crate::error::storage_error;

#[derive(Debug, Clone)]
pub struct PostgresRosterDirectory {
    pool: PgPool,
}

impl PostgresRosterDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RosterDirectory for PostgresRosterDirectory {
    async fn organization_npi(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<String>, StorageError> {
        query_scalar("SELECT npi FROM roster_organization WHERE organization_id = $1")
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)
    }

    async fn provider_npi(
        &self,
        organization_id: Uuid,
        provider_id: &str,
    ) -> Result<Option<String>, StorageError> {
        query_scalar(
            "SELECT npi FROM roster_provider WHERE organization_id = $1 AND provider_id = $2",
        )
        .bind(organization_id)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)
    }

    async fn group_roster(
        &self,
        organization_id: Uuid,
        group_id: &str,
    ) -> Result<Option<GroupRoster>, StorageError> {
        let provider_id: Option<String> = query_scalar(
            "SELECT provider_id FROM roster_group WHERE organization_id = $1 AND group_id = $2",
        )
        .bind(organization_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        let Some(provider_id) = provider_id else {
            return Ok(None);
        };

        let members: Vec<(String,)> = query_as(
            r#"SELECT patient_mbi FROM roster_group_member
               WHERE organization_id = $1 AND group_id = $2
               ORDER BY position"#,
        )
        .bind(organization_id)
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(Some(GroupRoster {
            provider_id,
            patients: members.into_iter().map(|(mbi,)| mbi).collect(),
        }))
    }

    async fn patient_identifier(
        &self,
        organization_id: Uuid,
        patient_id: &str,
    ) -> Result<Option<String>, StorageError> {
        query_scalar(
            "SELECT mbi FROM roster_patient WHERE organization_id = $1 AND patient_id = $2",
        )
        .bind(organization_id)
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)
    }
}
