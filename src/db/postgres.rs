use async_trait::async_trait;
use sqlx::PgPool;

use super::{deployment, history, server, DeploymentRepository, HistoryStore};
use crate::errors::DeployError;
use crate::models::{Deployment, DeploymentHistory, TargetServer};

/// Postgres-backed record store over the `mnt_*` tables.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), DeployError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| DeployError::Store(format!("migration failed: {}", err)))
    }
}

#[async_trait]
impl DeploymentRepository for PgRecordStore {
    async fn find_deployment(&self, id: i64) -> Result<Option<Deployment>, DeployError> {
        deployment::fetch(&self.pool, id).await
    }

    async fn find_server_by_ip(&self, ip: &str) -> Result<Option<TargetServer>, DeployError> {
        server::fetch_by_ip(&self.pool, ip).await
    }
}

#[async_trait]
impl HistoryStore for PgRecordStore {
    async fn create(&self, record: DeploymentHistory) -> Result<DeploymentHistory, DeployError> {
        history::insert(&self.pool, record).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<DeploymentHistory>, DeployError> {
        history::fetch(&self.pool, id).await
    }
}
