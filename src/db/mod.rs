//! Record store consumed by the orchestrator.
//!
//! Creating and editing applications, servers and deployments belongs to the
//! admin CRUD layer; the orchestrator only reads them and appends history.

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::models::{Deployment, DeploymentHistory, TargetServer};

pub mod deployment;
pub mod history;
pub mod memory;
mod postgres;
pub mod server;

pub use memory::{Inventory, MemoryStore};
pub use postgres::PgRecordStore;

/// Read access to deployments and server connection profiles.
#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    async fn find_deployment(&self, id: i64) -> Result<Option<Deployment>, DeployError>;

    async fn find_server_by_ip(&self, ip: &str) -> Result<Option<TargetServer>, DeployError>;
}

/// Append-only backup history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persists a new row and returns it with its assigned id.
    async fn create(&self, record: DeploymentHistory) -> Result<DeploymentHistory, DeployError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<DeploymentHistory>, DeployError>;
}
