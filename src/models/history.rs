use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Pointer to a backup snapshot taken while redeploying over an existing
/// artifact. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentHistory {
    /// Assigned by the store, `0` until persisted.
    pub id: i64,
    pub app_name: String,
    pub deploy_user: String,
    pub ip: String,
    pub deployment_id: i64,
    /// Second-precision local time; also the snapshot directory name.
    pub deployed_at: NaiveDateTime,
}

impl DeploymentHistory {
    pub fn new(
        app_name: String,
        deploy_user: String,
        ip: String,
        deployment_id: i64,
        deployed_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: 0,
            app_name,
            deploy_user,
            ip,
            deployment_id,
            deployed_at,
        }
    }
}
