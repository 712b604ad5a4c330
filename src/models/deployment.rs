use serde::{Deserialize, Serialize};

use super::Application;

/// A server bound to a deployment, as stored with the deployment record.
/// The connection profile is looked up separately by `ip`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTarget {
    pub ip: String,
    pub name: String,
}

/// One application bound to a set of target servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: i64,
    /// `None` when the application record was deleted after the deployment
    /// was created.
    pub application: Option<Application>,
    pub targets: Vec<DeployTarget>,
}

impl Deployment {
    pub fn new(id: i64, application: Option<Application>, targets: Vec<DeployTarget>) -> Self {
        Self {
            id,
            application,
            targets,
        }
    }
}
