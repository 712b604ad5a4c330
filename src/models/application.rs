use serde::{Deserialize, Serialize};

/// An application that can be shipped to a fleet of servers.
///
/// Paths are absolute paths on the target hosts. The scripts are opaque shell
/// text executed verbatim on every target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub name: String,
    /// TCP port the application listens on once started.
    pub port: u16,
    pub upload_path: String,
    pub deploy_path: String,
    pub backup_path: String,
    pub deploy_script: String,
    pub start_script: String,
}
