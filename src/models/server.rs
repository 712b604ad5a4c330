use serde::{Deserialize, Serialize};
use std::fmt;

fn default_ssh_port() -> u16 {
    22
}

/// Connection profile of a target host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetServer {
    pub ip: String,
    pub name: String,
    pub account: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

impl TargetServer {
    /// Address handed to the SSH transport.
    pub fn address(&self) -> (&str, u16) {
        (self.ip.as_str(), self.port)
    }
}

// Keeps the credential out of logs.
impl fmt::Debug for TargetServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetServer")
            .field("ip", &self.ip)
            .field("name", &self.name)
            .field("account", &self.account)
            .field("password", &"***")
            .field("port", &self.port)
            .finish()
    }
}
