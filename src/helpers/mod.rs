mod ssh_client;

pub use ssh_client::{SshConnector, SshSession};
