use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;

/// Errors surfaced by the deployment orchestrator and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A referenced deployment, application or server record is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A remote session could not be opened.
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },
    /// The application never started listening within the polling budget.
    #[error("{app} on {server} is not listening after {attempts} probe(s)")]
    LivenessTimeout {
        server: String,
        app: String,
        attempts: u32,
    },
    /// A remote command could not be run or its output could not be read.
    #[error("Remote command `{command}` failed on {host}: {reason}")]
    RemoteCommand {
        host: String,
        command: String,
        reason: String,
    },
    #[error("File transfer to {host} failed: {reason}")]
    Transfer { host: String, reason: String },
    #[error("Record store error: {0}")]
    Store(String),
}

impl DeployError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn connection(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub fn remote_command(
        host: impl Into<String>,
        command: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::RemoteCommand {
            host: host.into(),
            command: command.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transfer(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transfer {
            host: host.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<sqlx::Error> for DeployError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl ResponseError for DeployError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration(_) => StatusCode::BAD_REQUEST,
            Self::Connection { .. } | Self::RemoteCommand { .. } | Self::Transfer { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::LivenessTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            Self::Configuration(_) => "Invalid deployment configuration",
            Self::Connection { .. } => "Server unreachable",
            Self::RemoteCommand { .. } => "Remote command failed",
            Self::Transfer { .. } => "Artifact transfer failed",
            Self::LivenessTimeout { .. } => "Application did not start",
            Self::Store(_) => "Internal error",
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": message,
            "details": self.to_string(),
        }))
    }
}
