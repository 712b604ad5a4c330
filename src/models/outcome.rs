use serde::Serialize;
use std::fmt;

/// Orchestrator entry points, used to label reports and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Deploy,
    Start,
    Stop,
    Status,
    Rollback,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deploy => "deploy",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Status => "status",
            Self::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// Result of the latest operation on one target server. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentOutcome {
    pub server_name: String,
    pub app_name: String,
    pub success: bool,
    /// Every progress line published for this server, in order.
    pub trail: Vec<String>,
}

impl DeploymentOutcome {
    pub fn new(server_name: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            app_name: app_name.into(),
            success: false,
            trail: Vec::new(),
        }
    }
}

/// Aggregate result of one orchestrator call.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub operation: Operation,
    pub outcomes: Vec<DeploymentOutcome>,
}

impl OperationReport {
    pub fn new(operation: Operation, outcomes: Vec<DeploymentOutcome>) -> Self {
        Self {
            operation,
            outcomes,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &DeploymentOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.success)
    }

    /// Short textual summary handed back to callers.
    pub fn summary(&self) -> String {
        let failed = self.failed().count();
        if failed == 0 {
            format!("{} finished on {} server(s)", self.operation, self.outcomes.len())
        } else {
            format!(
                "{} finished on {} server(s), {} failed",
                self.operation,
                self.outcomes.len(),
                failed
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(success: bool) -> DeploymentOutcome {
        DeploymentOutcome {
            success,
            ..DeploymentOutcome::new("web-1", "billing")
        }
    }

    #[test]
    fn summary_counts_failures() {
        let report = OperationReport::new(Operation::Deploy, vec![outcome(true), outcome(false)]);
        assert!(!report.all_succeeded());
        assert_eq!(report.summary(), "deploy finished on 2 server(s), 1 failed");
    }

    #[test]
    fn summary_without_failures() {
        let report = OperationReport::new(Operation::Stop, vec![outcome(true)]);
        assert!(report.all_succeeded());
        assert_eq!(report.summary(), "stop finished on 1 server(s)");
    }
}
