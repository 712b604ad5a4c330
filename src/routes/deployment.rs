use actix_web::{get, post, web, HttpResponse, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::DeployError;
use crate::models::{DeploymentOutcome, Operation, OperationReport};
use crate::services::DeploymentOrchestrator;

/// Recorded as the deploy user when the caller does not name one.
pub const DEFAULT_DEPLOY_USER: &str = "api";

#[derive(Debug, Deserialize)]
pub struct DeployForm {
    pub artifact_path: PathBuf,
    pub deploy_user: Option<String>,
}

/// JSON shape of an `OperationReport`.
#[derive(Debug, Serialize)]
pub struct ReportBody<'a> {
    pub operation: Operation,
    pub outcomes: &'a [DeploymentOutcome],
    pub summary: String,
    pub success: bool,
}

fn respond(report: &OperationReport) -> HttpResponse {
    HttpResponse::Ok().json(ReportBody {
        operation: report.operation,
        outcomes: &report.outcomes,
        summary: report.summary(),
        success: report.all_succeeded(),
    })
}

#[tracing::instrument(name = "Deploy artifact", skip(orchestrator))]
#[post("/{id}/deploy")]
pub async fn deploy_handler(
    path: web::Path<(i64,)>,
    form: web::Json<DeployForm>,
    orchestrator: web::Data<DeploymentOrchestrator>,
) -> Result<HttpResponse, DeployError> {
    let id = path.0;
    let form = form.into_inner();
    let user = form.deploy_user.as_deref().unwrap_or(DEFAULT_DEPLOY_USER);

    let report = orchestrator.deploy(&form.artifact_path, id, user).await?;
    Ok(respond(&report))
}

#[tracing::instrument(name = "Start deployment", skip(orchestrator))]
#[post("/{id}/start")]
pub async fn start_handler(
    path: web::Path<(i64,)>,
    orchestrator: web::Data<DeploymentOrchestrator>,
) -> Result<HttpResponse, DeployError> {
    let deployment = orchestrator.resolve_deployment(path.0).await?;
    let report = orchestrator.start_server(&deployment).await?;
    Ok(respond(&report))
}

#[tracing::instrument(name = "Stop deployment", skip(orchestrator))]
#[post("/{id}/stop")]
pub async fn stop_handler(
    path: web::Path<(i64,)>,
    orchestrator: web::Data<DeploymentOrchestrator>,
) -> Result<HttpResponse, DeployError> {
    let deployment = orchestrator.resolve_deployment(path.0).await?;
    let report = orchestrator.stop_server(&deployment).await?;
    Ok(respond(&report))
}

#[tracing::instrument(name = "Deployment status", skip(orchestrator))]
#[get("/{id}/status")]
pub async fn status_handler(
    path: web::Path<(i64,)>,
    orchestrator: web::Data<DeploymentOrchestrator>,
) -> Result<HttpResponse, DeployError> {
    let deployment = orchestrator.resolve_deployment(path.0).await?;
    let report = orchestrator.server_status(&deployment).await?;
    Ok(respond(&report))
}

#[tracing::instrument(name = "Roll back to history", skip(orchestrator))]
#[post("/{history_id}/rollback")]
pub async fn rollback_handler(
    path: web::Path<(i64,)>,
    orchestrator: web::Data<DeploymentOrchestrator>,
) -> Result<HttpResponse, DeployError> {
    let report = orchestrator.rollback_by_id(path.0).await?;
    Ok(respond(&report))
}
