use sqlx::PgPool;
use tracing::Instrument;

use crate::errors::DeployError;
use crate::models;

/// Deployment joined with its (possibly deleted) application.
#[derive(Debug, sqlx::FromRow)]
struct DeploymentRow {
    deploy_id: i64,
    app_id: Option<i64>,
    name: Option<String>,
    port: Option<i32>,
    upload_path: Option<String>,
    deploy_path: Option<String>,
    backup_path: Option<String>,
    deploy_script: Option<String>,
    start_script: Option<String>,
}

impl DeploymentRow {
    fn application(&self) -> Result<Option<models::Application>, DeployError> {
        let (Some(id), Some(name), Some(port)) = (self.app_id, self.name.as_ref(), self.port)
        else {
            return Ok(None);
        };
        let port = u16::try_from(port).map_err(|_| {
            DeployError::configuration(format!("application {} has invalid port {}", name, port))
        })?;

        Ok(Some(models::Application {
            id,
            name: name.clone(),
            port,
            upload_path: self.upload_path.clone().unwrap_or_default(),
            deploy_path: self.deploy_path.clone().unwrap_or_default(),
            backup_path: self.backup_path.clone().unwrap_or_default(),
            deploy_script: self.deploy_script.clone().unwrap_or_default(),
            start_script: self.start_script.clone().unwrap_or_default(),
        }))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TargetRow {
    ip: String,
    name: String,
}

pub async fn fetch(pool: &PgPool, id: i64) -> Result<Option<models::Deployment>, DeployError> {
    let query_span = tracing::info_span!("Fetch deployment", deployment_id = id);
    let row = sqlx::query_as::<_, DeploymentRow>(
        r#"
        SELECT d.deploy_id, a.app_id, a.name, a.port, a.upload_path, a.deploy_path,
               a.backup_path, a.deploy_script, a.start_script
        FROM mnt_deploy d
        LEFT JOIN mnt_app a ON a.app_id = d.app_id
        WHERE d.deploy_id = $1
        LIMIT 1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch deployment, error: {:?}", err);
        DeployError::from(err)
    })?;

    let Some(row) = row else {
        return Ok(None);
    };

    let targets = fetch_targets(pool, row.deploy_id).await?;
    Ok(Some(models::Deployment::new(
        row.deploy_id,
        row.application()?,
        targets,
    )))
}

async fn fetch_targets(
    pool: &PgPool,
    deploy_id: i64,
) -> Result<Vec<models::DeployTarget>, DeployError> {
    let query_span = tracing::info_span!("Fetch deployment servers", deployment_id = deploy_id);
    sqlx::query_as::<_, TargetRow>(
        r#"
        SELECT s.ip, s.name
        FROM mnt_deploy_server ds
        INNER JOIN mnt_server s ON s.server_id = ds.server_id
        WHERE ds.deploy_id = $1
        ORDER BY s.server_id
        "#,
    )
    .bind(deploy_id)
    .fetch_all(pool)
    .instrument(query_span)
    .await
    .map(|rows| {
        rows.into_iter()
            .map(|row| models::DeployTarget {
                ip: row.ip,
                name: row.name,
            })
            .collect()
    })
    .map_err(|err| {
        tracing::error!("Failed to fetch deployment servers, error: {:?}", err);
        DeployError::from(err)
    })
}
