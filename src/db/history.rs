use chrono::NaiveDateTime;
use sqlx::PgPool;
use tracing::Instrument;

use crate::errors::DeployError;
use crate::models;

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    history_id: i64,
    app_name: String,
    deploy_user: String,
    ip: String,
    deploy_id: i64,
    deploy_date: NaiveDateTime,
}

impl From<HistoryRow> for models::DeploymentHistory {
    fn from(row: HistoryRow) -> Self {
        Self {
            id: row.history_id,
            app_name: row.app_name,
            deploy_user: row.deploy_user,
            ip: row.ip,
            deployment_id: row.deploy_id,
            deployed_at: row.deploy_date,
        }
    }
}

pub async fn fetch(
    pool: &PgPool,
    id: i64,
) -> Result<Option<models::DeploymentHistory>, DeployError> {
    tracing::info!("Fetch deployment history {}", id);
    sqlx::query_as::<_, HistoryRow>(
        r#"
        SELECT history_id, app_name, deploy_user, ip, deploy_id, deploy_date
        FROM mnt_deploy_history
        WHERE history_id = $1
        LIMIT 1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map(|row| row.map(Into::into))
    .map_err(|err| {
        tracing::error!("Failed to fetch deployment history, error: {:?}", err);
        DeployError::from(err)
    })
}

pub async fn insert(
    pool: &PgPool,
    mut record: models::DeploymentHistory,
) -> Result<models::DeploymentHistory, DeployError> {
    let query_span = tracing::info_span!("Saving deployment history into the database");
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO mnt_deploy_history (app_name, deploy_user, ip, deploy_id, deploy_date)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING history_id;
        "#,
    )
    .bind(&record.app_name)
    .bind(&record.deploy_user)
    .bind(&record.ip)
    .bind(record.deployment_id)
    .bind(record.deployed_at)
    .fetch_one(pool)
    .instrument(query_span)
    .await
    .map(move |id| {
        record.id = id;
        record
    })
    .map_err(|err| {
        tracing::error!("Failed to execute query: {:?}", err);
        DeployError::from(err)
    })
}
