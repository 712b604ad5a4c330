use sqlx::PgPool;
use tracing::Instrument;

use crate::errors::DeployError;
use crate::models;

#[derive(Debug, sqlx::FromRow)]
struct ServerRow {
    ip: String,
    name: String,
    account: String,
    password: String,
    port: i32,
}

impl TryFrom<ServerRow> for models::TargetServer {
    type Error = DeployError;

    fn try_from(row: ServerRow) -> Result<Self, Self::Error> {
        let port = u16::try_from(row.port).map_err(|_| {
            DeployError::configuration(format!("server {} has invalid ssh port {}", row.ip, row.port))
        })?;
        Ok(Self {
            ip: row.ip,
            name: row.name,
            account: row.account,
            password: row.password,
            port,
        })
    }
}

pub async fn fetch_by_ip(
    pool: &PgPool,
    ip: &str,
) -> Result<Option<models::TargetServer>, DeployError> {
    let query_span = tracing::info_span!("Fetch server by ip", ip);
    sqlx::query_as::<_, ServerRow>(
        r#"
        SELECT ip, name, account, password, port
        FROM mnt_server
        WHERE ip = $1
        LIMIT 1
        "#,
    )
    .bind(ip)
    .fetch_optional(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch server, error: {:?}", err);
        DeployError::from(err)
    })?
    .map(models::TargetServer::try_from)
    .transpose()
}
