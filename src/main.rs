use anyhow::Context;
use rollout::configuration::{get_configuration, DatabaseSettings, Settings};
use rollout::db::{DeploymentRepository, HistoryStore, Inventory, MemoryStore, PgRecordStore};
use rollout::helpers::SshConnector;
use rollout::services::{BroadcastHub, DeploymentOrchestrator};
use rollout::startup::run;
use rollout::telemetry::{get_subscriber, init_subscriber};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

type Stores = (Arc<dyn DeploymentRepository>, Arc<dyn HistoryStore>);

async fn postgres_store(database: &DatabaseSettings) -> anyhow::Result<Stores> {
    tracing::info!(
        db_host = %database.host,
        db_port = database.port,
        db_name = %database.database_name,
        "Connecting to PostgreSQL"
    );

    let connect_options = PgConnectOptions::new()
        .host(&database.host)
        .port(database.port)
        .username(&database.username)
        .password(&database.password)
        .database(&database.database_name)
        .ssl_mode(PgSslMode::Disable);

    let pg_pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(connect_options)
        .await
        .context("Failed to connect to database.")?;

    let store = Arc::new(PgRecordStore::new(pg_pool));
    store.migrate().await?;
    let records: Arc<dyn DeploymentRepository> = store.clone();
    let history: Arc<dyn HistoryStore> = store;
    Ok((records, history))
}

fn inventory_store(path: &str) -> anyhow::Result<Stores> {
    tracing::info!(inventory = path, "Loading inventory");
    let store = Arc::new(MemoryStore::from_inventory(Inventory::load(Path::new(path))?));
    let records: Arc<dyn DeploymentRepository> = store.clone();
    let history: Arc<dyn HistoryStore> = store;
    Ok((records, history))
}

async fn record_stores(settings: &Settings) -> anyhow::Result<Stores> {
    match (&settings.database, &settings.inventory_path) {
        (Some(database), _) => postgres_store(database).await,
        (None, Some(path)) => inventory_store(path),
        (None, None) => anyhow::bail!("Either `database` or `inventory_path` must be configured"),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = get_subscriber("rollout".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber)?;

    let settings = get_configuration().context("Failed to read configuration.")?;
    let (records, history) = record_stores(&settings).await?;

    let hub = Arc::new(BroadcastHub::new(settings.deploy.notification_capacity));
    let connector = Arc::new(SshConnector::new(
        settings.deploy.connect_timeout(),
        settings.deploy.command_timeout(),
    ));
    let orchestrator = Arc::new(DeploymentOrchestrator::new(
        records,
        history,
        connector,
        hub.clone(),
        settings.deploy.orchestrator_config(),
    ));

    let address = format!("{}:{}", settings.app_host, settings.app_port);
    tracing::info!("Start server at {:?}", &address);
    let listener =
        TcpListener::bind(&address).with_context(|| format!("failed to bind to {}", address))?;

    run(listener, orchestrator, hub).await?.await?;
    Ok(())
}
