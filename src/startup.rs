use crate::routes;
use crate::services::{BroadcastHub, DeploymentOrchestrator};
use actix_web::{dev::Server, error, http, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

/// Registers every route. Shared by the server and the route tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/health_check").service(routes::health_check))
        .service(
            web::scope("/api/deployments")
                .service(routes::deployment::deploy_handler)
                .service(routes::deployment::start_handler)
                .service(routes::deployment::stop_handler)
                .service(routes::deployment::status_handler),
        )
        .service(web::scope("/api/history").service(routes::deployment::rollback_handler))
        .service(web::scope("/ws").service(routes::notifications::subscribe_handler));
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let msg = serde_json::json!({
            "error": "Invalid request body",
            "details": err.to_string(),
        });
        error::InternalError::from_response(
            "invalid json",
            actix_web::HttpResponse::build(http::StatusCode::BAD_REQUEST).json(msg),
        )
        .into()
    })
}

pub async fn run(
    listener: TcpListener,
    orchestrator: Arc<DeploymentOrchestrator>,
    hub: Arc<BroadcastHub>,
) -> Result<Server, std::io::Error> {
    let orchestrator = web::Data::from(orchestrator);
    let hub = web::Data::new(hub);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(json_config())
            .app_data(orchestrator.clone())
            .app_data(hub.clone())
            .configure(configure)
    })
    .listen(listener)?
    .run();

    Ok(server)
}
