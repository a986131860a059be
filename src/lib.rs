pub mod config;
pub mod engine;
mod http_utils;
pub mod introspection;
pub mod listeners;
mod logger;
pub mod pipeline;
pub mod shared_state;

use std::sync::Arc;

use ntex::web::{self, HttpRequest};
use tracing::info;

use crate::{
    config::GatewayConfig,
    engine::GraphQLEngine,
    http_utils::probes::health_check_handler,
    introspection::INTROSPECTION_PATH_SUFFIX,
    listeners::RequestListener,
    logger::configure_logging,
    pipeline::graphql_request_handler,
    shared_state::GatewaySharedState,
};

// embedders implement the engine and listener traits against these
pub use ntex;
pub use sonic_rs;

async fn graphql_endpoint_handler(
    request: HttpRequest,
    payload: web::types::Payload,
    state: web::types::State<Arc<GatewaySharedState>>,
) -> web::HttpResponse {
    graphql_request_handler(&request, payload, state.get_ref()).await
}

/// Registers the GraphQL route, the introspection route and the health probe.
pub fn configure_app(service_config: &mut web::ServiceConfig, state: &Arc<GatewaySharedState>) {
    let graphql_path = state.config.http.path.clone();
    let introspection_path = format!("{}{}", graphql_path, INTROSPECTION_PATH_SUFFIX);

    service_config
        .route(&introspection_path, web::to(graphql_endpoint_handler))
        .route(&graphql_path, web::to(graphql_endpoint_handler))
        .route("/health", web::to(health_check_handler));
}

/// Starts the gateway with the given engine and listeners. Blocks until the
/// server stops.
pub async fn serve(
    config: GatewayConfig,
    engine: Arc<dyn GraphQLEngine>,
    listeners: Vec<Arc<dyn RequestListener>>,
) -> Result<(), Box<dyn std::error::Error>> {
    configure_logging(&config.log);

    let addr = config.http.address();
    let state = GatewaySharedState::new(config, engine, listeners);

    info!("graphql-http-gateway listening on {}", addr);

    web::HttpServer::new(move || {
        let state = state.clone();
        async move {
            web::App::new()
                .state(state.clone())
                .configure(move |service_config| configure_app(service_config, &state))
        }
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
