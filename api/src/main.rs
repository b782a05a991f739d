use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod error;
mod extract;
mod ingest;
mod middleware;
mod repository;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Biosync API",
        version = "0.1.0",
        description = "Webhook ingestion for health-export payloads and aggregator events."
    ),
    paths(
        routes::health::health_check,
        routes::webhooks::receive_health_export,
        routes::webhooks::receive_vital_event,
    ),
    components(schemas(
        HealthResponse,
        biosync_core::error::ApiError,
        biosync_core::records::IngestCounts,
        biosync_core::records::IngestSummary,
        routes::webhooks::ProviderEventResponse,
        ingest::ProviderAction,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// `reachable` or `unreachable`
    pub database: String,
    /// Whether a signing secret is configured for the aggregator webhook
    pub signed_events: bool,
    /// Zone applied to provider timestamps without an offset
    pub default_tz: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "biosync_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let config = state::IngestConfig::from_env();
    if config.vital_webhook_secret.is_none() {
        tracing::warn!("BIOSYNC_VITAL_WEBHOOK_SECRET is unset; signed provider events will be rejected");
    }

    let repo = Arc::new(repository::PgIngestRepository::new(pool.clone()));
    let ingestor = ingest::Ingestor::new(repo.clone(), repo, &config);

    let app_state = state::AppState {
        db: pool,
        config: Arc::new(config),
        ingestor,
    };

    // HTTPS enforcement (only when BIOSYNC_REQUIRE_HTTPS=true)
    let require_https = std::env::var("BIOSYNC_REQUIRE_HTTPS")
        .map(|v| v == "true")
        .unwrap_or(false);

    let cors_layer = middleware::cors::build_cors_layer();

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router().layer(middleware::rate_limit::health_layer()))
        .merge(
            routes::webhooks::health_export_router()
                .layer(middleware::rate_limit::health_export_layer()),
        )
        .merge(routes::webhooks::vital_router().layer(middleware::rate_limit::vital_layer()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .option_layer(require_https.then(|| {
                    axum::middleware::from_fn(middleware::https::require_https)
                }))
                .layer(cors_layer),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Biosync API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
