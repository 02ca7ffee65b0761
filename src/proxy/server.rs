//! HTTP server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use super::rate_limit::RateLimiter;
use super::{auth, handlers, rate_limit};
use crate::config::Config;
use crate::error::Result;
use crate::provider::OpenAiClient;

const ALLOWED_HEADERS: &str = "authorization, Content-Type";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub provider: Arc<OpenAiClient>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Build the provider client and rate limiter for `config`.
    pub fn new(config: Config) -> Result<Self> {
        let provider = OpenAiClient::new(&config.provider)?;
        let limiter = RateLimiter::new(&config.rate_limit);
        Ok(Self {
            config: Arc::new(config),
            provider: Arc::new(provider),
            limiter: Arc::new(limiter),
        })
    }
}

/// Relay routes, mounted both at the root and under `/api`.
fn relay_routes(state: &AppState) -> Router<AppState> {
    let chat = Router::new()
        .route("/chat-process", post(handlers::chat_process))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ));

    let privileged = Router::new()
        .merge(chat)
        .route("/models", post(handlers::models))
        .route("/list", get(handlers::list))
        .route("/model-detail", post(handlers::model_detail))
        .route("/create-model", post(handlers::create_model))
        .route("/cancel-model", post(handlers::cancel_model))
        .route("/delete-model", post(handlers::delete_model))
        .route("/config", post(handlers::config))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let public = Router::new()
        .route("/session", post(handlers::session))
        .route("/verify", post(handlers::verify))
        .route(
            "/prepare-data",
            post(handlers::prepare_data).layer(DefaultBodyLimit::disable()),
        );

    Router::new().merge(privileged).merge(public)
}

/// Permissive CORS: any origin, any method, and the two headers the front-end sends.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let relay = relay_routes(&state);
    let public_dir = ServeDir::new(&state.config.server.public_dir);

    Router::new()
        .merge(relay.clone())
        .nest("/api", relay)
        .fallback_service(public_dir)
        .with_state(state)
        .layer(cors_layer())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install shutdown handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let state = AppState::new(config)?;

    tracing::info!(
        auth = state.config.auth.is_enabled(),
        rate_limit = state.config.rate_limit.max_requests,
        window = %state.limiter.window_label(),
        model = %state.provider.default_model(),
        public_dir = %state.config.server.public_dir,
        "Relay configured"
    );

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting chatrelay server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
