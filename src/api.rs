use anyhow::Result;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{any, get};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{CorsConfig, Settings};
use crate::handlers;
use crate::proxy::{build_proxy_client, ProxyClient};
use crate::registry::AppRegistry;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<AppRegistry>,
    pub client: ProxyClient,
    /// Validated Spark History Server base URL (scheme + host + port).
    pub history_base_url: String,
    /// Path prefix live application UIs are served under.
    pub ui_proxy_base: String,
}

impl AppState {
    pub fn new(settings: Settings, registry: Arc<AppRegistry>) -> Result<Self> {
        let history_base_url = settings.history_base_url()?;
        let ui_proxy_base = settings.ui_proxy_base();
        Ok(Self {
            settings: Arc::new(settings),
            registry,
            client: build_proxy_client(),
            history_base_url,
            ui_proxy_base,
        })
    }
}

/// Create the proxy router.
pub fn create_app(state: AppState) -> Router {
    info!(
        "Spark History K8S Service URL: {}, Spark UI Proxy base: {}",
        state.history_base_url, state.ui_proxy_base
    );

    let live_route = format!("{}/{{app_id}}/{{*path}}", state.ui_proxy_base);
    let cors = cors_layer(&state.settings.security.cors);

    Router::new()
        // Live Spark UIs
        .route(&live_route, any(handlers::handle_live_app))
        // Spark History surfaces
        .route("/history/{app_id}/{*path}", any(handlers::handle_history_app))
        .route("/api/v1/applications", any(handlers::handle_applications))
        .route("/api/v1/applications/{*path}", any(handlers::handle_default))
        .route("/static/{*path}", any(handlers::handle_default))
        .route("/history/", any(handlers::handle_default))
        .route("/home/", any(handlers::handle_default))
        .route("/jobs/", any(handlers::handle_default))
        .route("/", any(handlers::handle_default))
        // Probes
        .route("/healthz", get(healthz))
        .route("/readiness", get(readiness))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), security_headers))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe.
async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe.
async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// Injects the statically configured security response headers.
async fn security_headers(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    for (name, value) in &state.settings.security.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

/// Builds the CORS layer from the `security.cors` settings. A `*` entry
/// selects the wildcard for its dimension.
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut cors = CorsLayer::new().max_age(Duration::from_secs(config.max_age));

    cors = if config.allowed_origins.iter().any(|origin| origin == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors.allow_origin(origins)
    };

    cors = if config.allowed_methods.iter().any(|method| method == "*") {
        cors.allow_methods(Any)
    } else {
        let methods: Vec<Method> = config
            .allowed_methods
            .iter()
            .filter_map(|method| method.parse().ok())
            .collect();
        cors.allow_methods(methods)
    };

    cors = if config.allowed_headers.iter().any(|header| header == "*") {
        cors.allow_headers(Any)
    } else {
        let headers: Vec<HeaderName> = config
            .allowed_headers
            .iter()
            .filter_map(|header| header.parse().ok())
            .collect();
        cors.allow_headers(headers)
    };

    let exposed: Vec<HeaderName> = config
        .exposed_headers
        .iter()
        .filter(|header| header.as_str() != "*")
        .filter_map(|header| header.parse().ok())
        .collect();
    if !exposed.is_empty() {
        cors = cors.expose_headers(exposed);
    }

    if config.allow_credentials {
        cors = cors.allow_credentials(true);
    }

    cors
}
