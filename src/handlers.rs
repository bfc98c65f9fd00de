use axum::extract::{Path, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::api::AppState;
use crate::discovery;
use crate::history::SparkRestClient;
use crate::proxy::{found_redirect, SparkReverseProxy};
use crate::utils;

/// Base path of the Spark History UI surface.
pub const SPARK_HISTORY_BASE: &str = "/history";

/// Context header consumed by Spark UIs to build absolute links when served
/// behind a path-rewriting proxy.
pub const X_FORWARDED_CONTEXT: HeaderName = HeaderName::from_static("x-forwarded-context");

/// Live-application surface: `{ui-base}/{app_id}/{*path}`.
///
/// Completed applications redirect to Spark History; running ones are
/// proxied to the driver UI with the Spark UI error handler, so a dead
/// driver demotes the record and retries land on history.
pub async fn handle_live_app(
    State(state): State<AppState>,
    Path((app_id, path)): Path<(String, String)>,
    mut request: Request,
) -> Response {
    let app = match state.registry.get(&app_id) {
        // Started in cluster or client mode and already completed.
        Some(app) if app.is_completed() => {
            return redirect_to_spark_history(&state, &request, &app_id);
        }
        Some(app) => app,
        None => {
            debug!(
                "The application '{}' was not found locally, checking in spark history ...",
                app_id
            );
            let resolved = discovery::resolve_from_history(
                &state.registry,
                request.method(),
                request.headers(),
                &state.history_base_url,
                &app_id,
            )
            .await;
            if resolved.is_completed() {
                return redirect_to_spark_history(&state, &request, &app_id);
            }
            resolved
        }
    };

    let spark_ui = format!("{}/{}", app.base_url, path);
    let upstream: Uri = match spark_ui.parse() {
        Ok(upstream) => upstream,
        Err(_) => {
            error!(
                "Invalid spark ui URL '{}' for the application '{}', redirect to spark history",
                spark_ui, app_id
            );
            state.registry.mark_completed(&app_id);
            return redirect_to_spark_history(&state, &request, &app_id);
        }
    };

    if state.ui_proxy_base != "/proxy" {
        let spark_ui_root = format!("{}/{}", state.ui_proxy_base, app_id);
        if let Ok(value) = HeaderValue::from_str(&spark_ui_root) {
            request.headers_mut().append(X_FORWARDED_CONTEXT, value);
        }
    }

    let from_path = request.uri().path().to_string();
    SparkReverseProxy::new(upstream, &app_id, state.registry.clone())
        .with_spark_ui_error_handler(&from_path)
        .serve(&state.client, request)
        .await
}

/// History surface: `/history/{app_id}/{*path}`.
///
/// Running applications redirect back to the live UI surface; everything
/// else is proxied to the Spark History Server.
pub async fn handle_history_app(
    State(state): State<AppState>,
    Path((app_id, path)): Path<(String, String)>,
    request: Request,
) -> Response {
    match state.registry.get(&app_id) {
        // Started in cluster mode and still running.
        Some(app) if app.is_running() => {
            return redirect_to_spark_ui(&state, &request, &app_id);
        }
        Some(_) => {}
        None => {
            debug!(
                "The application '{}' was not found locally, checking in spark history ...",
                app_id
            );
            let resolved = discovery::resolve_from_history(
                &state.registry,
                request.method(),
                request.headers(),
                &state.history_base_url,
                &app_id,
            )
            .await;
            if resolved.is_running() {
                return redirect_to_spark_ui(&state, &request, &app_id);
            }
        }
    }

    debug!(
        "The application '{}' is completed, forward to spark history: {}",
        app_id, state.history_base_url
    );

    let upstream_url = format!(
        "{}{}/{}/{}",
        state.history_base_url, SPARK_HISTORY_BASE, app_id, path
    );
    let upstream: Uri = match upstream_url.parse() {
        Ok(upstream) => upstream,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid upstream URL: {upstream_url}") })),
            )
                .into_response();
        }
    };

    SparkReverseProxy::new(upstream, &app_id, state.registry.clone())
        .serve(&state.client, request)
        .await
}

/// Default surface: proxies the inbound path to the Spark History Server
/// unchanged. The incomplete-applications page (`showIncomplete=true`) goes
/// through the HTML rewriter so live-only applications become visible.
pub async fn handle_default(State(state): State<AppState>, request: Request) -> Response {
    let path = request.uri().path();
    let upstream_url = format!("{}{}", state.history_base_url, path);
    let upstream: Uri = match upstream_url.parse() {
        Ok(upstream) => upstream,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid upstream URL: {upstream_url}") })),
            )
                .into_response();
        }
    };

    let mut proxy = SparkReverseProxy::new(upstream, "", state.registry.clone());
    if query_param(request.uri(), "showIncomplete") == Some("true".to_string()) {
        proxy = proxy.with_incomplete_apps_rewriter();
    }

    proxy.serve(&state.client, request).await
}

/// `/api/v1/applications`: the merged endpoint serves the incomplete view
/// (`status=running`, the query Spark's history page sends); every other
/// query is a plain History proxy.
pub async fn handle_applications(state: State<AppState>, request: Request) -> Response {
    if query_param(request.uri(), "status") == Some("running".to_string()) {
        return handle_incomplete_applications(state, request).await;
    }
    handle_default(state, request).await
}

/// Returns a unified list of Spark applications currently running or
/// already present in Spark History.
///
/// Running pods can precede their event logs by minutes (delayed uploads),
/// leaving the history list blind to them. This endpoint closes the gap:
///
/// 1. fetch the applications known to the Spark History Server,
/// 2. snapshot the running applications from the registry,
/// 3. ask each running application's own UI for its live summary,
/// 4. merge both lists, de-duplicated by app id.
///
/// When an application exists on both sides the History representation is
/// preferred. The response is schema-identical to the History Server list
/// endpoint, so the Spark UI consumes it unchanged.
pub async fn handle_incomplete_applications(
    State(state): State<AppState>,
    request: Request,
) -> Response {
    let history_client = match SparkRestClient::new(
        request.method(),
        request.headers(),
        request.uri().query(),
        &state.history_base_url,
    ) {
        Ok(client) => client,
        Err(err) => {
            error!("Unable to create new spark history client: {:#}", err);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": format!(
                        "Unable to create new spark history client from upstream URL: {}",
                        state.history_base_url
                    )
                })),
            )
                .into_response();
        }
    };

    let history_apps = match history_client.get_applications().await {
        Ok(apps) => apps,
        Err(err) => {
            error!(
                "Failed to list spark applications in spark history from upstream URL {}: {:#}",
                state.history_base_url, err
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": format!(
                        "Failed to list spark applications from upstream URL: {}",
                        state.history_base_url
                    )
                })),
            )
                .into_response();
        }
    };

    let running_apps = state.registry.list_running();
    let mut live_apps = Vec::with_capacity(running_apps.len());
    for running in running_apps {
        let client = match SparkRestClient::new(
            request.method(),
            request.headers(),
            request.uri().query(),
            &running.base_url,
        ) {
            Ok(client) => client,
            Err(err) => {
                warn!("Unable to create new spark app client: {:#}", err);
                continue;
            }
        };

        match client.get_application_info(&running.app_id).await {
            Ok(app) => live_apps.push(app),
            Err(err) => {
                // The UI may still be initializing; skip it this round.
                warn!(
                    "Unable to fetch application info for {}: {:#}",
                    running.app_id, err
                );
            }
        }
    }

    let merged = utils::merge_by_key(history_apps, live_apps, |app| app.id.as_str());
    Json(merged).into_response()
}

/// Flips the request from the live surface to the history surface by path
/// substitution and answers a host-relative 302.
fn redirect_to_spark_history(state: &AppState, request: &Request, app_id: &str) -> Response {
    let path = request
        .uri()
        .path()
        .replace(&state.ui_proxy_base, SPARK_HISTORY_BASE);
    let location = with_query(&path, request.uri().query());
    debug!(
        "The application '{}' was completed, redirect to spark history '{}'",
        app_id, location
    );
    found_redirect(&location)
}

/// Sends the client to the live UI surface of a running application.
fn redirect_to_spark_ui(state: &AppState, request: &Request, app_id: &str) -> Response {
    let path = format!("{}/{}/jobs/", state.ui_proxy_base, app_id);
    let location = with_query(&path, request.uri().query());
    debug!(
        "The application '{}' is running, redirect to spark ui '{}'",
        app_id, location
    );
    found_redirect(&location)
}

fn with_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    }
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
