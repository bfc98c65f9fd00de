use axum::http::{HeaderMap, Method};
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, error};

use crate::history::SparkRestClient;
use crate::models::{AppInstance, AppStatus};
use crate::registry::AppRegistry;
use crate::watcher::{pod_start_time_epoch, spark_ui_port};

/// Builds an application record from a Kubernetes driver pod.
pub fn resolve_from_pod(pod: &Pod, app_id: &str) -> AppInstance {
    let pod_ip = pod
        .status
        .as_ref()
        .and_then(|status| status.pod_ip.clone())
        .unwrap_or_default();

    AppInstance {
        base_url: format!("http://{}:{}", pod_ip, spark_ui_port(pod)),
        pod_name: pod.metadata.name.clone().unwrap_or_default(),
        app_id: app_id.to_string(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        status: AppStatus::from_pod_phase(
            pod.status.as_ref().and_then(|status| status.phase.as_deref()),
        ),
        start_time_epoch: pod_start_time_epoch(pod),
    }
}

/// Resolves a Spark application through the Spark History Server REST API.
///
/// Used when an application is not present in the registry: either it runs
/// in client mode (no driver pod watched here), or the proxy restarted and
/// lost its in-memory view. The returned record is synthesized from the
/// application's environment properties.
///
/// A record for a *running* application is returned but not stored: the pod
/// watcher owns `Running` registry entries, and a REST-derived record must
/// not shadow its view. Non-running applications are stored with the
/// `Unknown` status so subsequent requests route to history directly.
pub async fn resolve_from_history(
    registry: &AppRegistry,
    method: &Method,
    headers: &HeaderMap,
    history_base_url: &str,
    app_id: &str,
) -> AppInstance {
    let client = match SparkRestClient::new(method, headers, None, history_base_url) {
        Ok(client) => client,
        Err(err) => {
            error!("Unable to create new spark history client: {:#}", err);
            return AppInstance::unknown(app_id);
        }
    };

    let app_info = match client.get_application_info(app_id).await {
        Ok(info) => info,
        Err(err) => {
            error!(
                "Unable to get spark application '{}' status from spark history: {:#}",
                app_id, err
            );
            return AppInstance::unknown(app_id);
        }
    };

    let environment = match client.get_environment(app_id).await {
        Ok(environment) => environment,
        Err(err) => {
            error!(
                "Failed to get the application '{}' environment properties from spark history: {:#}",
                app_id, err
            );
            return AppInstance::unknown(app_id);
        }
    };

    // The "_" placeholder keeps the synthesized URL well-formed enough to
    // fail loudly downstream when a property is missing.
    let driver_host = environment.get_property("spark.driver.host").unwrap_or("_");
    let ui_port = environment.get_property("spark.ui.port").unwrap_or("_");
    let resolved_app_id = environment.get_property("spark.app.id").unwrap_or("_");
    let app_name = environment.get_property("spark.app.name").unwrap_or("_");
    let namespace = environment
        .get_property("spark.kubernetes.namespace")
        .unwrap_or("_");

    let mut app = AppInstance {
        base_url: format!("http://{driver_host}:{ui_port}"),
        pod_name: app_name.to_string(),
        app_id: resolved_app_id.to_string(),
        namespace: namespace.to_string(),
        status: AppStatus::Unknown,
        start_time_epoch: -1,
    };

    if app_info.is_running() {
        app.status = AppStatus::Running;
        debug!(
            "The application '{}' is running per spark history, serving from {}",
            app_id, app.base_url
        );
    } else {
        registry.upsert(app.clone());
    }

    app
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SparkApp, SparkAppAttempt, SparkAppEnvironment};
    use axum::routing::get;
    use axum::{Json, Router};

    async fn serve_history(app_running: bool) -> String {
        let attempt = SparkAppAttempt {
            completed: !app_running,
            duration: if app_running { 0 } else { 97164 },
            end_time_epoch: if app_running { -1 } else { 1767710401102 },
            ..Default::default()
        };
        let info = SparkApp {
            id: "spark-env".to_string(),
            name: "EnvApp".to_string(),
            attempts: vec![attempt],
        };
        let environment = SparkAppEnvironment {
            spark_properties: vec![
                ("spark.driver.host".to_string(), "10.0.0.9".to_string()),
                ("spark.ui.port".to_string(), "4041".to_string()),
                ("spark.app.id".to_string(), "spark-env".to_string()),
                ("spark.app.name".to_string(), "EnvApp".to_string()),
                ("spark.kubernetes.namespace".to_string(), "batch".to_string()),
            ],
        };

        let router = Router::new()
            .route(
                "/api/v1/applications/{app_id}",
                get(move || {
                    let info = info.clone();
                    async move { Json(info) }
                }),
            )
            .route(
                "/api/v1/applications/{app_id}/environment",
                get(move || {
                    let environment = environment.clone();
                    async move { Json(environment) }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_running_app_is_returned_but_not_stored() {
        let registry = AppRegistry::new();
        let base = serve_history(true).await;

        let app = resolve_from_history(
            &registry,
            &Method::GET,
            &HeaderMap::new(),
            &base,
            "spark-env",
        )
        .await;

        assert_eq!(app.status, AppStatus::Running);
        assert_eq!(app.base_url, "http://10.0.0.9:4041");
        assert_eq!(app.namespace, "batch");
        assert!(registry.get("spark-env").is_none());
    }

    #[tokio::test]
    async fn test_completed_app_is_stored_as_unknown() {
        let registry = AppRegistry::new();
        let base = serve_history(false).await;

        let app = resolve_from_history(
            &registry,
            &Method::GET,
            &HeaderMap::new(),
            &base,
            "spark-env",
        )
        .await;

        assert_eq!(app.status, AppStatus::Unknown);
        let stored = registry.get("spark-env").unwrap();
        assert_eq!(stored.status, AppStatus::Unknown);
        assert_eq!(stored.base_url, "http://10.0.0.9:4041");
    }

    #[tokio::test]
    async fn test_lookup_failure_yields_unknown_stub() {
        let registry = AppRegistry::new();

        // Nothing listens on this port.
        let app = resolve_from_history(
            &registry,
            &Method::GET,
            &HeaderMap::new(),
            "http://127.0.0.1:1",
            "spark-gone",
        )
        .await;

        assert_eq!(app.status, AppStatus::Unknown);
        assert_eq!(app.app_id, "spark-gone");
        assert!(registry.get("spark-gone").is_none());
    }
}
