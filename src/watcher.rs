use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::discovery::resolve_from_pod;
use crate::registry::AppRegistry;

/// Label selector identifying Spark driver pods.
const DRIVER_LABEL_SELECTOR: &str = "spark-role=driver";

/// Watches Spark driver pods and keeps the application registry in sync
/// with their lifecycle.
///
/// One watch task runs per configured namespace; an empty namespace list
/// watches the whole cluster. Each task re-lists on stream restart, so a
/// missed event is repaired on the next resync.
pub struct SparkAppWatcher {
    namespaces: Vec<String>,
    registry: Arc<AppRegistry>,
}

impl SparkAppWatcher {
    pub fn new(namespaces: Vec<String>, registry: Arc<AppRegistry>) -> Self {
        Self {
            namespaces,
            registry,
        }
    }

    /// Spawns one watch task per namespace. Tasks exit on the shutdown
    /// signal.
    pub fn spawn(self, client: Client, shutdown: &broadcast::Sender<()>) {
        let namespaces = if self.namespaces.is_empty() {
            vec![String::new()]
        } else {
            self.namespaces.clone()
        };

        for namespace in namespaces {
            let registry = self.registry.clone();
            let client = client.clone();
            let shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                watch_namespace(client, namespace, registry, shutdown).await;
            });
        }
    }
}

async fn watch_namespace(
    client: Client,
    namespace: String,
    registry: Arc<AppRegistry>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(
        "Running spark app watcher on namespace: {}",
        if namespace.is_empty() { "all" } else { &namespace }
    );

    let pods: Api<Pod> = if namespace.is_empty() {
        Api::all(client)
    } else {
        Api::namespaced(client, &namespace)
    };

    let config = watcher::Config::default().labels(DRIVER_LABEL_SELECTOR);
    let mut stream = watcher(pods, config).default_backoff().boxed();

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            event = stream.try_next() => match event {
                Ok(Some(watcher::Event::Applied(pod))) => on_pod_applied(&registry, &pod),
                Ok(Some(watcher::Event::Deleted(pod))) => on_pod_deleted(&registry, &pod),
                Ok(Some(watcher::Event::Restarted(pods))) => {
                    for pod in &pods {
                        on_pod_applied(&registry, pod);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    // The backoff wrapper already delayed the retry.
                    error!("Spark app watch error on namespace '{}': {}", namespace, err);
                }
            },
        }
    }

    info!("Received shutdown signal. Stopping spark app watcher...");
}

fn on_pod_applied(registry: &AppRegistry, pod: &Pod) {
    let Some(app_id) = spark_app_id(pod) else {
        return;
    };

    let app = resolve_from_pod(pod, &app_id);
    info!(
        "Spark app updated: {}/{} ({:?}) -> {}",
        app.namespace, app.app_id, app.status, app.base_url
    );
    registry.upsert(app);
}

fn on_pod_deleted(registry: &AppRegistry, pod: &Pod) {
    let pod_name = pod.metadata.name.clone().unwrap_or_default();
    match registry.delete_by_pod_name(&pod_name) {
        Some(app) => info!(
            "Removed spark app '{}' on namespace '{}' (appID: {})",
            pod_name, app.namespace, app.app_id
        ),
        None => warn!("No spark app found for deleted pod '{}'", pod_name),
    }
}

/// Extracts the Spark application id from the driver container environment.
/// Pods without `SPARK_APPLICATION_ID` are not Spark drivers we can route
/// to and are ignored.
pub fn spark_app_id(pod: &Pod) -> Option<String> {
    let spec = pod.spec.as_ref()?;
    for container in &spec.containers {
        for env_var in container.env.as_deref().unwrap_or_default() {
            if env_var.name == "SPARK_APPLICATION_ID" {
                return env_var.value.clone().filter(|value| !value.is_empty());
            }
        }
    }
    None
}

/// Returns the Spark UI port exposed by the pod: the first container port
/// whose name contains "ui" (case-insensitive), falling back to 4040.
pub fn spark_ui_port(pod: &Pod) -> i32 {
    if let Some(spec) = pod.spec.as_ref() {
        for container in &spec.containers {
            for port in container.ports.as_deref().unwrap_or_default() {
                if let Some(name) = &port.name {
                    if name.to_ascii_lowercase().contains("ui") {
                        return port.container_port;
                    }
                }
            }
        }
    }
    4040
}

/// Returns the pod start time as epoch milliseconds, or -1 when it is not
/// available yet.
pub fn pod_start_time_epoch(pod: &Pod) -> i64 {
    pod.status
        .as_ref()
        .and_then(|status| status.start_time.as_ref())
        .map(|time| time.0.timestamp_millis())
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn driver_pod(app_id: Option<&str>, ui_port: Option<(&str, i32)>) -> Pod {
        let env = app_id.map(|id| {
            vec![EnvVar {
                name: "SPARK_APPLICATION_ID".to_string(),
                value: Some(id.to_string()),
                ..Default::default()
            }]
        });
        let ports = ui_port.map(|(name, port)| {
            vec![ContainerPort {
                name: Some(name.to_string()),
                container_port: port,
                ..Default::default()
            }]
        });

        Pod {
            metadata: ObjectMeta {
                name: Some("spark-pi-driver".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "spark-kubernetes-driver".to_string(),
                    env,
                    ports,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                pod_ip: Some("10.0.0.5".to_string()),
                start_time: Some(Time(
                    chrono::TimeZone::timestamp_millis_opt(&chrono::Utc, 1767710303938)
                        .single()
                        .unwrap(),
                )),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_spark_app_id_from_driver_env() {
        let pod = driver_pod(Some("spark-abc"), None);
        assert_eq!(spark_app_id(&pod), Some("spark-abc".to_string()));

        let no_env = driver_pod(None, None);
        assert_eq!(spark_app_id(&no_env), None);
    }

    #[test]
    fn test_spark_ui_port_matches_name_case_insensitively() {
        let pod = driver_pod(Some("spark-abc"), Some(("spark-UI", 4045)));
        assert_eq!(spark_ui_port(&pod), 4045);

        let unnamed = driver_pod(Some("spark-abc"), Some(("driver-rpc", 7078)));
        assert_eq!(spark_ui_port(&unnamed), 4040);

        let no_ports = driver_pod(Some("spark-abc"), None);
        assert_eq!(spark_ui_port(&no_ports), 4040);
    }

    #[test]
    fn test_pod_start_time_epoch() {
        let pod = driver_pod(Some("spark-abc"), None);
        assert_eq!(pod_start_time_epoch(&pod), 1767710303938);

        let mut no_start = pod.clone();
        no_start.status.as_mut().unwrap().start_time = None;
        assert_eq!(pod_start_time_epoch(&no_start), -1);
    }

    #[test]
    fn test_pod_applied_and_deleted_round_trip() {
        let registry = AppRegistry::new();
        let pod = driver_pod(Some("spark-abc"), Some(("ui", 4040)));

        on_pod_applied(&registry, &pod);
        let app = registry.get("spark-abc").unwrap();
        assert_eq!(app.base_url, "http://10.0.0.5:4040");
        assert_eq!(app.pod_name, "spark-pi-driver");
        assert!(app.is_running());

        on_pod_deleted(&registry, &pod);
        assert!(registry.get("spark-abc").is_none());
    }

    #[test]
    fn test_pod_without_app_id_is_ignored() {
        let registry = AppRegistry::new();
        let pod = driver_pod(None, Some(("ui", 4040)));

        on_pod_applied(&registry, &pod);
        assert!(registry.is_empty());
    }
}
