use serde::{Deserialize, Serialize};

/// Lifecycle status of a Spark application, mirroring the driver pod phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AppStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl AppStatus {
    /// Maps a Kubernetes pod phase string to an application status.
    /// Unrecognized or missing phases map to `Unknown`.
    pub fn from_pod_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => AppStatus::Pending,
            Some("Running") => AppStatus::Running,
            Some("Succeeded") => AppStatus::Succeeded,
            Some("Failed") => AppStatus::Failed,
            _ => AppStatus::Unknown,
        }
    }
}

/// A running or completed Spark application discovered either from a
/// Kubernetes driver pod or from the Spark History Server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInstance {
    /// Base URL of the application UI (scheme + host + port).
    pub base_url: String,
    pub pod_name: String,
    pub app_id: String,
    pub namespace: String,
    pub status: AppStatus,
    /// Pod start time in epoch milliseconds, -1 when not available.
    pub start_time_epoch: i64,
}

impl AppInstance {
    /// Creates a stub record carrying only an app id and the `Unknown` status.
    pub fn unknown(app_id: &str) -> Self {
        Self {
            base_url: String::new(),
            pod_name: String::new(),
            app_id: app_id.to_string(),
            namespace: String::new(),
            status: AppStatus::Unknown,
            start_time_epoch: -1,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == AppStatus::Running
    }

    pub fn is_completed(&self) -> bool {
        !self.is_running()
    }
}

/// A Spark application as reported by the applications REST endpoint.
///
/// The field set matches the History Server JSON schema so responses built
/// from these values are indistinguishable from the upstream's own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SparkApp {
    pub id: String,
    pub name: String,
    pub attempts: Vec<SparkAppAttempt>,
}

/// A single attempt of a Spark application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SparkAppAttempt {
    pub start_time: String,
    pub end_time: String,
    pub last_updated: String,
    pub duration: i64,
    pub spark_user: String,
    pub completed: bool,
    pub app_spark_version: String,
    pub start_time_epoch: i64,
    pub end_time_epoch: i64,
    pub last_updated_epoch: i64,
}

impl SparkApp {
    /// Reports whether the application is still running according to the
    /// REST representation: true when at least one attempt is not completed,
    /// has a zero duration, or carries an end time of -1.
    pub fn is_running(&self) -> bool {
        self.attempts
            .iter()
            .any(|attempt| !attempt.completed || attempt.duration == 0 || attempt.end_time_epoch == -1)
    }
}

/// The `sparkProperties` section of the environment REST endpoint
/// (`/applications/{app-id}/environment`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SparkAppEnvironment {
    pub spark_properties: Vec<(String, String)>,
}

impl SparkAppEnvironment {
    /// Returns the value of the first property with the given name.
    pub fn get_property(&self, name: &str) -> Option<&str> {
        self.spark_properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}
