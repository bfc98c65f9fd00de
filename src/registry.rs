use dashmap::DashMap;
use tracing::debug;

use crate::models::{AppInstance, AppStatus};

/// Concurrent registry of known Spark applications, keyed by app id.
///
/// The registry is the only state shared between the pod watcher tasks and
/// the request handlers. Every operation is atomic per key; cross-key
/// snapshots (`list_running`) are best-effort.
#[derive(Debug, Default)]
pub struct AppRegistry {
    instances: DashMap<String, AppInstance>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new application or overwrites the existing record with the
    /// same app id.
    pub fn upsert(&self, app: AppInstance) {
        self.instances.insert(app.app_id.clone(), app);
    }

    /// Transitions an application to the `Unknown` status, inserting a stub
    /// record when the app id is not present. Proxied requests for an
    /// `Unknown` application fall through to Spark History on retry.
    pub fn mark_completed(&self, app_id: &str) {
        match self.instances.get_mut(app_id) {
            Some(mut entry) => entry.status = AppStatus::Unknown,
            None => {
                self.instances
                    .insert(app_id.to_string(), AppInstance::unknown(app_id));
            }
        }
        debug!("Marked application '{}' as completed", app_id);
    }

    /// Removes an application by app id.
    pub fn delete(&self, app_id: &str) {
        self.instances.remove(app_id);
    }

    /// Removes the first application whose pod name matches and returns it.
    ///
    /// When several records share a pod name the choice follows map
    /// iteration order: deterministic within a run, otherwise unspecified.
    pub fn delete_by_pod_name(&self, pod_name: &str) -> Option<AppInstance> {
        let app_id = self
            .instances
            .iter()
            .find(|entry| entry.value().pod_name == pod_name)
            .map(|entry| entry.key().clone())?;

        self.instances.remove(&app_id).map(|(_, app)| app)
    }

    /// Returns a snapshot of the record for the given app id.
    pub fn get(&self, app_id: &str) -> Option<AppInstance> {
        self.instances.get(app_id).map(|entry| entry.value().clone())
    }

    /// Returns a snapshot of every application currently in the `Running`
    /// status.
    pub fn list_running(&self) -> Vec<AppInstance> {
        self.instances
            .iter()
            .filter(|entry| entry.value().is_running())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
