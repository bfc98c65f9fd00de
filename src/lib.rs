//! Reverse proxy unifying access to live Spark application UIs on
//! Kubernetes with the Spark History Server.
//!
//! Requests arrive under a stable URL; the proxy routes each one either to
//! the application's live driver UI or to Spark History, redirecting across
//! the two surfaces as applications start and complete.

pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod history;
pub mod models;
pub mod proxy;
pub mod registry;
pub mod rewriter;
pub mod utils;
pub mod watcher;

pub use api::{create_app, AppState};
pub use config::Settings;
pub use registry::AppRegistry;
