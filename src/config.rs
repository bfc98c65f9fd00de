use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use url::Url;

/// Top-level application settings, loaded from a YAML file with
/// environment-variable overrides on the dotted-to-uppercased convention
/// (`proxy.port` -> `PROXY_PORT`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub proxy: ProxyConfig,
    pub spark: SparkConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyConfig {
    pub listen_address: String,
    pub port: u16,
    /// Framework mode: `release`, `debug` or `test`. `debug` raises the
    /// default log level when `logging.level` is left unset.
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SparkConfig {
    pub history: HistoryConfig,
    pub ui: UiConfig,
    /// Namespaces to watch for driver pods; empty means all namespaces.
    pub job_namespaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub scheme: String,
    pub service: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UiConfig {
    /// Path prefix under which live application UIs are served.
    pub proxy_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Output shape: `console` or `json`.
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub cors: CorsConfig,
    /// Static response headers injected into every response.
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            spark: SparkConfig::default(),
            logging: LoggingConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_address: "localhost".to_string(),
            port: 8090,
            mode: "release".to_string(),
        }
    }
}

impl Default for SparkConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            ui: UiConfig::default(),
            job_namespaces: vec!["default".to_string()],
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            service: "localhost".to_string(),
            port: 18080,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            proxy_base: "/sparkui".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "console".to_string(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cors: CorsConfig::default(),
            headers: HashMap::new(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec![
                "GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "HEAD",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            allowed_headers: vec!["*".to_string()],
            exposed_headers: vec!["Content-Length".to_string()],
            allow_credentials: false,
            max_age: 3600,
        }
    }
}

impl Settings {
    /// Loads settings from the given YAML file, then applies environment
    /// overrides. A missing file falls back to defaults; a malformed file
    /// is a hard error so the process aborts at startup.
    pub fn load(config_path: &str) -> Result<Self> {
        let mut settings = if std::path::Path::new(config_path).exists() {
            let contents = fs::read_to_string(config_path)
                .with_context(|| format!("failed to read config file {config_path}"))?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("failed to parse config file {config_path}"))?
        } else {
            tracing::warn!("Config file not found: {}. Using defaults.", config_path);
            Settings::default()
        };

        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Applies environment-variable overrides: every dotted config key maps
    /// to its uppercased, underscore-joined variable name.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("PROXY_LISTENADDRESS") {
            self.proxy.listen_address = value;
        }
        if let Ok(value) = env::var("PROXY_PORT") {
            if let Ok(port) = value.parse() {
                self.proxy.port = port;
            }
        }
        if let Ok(value) = env::var("PROXY_MODE") {
            self.proxy.mode = value;
        }
        if let Ok(value) = env::var("SPARK_HISTORY_SCHEME") {
            self.spark.history.scheme = value;
        }
        if let Ok(value) = env::var("SPARK_HISTORY_SERVICE") {
            self.spark.history.service = value;
        }
        if let Ok(value) = env::var("SPARK_HISTORY_PORT") {
            if let Ok(port) = value.parse() {
                self.spark.history.port = port;
            }
        }
        if let Ok(value) = env::var("SPARK_UI_PROXYBASE") {
            self.spark.ui.proxy_base = value;
        }
        if let Ok(value) = env::var("SPARK_JOBNAMESPACES") {
            self.spark.job_namespaces = value
                .split(',')
                .map(str::trim)
                .filter(|namespace| !namespace.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(value) = env::var("LOGGING_LEVEL") {
            self.logging.level = value;
        }
        if let Ok(value) = env::var("LOGGING_FORMAT") {
            self.logging.format = value;
        }
    }

    /// Returns the Spark History Server base URL, validated to carry a
    /// scheme and a host. An invalid URL aborts startup.
    pub fn history_base_url(&self) -> Result<String> {
        let base = format!(
            "{}://{}:{}",
            self.spark.history.scheme, self.spark.history.service, self.spark.history.port
        );

        let parsed = Url::parse(&base)
            .with_context(|| format!("The Spark History Server URL is not valid: {base}"))?;
        if parsed.scheme().is_empty() || parsed.host_str().is_none() {
            bail!("The Spark History Server URL is not valid: {base}");
        }

        Ok(base)
    }

    /// The path prefix live UIs are served under, trimmed of stray spaces.
    pub fn ui_proxy_base(&self) -> String {
        self.spark.ui.proxy_base.trim().to_string()
    }
}
