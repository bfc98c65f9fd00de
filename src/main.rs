use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use spark_web_proxy::api::{create_app, AppState};
use spark_web_proxy::config::Settings;
use spark_web_proxy::registry::AppRegistry;
use spark_web_proxy::watcher::SparkAppWatcher;

#[derive(Parser, Debug)]
#[command(name = "spark-web-proxy")]
#[command(about = "Spark UI Proxy")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load(&args.config)?;
    init_logging(&settings);

    info!(
        "Loaded configuration from {}: listenAddress={}, port={}, mode={}",
        args.config, settings.proxy.listen_address, settings.proxy.port, settings.proxy.mode
    );

    let registry = Arc::new(AppRegistry::new());
    let state = AppState::new(settings.clone(), registry.clone())?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let kube_client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    SparkAppWatcher::new(settings.spark.job_namespaces.clone(), registry)
        .spawn(kube_client, &shutdown_tx);

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind((
        settings.proxy.listen_address.as_str(),
        settings.proxy.port,
    ))
    .await
    .with_context(|| {
        format!(
            "Failed to bind {}:{}",
            settings.proxy.listen_address, settings.proxy.port
        )
    })?;

    info!("spark web proxy started on port {}", settings.proxy.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    Ok(())
}

/// Initialize logging from the `logging` settings. `proxy.mode: debug`
/// raises the default level when no explicit level is set.
fn init_logging(settings: &Settings) {
    let level = match settings.logging.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        "info" => Level::INFO,
        _ if settings.proxy.mode == "debug" => Level::DEBUG,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false);

    let result = if settings.logging.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.compact().finish())
    };

    if let Err(err) = result {
        eprintln!("Failed to initialize logging: {err}");
    }
}

/// Waits for SIGTERM or ctrl-c, then fans the shutdown out to the watcher
/// tasks and lets axum drain in-flight requests.
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Received shutdown signal. Stopping spark web proxy...");
    let _ = shutdown_tx.send(());
}
