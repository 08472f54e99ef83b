use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use fiscus::{AppState, build_app, config::AppConfig, db::DbPool, observability};
use tokio_util::task::TaskTracker;

const DEFAULT_CONFIG_PATH: &str = "fiscus.toml";

#[derive(Parser, Debug)]
#[command(name = "fiscus", version, about = "Data retention and archival service")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./fiscus.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the HTTP server (default)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Validate the configuration file and exit
    CheckConfig,
    /// Print the JSON schema for the configuration file
    #[cfg(feature = "json-schema")]
    Schema,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    match args.command {
        Some(Command::Migrate) => run_migrate(&config_path).await,
        Some(Command::CheckConfig) => run_check_config(&config_path),
        #[cfg(feature = "json-schema")]
        Some(Command::Schema) => run_schema_export(),
        Some(Command::Serve) | None => run_server(&config_path).await,
    }
}

fn load_config(path: &Path) -> AppConfig {
    match AppConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &AppConfig) {
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {e}");
        std::process::exit(1);
    }
}

fn run_check_config(path: &Path) {
    let config = load_config(path);
    println!("Configuration OK: {}", path.display());
    println!("  database: {}", if config.database.is_none() { "none" } else { "configured" });
    println!("  admin auth: {}", if config.auth.is_some() { "configured" } else { "NONE" });
    println!("  batch size: {}", config.retention.batch_size);
}

#[cfg(feature = "json-schema")]
fn run_schema_export() {
    match serde_json::to_string_pretty(&AppConfig::json_schema()) {
        Ok(schema) => println!("{schema}"),
        Err(e) => {
            eprintln!("Error: failed to serialize schema: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_server(config_path: &Path) {
    let config = load_config(config_path);
    init_tracing(&config);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    tracing::info!(
        config_file = %config_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting fiscus"
    );

    if config.auth.is_none() && !config.server.host.is_loopback() {
        tracing::error!(
            bind_address = %config.server.host,
            "Retention routes are reachable without authentication on a non-localhost \
             address. Configure [auth] or bind to 127.0.0.1."
        );
    }

    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application state");
            std::process::exit(1);
        }
    };

    let task_tracker = state.task_tracker.clone();
    let app = build_app(&config, state);

    let bind_addr = config.server.bind_address();
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!("Server listening on http://{}", bind_addr);

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(task_tracker, grace))
    .await;

    if let Err(e) = served {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal(task_tracker: TaskTracker, grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, waiting for in-flight exports...");
    task_tracker.close();

    match tokio::time::timeout(grace, task_tracker.wait()).await {
        Ok(()) => tracing::info!("All exports completed"),
        Err(_) => tracing::warn!("Timeout waiting for exports, some were cut short"),
    }
}

async fn run_migrate(config_path: &Path) {
    let config = load_config(config_path);
    init_tracing(&config);

    if config.database.is_none() {
        eprintln!("Error: Database is not configured. Nothing to migrate.");
        std::process::exit(1);
    }

    tracing::info!(config_file = %config_path.display(), "Running database migrations");

    match DbPool::from_config(&config.database).await {
        Ok(pool) => match pool.run_migrations().await {
            Ok(()) => tracing::info!("Database migrations completed successfully"),
            Err(e) => {
                tracing::error!(error = %e, "Database migrations failed");
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    }
}
