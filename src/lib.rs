//! Fiscus: data retention and archival for financial records.
//!
//! Records become deletable only through an export-then-prune protocol. See
//! [`retention`] for the engine and [`routes::admin`] for the HTTP surface.

use std::sync::Arc;

use axum::{Router, routing::get};
use tokio_util::task::TaskTracker;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod retention;
pub mod routes;

#[cfg(test)]
mod tests;

use crate::{config::AppConfig, db::DbPool, retention::RetentionEngine};

/// Startup failures.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to connect to database: {0}")]
    Database(#[source] db::DbError),
    #[error("Database migrations failed: {0}")]
    Migration(#[source] db::DbError),
}

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Option<Arc<DbPool>>,
    /// Present whenever a database is configured.
    pub retention: Option<RetentionEngine>,
    /// Tracks export streams so shutdown can wait for them.
    pub task_tracker: TaskTracker,
}

impl AppState {
    /// Connect to the configured database, migrate it if asked, and build
    /// the retention engine.
    pub async fn new(config: AppConfig) -> Result<Self, StartupError> {
        let db = if config.database.is_none() {
            tracing::warn!("No database configured; retention endpoints are unavailable");
            None
        } else {
            let pool = DbPool::from_config(&config.database)
                .await
                .map_err(StartupError::Database)?;
            if config.database.run_migrations() {
                pool.run_migrations()
                    .await
                    .map_err(StartupError::Migration)?;
                tracing::info!("Database migrations applied");
            }
            Some(Arc::new(pool))
        };

        Ok(Self::with_db(config, db))
    }

    /// Build state around an existing pool.
    pub fn with_db(config: AppConfig, db: Option<Arc<DbPool>>) -> Self {
        let retention = db
            .as_ref()
            .map(|db| RetentionEngine::from_pool(db, &config.retention));

        Self {
            config: Arc::new(config),
            db,
            retention,
            task_tracker: TaskTracker::new(),
        }
    }
}

pub fn build_app(config: &AppConfig, state: AppState) -> Router {
    let mut app = Router::new().route("/health", get(routes::health::health_check));

    if config.observability.metrics.enabled {
        app = app.route(
            &config.observability.metrics.path,
            get(routes::health::metrics),
        );
    }

    if config.auth.is_none() {
        tracing::warn!(
            "No admin authentication configured; retention routes are open. \
             Configure [auth] for anything but local development."
        );
    }

    let admin_routes = routes::admin::get_admin_routes().route_layer(
        axum::middleware::from_fn_with_state(state.clone(), middleware::admin_auth_middleware),
    );
    app = app.nest("/admin", admin_routes);

    app.layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}
