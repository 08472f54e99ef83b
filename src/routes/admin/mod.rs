mod error;
pub mod retention;

use axum::{
    Router,
    routing::{delete, get},
};
pub use error::{AdminError, ErrorInfo, ErrorResponse};

use crate::AppState;

/// Retention administration routes.
///
/// Authentication is applied in `build_app`, where state is available.
pub fn get_admin_routes() -> Router<AppState> {
    Router::new()
        .route("/retention/stats", get(retention::stats))
        .route("/retention/export", get(retention::export))
        .route("/retention/prune", delete(retention::prune))
}
