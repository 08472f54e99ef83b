use axum::{
    Extension, Json,
    body::Body,
    extract::{Query, State, rejection::JsonRejection},
    http::header,
    response::Response,
};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use super::error::AdminError;
use crate::{
    AppState,
    middleware::AdminIdentity,
    retention::{ChannelSink, RetentionEngine, format_bytes},
};

/// Chunks buffered between the export task and the response body.
const EXPORT_CHANNEL_CAPACITY: usize = 16;

fn get_engine(state: &AppState) -> Result<&RetentionEngine, AdminError> {
    state.retention.as_ref().ok_or(AdminError::DatabaseRequired)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatsResponse {
    pub table_name: String,
    pub row_count: i64,
    pub total_bytes: i64,
    pub formatted_size: String,
    pub index_bytes: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub tables: Vec<TableStatsResponse>,
    pub total_database_size: i64,
    pub formatted_total_size: String,
}

/// Storage footprint of the retention-managed tables
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AdminError> {
    let stats = get_engine(&state)?.stats().await?;

    Ok(Json(StatsResponse {
        tables: stats
            .tables
            .into_iter()
            .map(|t| TableStatsResponse {
                formatted_size: format_bytes(t.total_bytes),
                table_name: t.table_name,
                row_count: t.row_count,
                total_bytes: t.total_bytes,
                index_bytes: t.index_bytes,
            })
            .collect(),
        total_database_size: stats.total_database_bytes,
        formatted_total_size: format_bytes(stats.total_database_bytes),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    pub entity_type: Option<String>,
    pub cutoff_date: Option<String>,
}

fn required(value: Option<String>, name: &str) -> Result<String, AdminError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AdminError::Validation(format!("{name} is required")))
}

/// Stream prune candidates as a signed JSON envelope.
///
/// Validation and candidate discovery happen before the response starts, so
/// those failures are ordinary error responses. Once streaming has begun a
/// failure cuts the body short and the client never sees the prune token.
pub async fn export(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AdminError> {
    let entity_type = required(query.entity_type, "entityType")?;
    let cutoff_date = required(query.cutoff_date, "cutoffDate")?;
    let exports = get_engine(&state)?.exports().clone();

    let prepared = exports.prepare(&entity_type, &cutoff_date).await?;
    let filename = prepared.filename();

    tracing::info!(
        executor = %identity.id,
        entity_type = %prepared.entity_type(),
        cutoff_date = prepared.cutoff_date(),
        total_records = prepared.total_records(),
        "Starting retention export"
    );

    let (mut sink, stream) = ChannelSink::channel(EXPORT_CHANNEL_CAPACITY);
    let span = tracing::info_span!("retention.export", executor = %identity.id);
    state.task_tracker.spawn(
        async move {
            // Failures are logged by the export manager and surface to the
            // client as a truncated body.
            let _ = exports.stream_to(prepared, &mut sink).await;
        }
        .instrument(span),
    );

    Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from_stream(stream))
        .map_err(|e| AdminError::Internal(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneRequest {
    pub entity_type: String,
    pub cutoff_date: String,
    pub prune_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneResponse {
    pub deleted_count: u64,
    pub message: String,
}

/// Delete exported records, authorized by the export's prune token
pub async fn prune(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    body: Result<Json<PruneRequest>, JsonRejection>,
) -> Result<Json<PruneResponse>, AdminError> {
    let Json(request) = body.map_err(|e| AdminError::Validation(e.body_text()))?;
    let engine = get_engine(&state)?;

    let outcome = engine
        .orchestrator()
        .prune(
            &identity.id,
            &request.entity_type,
            &request.cutoff_date,
            &request.prune_token,
        )
        .await?;

    Ok(Json(PruneResponse {
        deleted_count: outcome.deleted_count,
        message: format!(
            "Deleted {} {} records created before {}",
            outcome.deleted_count, outcome.entity_type, request.cutoff_date
        ),
    }))
}
