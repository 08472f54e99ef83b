//! Streaming export of prune candidates.
//!
//! The envelope is written as one JSON object:
//!
//! ```json
//! {"metadata":{...},"records":[ ... ],"security":{"integrity":..,"recordsDigest":..,"pruneToken":..}}
//! ```
//!
//! The `security` footer is written last. A stream that stops early is
//! therefore never valid JSON and never carries a token.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use futures_util::Stream;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use super::{
    dates::normalize_cutoff,
    error::{RetentionError, RetentionResult},
    resolver::{ResolvedTarget, resolve_name},
    token::PruneTokenSigner,
};
use crate::{
    db::{ReadFrom, RetentionRepo},
    models::RetentionEntityType,
    observability::metrics,
};

/// Algorithm label written into the envelope footer.
pub const INTEGRITY_ALGORITHM: &str = "HMAC-SHA256";

/// The consumer of an export went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Destination for envelope bytes.
#[async_trait]
pub trait EnvelopeSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SinkClosed>;

    /// Signal that the stream failed after bytes were written.
    async fn abort(&mut self, _reason: &str) {}
}

#[async_trait]
impl EnvelopeSink for Vec<u8> {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

/// Sink feeding a bounded channel, read as a response body stream.
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
}

impl ChannelSink {
    /// Create a sink and the stream that drains it.
    pub fn channel(
        capacity: usize,
    ) -> (
        Self,
        impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    ) {
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(capacity);
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        (Self { tx }, stream)
    }
}

#[async_trait]
impl EnvelopeSink for ChannelSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.tx.send(Ok(chunk)).await.map_err(|_| SinkClosed)
    }

    async fn abort(&mut self, reason: &str) {
        // An error item makes the HTTP layer cut the body short.
        let _ = self
            .tx
            .send(Err(std::io::Error::other(reason.to_string())))
            .await;
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeMetadata<'a> {
    entity_type: RetentionEntityType,
    cutoff_date: &'a str,
    total_records: usize,
    exported_at: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeSecurity<'a> {
    integrity: &'a str,
    records_digest: String,
    prune_token: &'a str,
}

/// An export whose candidates and token are known, ready to stream.
#[derive(Debug)]
pub struct PreparedExport {
    target: ResolvedTarget,
    cutoff_date: String,
    candidates: Vec<String>,
    prune_token: String,
}

impl PreparedExport {
    pub fn entity_type(&self) -> RetentionEntityType {
        self.target.entity_type
    }

    pub fn cutoff_date(&self) -> &str {
        &self.cutoff_date
    }

    pub fn total_records(&self) -> usize {
        self.candidates.len()
    }

    /// Attachment filename, e.g. `retention-pension-2025-01-01.json`.
    pub fn filename(&self) -> String {
        format!(
            "retention-{}-{}.json",
            self.target.entity_type.as_str().to_lowercase(),
            self.cutoff_date
        )
    }
}

/// Result of a completed export stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub records_written: u64,
}

/// Discovers candidates and streams them as a signed envelope.
#[derive(Clone)]
pub struct ExportManager {
    repo: Arc<dyn RetentionRepo>,
    signer: PruneTokenSigner,
    batch_size: usize,
}

impl ExportManager {
    pub fn new(repo: Arc<dyn RetentionRepo>, signer: PruneTokenSigner, batch_size: usize) -> Self {
        Self {
            repo,
            signer,
            batch_size: batch_size.max(1),
        }
    }

    /// Validate input, compute candidates and mint the prune token.
    ///
    /// Nothing has been written anywhere when this fails.
    pub async fn prepare(
        &self,
        entity_type: &str,
        cutoff_date: &str,
    ) -> RetentionResult<PreparedExport> {
        let cutoff = normalize_cutoff(cutoff_date)?;
        let target = resolve_name(entity_type)?;

        let candidates = target
            .strategy
            .find_candidates(self.repo.as_ref(), target.table, cutoff, ReadFrom::Replica)
            .await?;
        if candidates.is_empty() {
            return Err(RetentionError::NotFound(format!(
                "No {} records eligible for export before {}",
                target.entity_type, cutoff_date
            )));
        }

        let cutoff_date = cutoff.format("%Y-%m-%d").to_string();
        let prune_token = self.signer.mint(target.entity_type, &cutoff_date)?;

        Ok(PreparedExport {
            target,
            cutoff_date,
            candidates,
            prune_token,
        })
    }

    /// Write the envelope for a prepared export into `sink`.
    ///
    /// On any failure after the opening bytes the sink is aborted and no
    /// footer is written.
    pub async fn stream_to(
        &self,
        export: PreparedExport,
        sink: &mut dyn EnvelopeSink,
    ) -> RetentionResult<ExportSummary> {
        let entity = export.target.entity_type.as_str();
        let mut records_written: u64 = 0;

        match self.write_envelope(&export, sink, &mut records_written).await {
            Ok(()) => {
                tracing::info!(
                    entity_type = entity,
                    table = %export.target.table,
                    records = records_written,
                    "Retention export completed"
                );
                Ok(ExportSummary { records_written })
            }
            Err(e) => {
                tracing::warn!(
                    entity_type = entity,
                    records_written,
                    error = %e,
                    "Retention export aborted"
                );
                sink.abort(&e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn write_envelope(
        &self,
        export: &PreparedExport,
        sink: &mut dyn EnvelopeSink,
        records_written: &mut u64,
    ) -> RetentionResult<()> {
        let entity = export.target.entity_type.as_str();
        let closed = |written: u64| RetentionError::StreamAborted {
            records_written: written,
        };

        let metadata = serde_json::to_string(&EnvelopeMetadata {
            entity_type: export.target.entity_type,
            cutoff_date: &export.cutoff_date,
            total_records: export.candidates.len(),
            exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })?;

        sink.write(Bytes::from(format!(
            "{{\"metadata\":{},\"records\":[",
            metadata
        )))
        .await
        .map_err(|_| closed(0))?;

        let mut digest = Sha256::new();
        for (batch_index, ids) in export.candidates.chunks(self.batch_size).enumerate() {
            if batch_index > 0 {
                tokio::task::yield_now().await;
            }

            let records = self.repo.fetch_records(export.target.table, ids).await?;
            if records.is_empty() {
                continue;
            }

            let mut chunk = Vec::with_capacity(records.len() * 256);
            for record in &records {
                if *records_written > 0 || !chunk.is_empty() {
                    chunk.push(b',');
                }
                serde_json::to_writer(&mut chunk, record)?;
            }
            digest.update(&chunk);

            sink.write(Bytes::from(chunk))
                .await
                .map_err(|_| closed(*records_written))?;
            *records_written += records.len() as u64;
            metrics::record_export_records(entity, records.len() as u64);

            tracing::debug!(
                entity_type = entity,
                batch = batch_index + 1,
                records = records.len(),
                "Exported batch"
            );
        }

        if *records_written != export.candidates.len() as u64 {
            return Err(RetentionError::CandidatesChanged {
                expected: export.candidates.len() as u64,
                exported: *records_written,
            });
        }

        let security = serde_json::to_string(&EnvelopeSecurity {
            integrity: INTEGRITY_ALGORITHM,
            records_digest: format!("sha256:{}", hex::encode(digest.finalize())),
            prune_token: &export.prune_token,
        })?;

        sink.write(Bytes::from(format!("],\"security\":{}}}", security)))
            .await
            .map_err(|_| closed(*records_written))?;

        Ok(())
    }

    /// Prepare and stream in one call.
    pub async fn export_stream(
        &self,
        entity_type: &str,
        cutoff_date: &str,
        sink: &mut dyn EnvelopeSink,
    ) -> RetentionResult<ExportSummary> {
        let export = self.prepare(entity_type, cutoff_date).await?;
        self.stream_to(export, sink).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::retention::testing::{ClosingSink, StubRepo};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn manager(repo: StubRepo, batch_size: usize) -> (ExportManager, Arc<StubRepo>) {
        let repo = Arc::new(repo);
        let manager = ExportManager::new(repo.clone(), PruneTokenSigner::new(SECRET), batch_size);
        (manager, repo)
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("id-{i:04}")).collect()
    }

    #[tokio::test]
    async fn test_envelope_is_valid_json_with_token() {
        let (manager, repo) = manager(StubRepo::with_candidates(ids(5)), 2);
        let mut out = Vec::new();

        let summary = manager
            .export_stream("PENSION", "2024-01-01", &mut out)
            .await
            .unwrap();

        assert_eq!(summary.records_written, 5);
        assert_eq!(repo.fetch_batches(), 3);

        let envelope: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(envelope["metadata"]["entityType"], "PENSION");
        assert_eq!(envelope["metadata"]["cutoffDate"], "2024-01-01");
        assert_eq!(envelope["metadata"]["totalRecords"], 5);
        assert!(envelope["metadata"]["exportedAt"].is_string());
        assert_eq!(envelope["records"].as_array().unwrap().len(), 5);
        assert_eq!(envelope["records"][0]["id"], "id-0000");
        assert_eq!(envelope["records"][4]["id"], "id-0004");
        assert_eq!(envelope["security"]["integrity"], INTEGRITY_ALGORITHM);

        let token = envelope["security"]["pruneToken"].as_str().unwrap();
        assert!(
            PruneTokenSigner::new(SECRET)
                .validate(token, RetentionEntityType::Pension, "2024-01-01")
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_records_digest_covers_streamed_records() {
        let (manager, _) = manager(StubRepo::with_candidates(ids(3)), 10);
        let mut out = Vec::new();
        manager
            .export_stream("INSURANCE", "2024-01-01", &mut out)
            .await
            .unwrap();

        let text = String::from_utf8(out.clone()).unwrap();
        let start = text.find("\"records\":[").unwrap() + "\"records\":[".len();
        let end = text.rfind("],\"security\"").unwrap();
        let expected = format!("sha256:{}", hex::encode(Sha256::digest(&out[start..end])));

        let envelope: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(envelope["security"]["recordsDigest"], expected);
    }

    #[tokio::test]
    async fn test_no_candidates_is_not_found() {
        let (manager, _) = manager(StubRepo::default(), 10);
        let err = manager.prepare("GOAL", "2024-01-01").await.unwrap_err();
        assert!(matches!(err, RetentionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_bad_input_is_validation_error() {
        let (manager, repo) = manager(StubRepo::with_candidates(ids(1)), 10);
        assert!(matches!(
            manager.prepare("GOAL", "01/01/2024").await,
            Err(RetentionError::Validation(_))
        ));
        assert!(matches!(
            manager.prepare("LOAN", "2024-01-01").await,
            Err(RetentionError::Validation(_))
        ));
        assert_eq!(repo.calls(), 0);
    }

    #[tokio::test]
    async fn test_filename() {
        let (manager, _) = manager(StubRepo::with_candidates(ids(1)), 10);
        let export = manager
            .prepare("FINANCIAL_CHECKUP", "2024-03-01")
            .await
            .unwrap();
        assert_eq!(export.filename(), "retention-financial_checkup-2024-03-01.json");
        assert_eq!(export.total_records(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_mid_stream_leaves_no_token() {
        let (manager, _) = manager(StubRepo::with_candidates(ids(6)).failing_fetch_on(2), 2);
        let mut sink = ClosingSink::unlimited();

        let err = manager
            .export_stream("BUDGET", "2024-01-01", &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, RetentionError::Database(_)));
        assert!(sink.aborted());
        let text = String::from_utf8(sink.bytes()).unwrap();
        assert!(!text.contains("pruneToken"));
        assert!(serde_json::from_str::<Value>(&text).is_err());
    }

    #[tokio::test]
    async fn test_rows_deleted_during_export_leave_no_token() {
        let (manager, _) = manager(
            StubRepo::with_candidates(ids(4)).vanishing(vec!["id-0002".into()]),
            2,
        );
        let mut sink = ClosingSink::unlimited();

        let err = manager
            .export_stream("PENSION", "2024-01-01", &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RetentionError::CandidatesChanged {
                expected: 4,
                exported: 3
            }
        ));
        assert!(sink.aborted());
        let text = String::from_utf8(sink.bytes()).unwrap();
        assert!(!text.contains("pruneToken"));
        assert!(serde_json::from_str::<Value>(&text).is_err());
    }

    #[tokio::test]
    async fn test_closed_sink_stops_export() {
        let (manager, repo) = manager(StubRepo::with_candidates(ids(10)), 2);
        // opening chunk plus two record batches
        let mut sink = ClosingSink::after(3);

        let err = manager
            .export_stream("PENSION", "2024-01-01", &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RetentionError::StreamAborted { records_written: 4 }
        ));
        assert_eq!(repo.fetch_batches(), 3);
        assert!(!String::from_utf8(sink.bytes()).unwrap().contains("pruneToken"));
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_chunks() {
        use futures_util::StreamExt;

        let (manager, _) = manager(StubRepo::with_candidates(ids(4)), 2);
        let export = manager.prepare("PENSION", "2024-01-01").await.unwrap();
        let (mut sink, stream) = ChannelSink::channel(16);

        let task = tokio::spawn(async move { manager.stream_to(export, &mut sink).await });
        let chunks: Vec<_> = stream.collect().await;
        task.await.unwrap().unwrap();

        let body: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        let envelope: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["records"].as_array().unwrap().len(), 4);
    }
}
