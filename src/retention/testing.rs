//! In-memory doubles for retention engine tests.

use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use super::export::{EnvelopeSink, SinkClosed};
use crate::{
    db::{DbError, DbResult, ReadFrom, RetentionLogRepo, RetentionRepo},
    models::{
        CreateRetentionLog, DatabaseStats, RetentionEntityType, RetentionLog, RetentionTable,
        TableStats,
    },
};

/// Repo serving a fixed candidate list, with injectable batch failures.
#[derive(Default)]
pub struct StubRepo {
    candidates: Vec<String>,
    fail_fetch_on: Option<usize>,
    fail_delete_on: Option<usize>,
    already_deleted: bool,
    vanished: Vec<String>,
    candidate_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    last_query: Mutex<Option<&'static str>>,
    last_read_from: Mutex<Option<ReadFrom>>,
    deleted: Mutex<Vec<String>>,
}

impl StubRepo {
    pub fn with_candidates(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            ..Default::default()
        }
    }

    /// Fail the `n`th fetch (1-based).
    pub fn failing_fetch_on(mut self, n: usize) -> Self {
        self.fail_fetch_on = Some(n);
        self
    }

    /// Fail the `n`th delete batch (1-based).
    pub fn failing_delete_on(mut self, n: usize) -> Self {
        self.fail_delete_on = Some(n);
        self
    }

    /// Ids still returned as candidates but removed before they are fetched.
    pub fn vanishing(mut self, ids: Vec<String>) -> Self {
        self.vanished = ids;
        self
    }

    /// Candidates that are reported but already gone from the table, so
    /// every delete affects zero rows.
    pub fn already_deleted(mut self) -> Self {
        self.already_deleted = true;
        self
    }

    /// Candidate queries issued.
    pub fn calls(&self) -> usize {
        self.candidate_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_batches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn delete_batches(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<&'static str> {
        *self.last_query.lock().unwrap()
    }

    pub fn last_read_from(&self) -> Option<ReadFrom> {
        *self.last_read_from.lock().unwrap()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn remaining(&self, query: &'static str, read_from: ReadFrom) -> Vec<String> {
        self.candidate_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(query);
        *self.last_read_from.lock().unwrap() = Some(read_from);
        let deleted = self.deleted.lock().unwrap();
        self.candidates
            .iter()
            .filter(|id| !deleted.contains(id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RetentionRepo for StubRepo {
    async fn historical_candidates(
        &self,
        _table: RetentionTable,
        _cutoff: DateTime<Utc>,
        read_from: ReadFrom,
    ) -> DbResult<Vec<String>> {
        Ok(self.remaining("historical", read_from))
    }

    async fn snapshot_candidates(
        &self,
        _table: RetentionTable,
        _cutoff: DateTime<Utc>,
        read_from: ReadFrom,
    ) -> DbResult<Vec<String>> {
        Ok(self.remaining("snapshot", read_from))
    }

    async fn fetch_records(
        &self,
        _table: RetentionTable,
        ids: &[String],
    ) -> DbResult<Vec<JsonValue>> {
        let n = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_fetch_on == Some(n) {
            return Err(DbError::Internal(format!("fetch batch {n} failed")));
        }
        Ok(ids
            .iter()
            .filter(|id| !self.vanished.contains(id))
            .map(|id| json!({ "id": id }))
            .collect())
    }

    async fn delete_batch(&self, _table: RetentionTable, ids: &[String]) -> DbResult<u64> {
        let n = self.delete_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_delete_on == Some(n) {
            return Err(DbError::Internal(format!("delete batch {n} failed")));
        }
        if self.already_deleted {
            return Ok(0);
        }
        self.deleted.lock().unwrap().extend(ids.iter().cloned());
        Ok(ids.len() as u64)
    }

    async fn table_stats(&self) -> DbResult<DatabaseStats> {
        Ok(DatabaseStats {
            tables: RetentionTable::ALL
                .iter()
                .map(|t| TableStats {
                    table_name: t.name().to_string(),
                    row_count: 0,
                    total_bytes: 0,
                    index_bytes: 0,
                })
                .collect(),
            total_database_bytes: 0,
        })
    }
}

/// Audit sink that fails its first `failures` writes, then records.
#[derive(Default)]
pub struct RecordingLogRepo {
    failures: usize,
    attempts: AtomicUsize,
    entries: Mutex<Vec<CreateRetentionLog>>,
}

impl RecordingLogRepo {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> Vec<CreateRetentionLog> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetentionLogRepo for RecordingLogRepo {
    async fn create(&self, input: CreateRetentionLog) -> DbResult<RetentionLog> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(DbError::Internal("audit store unavailable".into()));
        }
        self.entries.lock().unwrap().push(input.clone());
        Ok(RetentionLog {
            id: Uuid::new_v4(),
            executor_id: input.executor_id,
            entity_type: input.entity_type,
            action: input.action,
            records_deleted: input.records_deleted,
            cutoff_date: input.cutoff_date,
            metadata: input.metadata,
            created_at: Utc::now(),
        })
    }

    async fn list_by_entity(
        &self,
        _entity_type: RetentionEntityType,
        _limit: i64,
    ) -> DbResult<Vec<RetentionLog>> {
        Ok(Vec::new())
    }
}

/// Byte sink that closes after a number of writes.
#[derive(Default)]
pub struct ClosingSink {
    limit: Option<usize>,
    writes: usize,
    buf: Vec<u8>,
    aborted: bool,
}

impl ClosingSink {
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Accept `writes` chunks, then report the consumer gone.
    pub fn after(writes: usize) -> Self {
        Self {
            limit: Some(writes),
            ..Default::default()
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }
}

#[async_trait]
impl EnvelopeSink for ClosingSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        if self.limit.is_some_and(|limit| self.writes >= limit) {
            return Err(SinkClosed);
        }
        self.writes += 1;
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn abort(&mut self, _reason: &str) {
        self.aborted = true;
    }
}
