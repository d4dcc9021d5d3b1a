//! Refresh diagnostics
//!
//! The coordinator reports each refresh run to an injected [`RefreshTracer`].
//! Tracers observe only: their methods cannot fail and must not block.
//!
//! - [`LogTracer`] (default) emits `tracing` events.
//! - [`RefreshHistory`] keeps a bounded in-memory record of recent runs for
//!   debugging screens and tests.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use brokerlink_common::time::{Clock, SystemClock};
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AuthError, AuthErrorKind};
use crate::types::TokenData;

/// Identifier correlating the start and end of one refresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(Uuid);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Observer for refresh runs.
pub trait RefreshTracer: Send + Sync {
    fn start_refresh_trace(&self) -> TraceId;

    fn record_refresh_success(&self, id: &TraceId, tokens: &TokenData);

    fn record_refresh_failure(&self, id: &TraceId, error: &AuthError);
}

/// Tracer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl RefreshTracer for LogTracer {
    fn start_refresh_trace(&self) -> TraceId {
        let id = TraceId::new();
        info!(trace_id = %id, "Token refresh started");
        id
    }

    fn record_refresh_success(&self, id: &TraceId, tokens: &TokenData) {
        info!(trace_id = %id, expires_at = tokens.expires_at(), "Token refresh succeeded");
    }

    fn record_refresh_failure(&self, id: &TraceId, error: &AuthError) {
        warn!(trace_id = %id, kind = %error.kind(), error = %error, "Token refresh failed");
    }
}

/// Outcome of a traced refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutcome {
    Pending,
    Succeeded { expires_at: i64 },
    Failed { kind: AuthErrorKind, message: String },
}

/// One traced refresh run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub id: TraceId,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub outcome: TraceOutcome,
}

/// Aggregate view over [`RefreshHistory`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
    pub last_error: Option<String>,
}

/// Bounded history of refresh runs. Oldest records are evicted first.
pub struct RefreshHistory {
    capacity: usize,
    records: Mutex<VecDeque<TraceRecord>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RefreshHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshHistory")
            .field("capacity", &self.capacity)
            .field("len", &self.records.lock().len())
            .finish()
    }
}

impl RefreshHistory {
    pub const DEFAULT_CAPACITY: usize = 50;

    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, records: Mutex::new(VecDeque::with_capacity(capacity)), clock }
    }

    /// Records, oldest first.
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn summary(&self) -> RefreshSummary {
        let records = self.records.lock();
        let mut summary = RefreshSummary { total: records.len(), ..RefreshSummary::default() };
        for record in records.iter() {
            match &record.outcome {
                TraceOutcome::Pending => summary.pending += 1,
                TraceOutcome::Succeeded { .. } => summary.succeeded += 1,
                TraceOutcome::Failed { message, .. } => {
                    summary.failed += 1;
                    summary.last_error = Some(message.clone());
                }
            }
        }
        summary
    }

    fn finish(&self, id: &TraceId, outcome: TraceOutcome) {
        let now = self.clock.millis_since_epoch();
        let mut records = self.records.lock();
        if let Some(record) = records.iter_mut().rev().find(|r| r.id == *id) {
            record.finished_at = Some(now);
            record.outcome = outcome;
        }
    }
}

impl Default for RefreshHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl RefreshTracer for RefreshHistory {
    fn start_refresh_trace(&self) -> TraceId {
        let id = TraceId::new();
        let record = TraceRecord {
            id,
            started_at: self.clock.millis_since_epoch(),
            finished_at: None,
            outcome: TraceOutcome::Pending,
        };
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        id
    }

    fn record_refresh_success(&self, id: &TraceId, tokens: &TokenData) {
        self.finish(id, TraceOutcome::Succeeded { expires_at: tokens.expires_at() });
    }

    fn record_refresh_failure(&self, id: &TraceId, error: &AuthError) {
        self.finish(id, TraceOutcome::Failed { kind: error.kind(), message: error.to_string() });
    }
}

#[cfg(test)]
mod tests {
    use brokerlink_common::time::MockClock;

    use super::*;

    #[test]
    fn test_trace_ids_are_unique() {
        assert_ne!(TraceId::new(), TraceId::new());
    }

    /// Validates history bookkeeping for success and failure.
    ///
    /// Assertions:
    /// - Start times and finish times come from the injected clock.
    /// - The summary counts each outcome and keeps the last error.
    #[test]
    fn test_history_records_outcomes() {
        let clock = Arc::new(MockClock::at_millis(1_000));
        let history = RefreshHistory::with_clock(10, Arc::clone(&clock) as Arc<dyn Clock>);

        let ok = history.start_refresh_trace();
        clock.advance_millis(250);
        history.record_refresh_success(&ok, &TokenData::new("a", None, 9_000));

        let failed = history.start_refresh_trace();
        history.record_refresh_failure(&failed, &AuthError::Network {
            message: "reset".into(),
            timeout: false,
        });

        let pending = history.start_refresh_trace();

        let records = history.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].started_at, 1_000);
        assert_eq!(records[0].finished_at, Some(1_250));
        assert_eq!(records[0].outcome, TraceOutcome::Succeeded { expires_at: 9_000 });
        assert!(matches!(
            records[1].outcome,
            TraceOutcome::Failed { kind: AuthErrorKind::Network, .. }
        ));
        assert_eq!(records[2].id, pending);

        let summary = history.summary();
        assert_eq!(
            (summary.total, summary.succeeded, summary.failed, summary.pending),
            (3, 1, 1, 1)
        );
        assert!(summary.last_error.is_some_and(|e| e.contains("reset")));
    }

    #[test]
    fn test_history_is_bounded() {
        let history = RefreshHistory::new(2);
        let first = history.start_refresh_trace();
        history.start_refresh_trace();
        history.start_refresh_trace();

        let records = history.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.id != first));

        // Finishing an evicted trace is ignored
        history.record_refresh_success(&first, &TokenData::new("a", None, 1));
        assert_eq!(history.summary().succeeded, 0);
    }

    #[test]
    fn test_log_tracer_is_infallible() {
        let tracer = LogTracer;
        let id = tracer.start_refresh_trace();
        tracer.record_refresh_success(&id, &TokenData::new("a", None, 1));
        tracer.record_refresh_failure(&id, &AuthError::Unknown("boom".into()));
    }
}
