//! Evidence providers.
//!
//! [`ObservabilityBackend`] is the fallible seam to the cloud provider.
//! [`EvidenceProviders`] wraps a backend and never fails: every retrieval
//! error becomes a single error record, caps are enforced, and records are
//! returned oldest first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use rc_core::config::EvidenceConfig;
use rc_core::types::{sort_by_occurrence, EvidenceRecord, LookbackWindow};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// A provider could not reach or query its backing system.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvidenceRetrievalError {
    #[error("no AWS credentials available (checked {0})")]
    MissingCredentials(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("{code} (status {status}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("could not decode response: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub log_group_name: String,
    pub window: LookbackWindow,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    pub namespace: String,
    pub metric_name: String,
    pub dimension_name: String,
    pub dimension_value: String,
    pub window: LookbackWindow,
    pub period_secs: u32,
}

impl MetricQuery {
    pub const STATISTICS: [&'static str; 2] = ["Average", "Maximum"];
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditQuery {
    pub window: LookbackWindow,
    pub max_results: u32,
}

// ---------------------------------------------------------------------------
// ObservabilityBackend
// ---------------------------------------------------------------------------

/// Raw access to logs, metrics and audit events. Implementations return
/// whatever the backing service returned; shaping happens in
/// [`EvidenceProviders`].
#[async_trait]
pub trait ObservabilityBackend: Send + Sync {
    async fn filter_log_events(&self, query: &LogQuery)
        -> Result<Vec<Value>, EvidenceRetrievalError>;

    async fn metric_statistics(
        &self,
        query: &MetricQuery,
    ) -> Result<Vec<Value>, EvidenceRetrievalError>;

    async fn lookup_events(&self, query: &AuditQuery)
        -> Result<Vec<Value>, EvidenceRetrievalError>;
}

// ---------------------------------------------------------------------------
// EvidenceProviders
// ---------------------------------------------------------------------------

pub struct EvidenceProviders {
    backend: Arc<dyn ObservabilityBackend>,
    limits: EvidenceConfig,
}

impl EvidenceProviders {
    pub fn new(backend: Arc<dyn ObservabilityBackend>) -> Self {
        Self::with_limits(backend, EvidenceConfig::default())
    }

    pub fn with_limits(backend: Arc<dyn ObservabilityBackend>, limits: EvidenceConfig) -> Self {
        Self { backend, limits }
    }

    pub fn limits(&self) -> &EvidenceConfig {
        &self.limits
    }

    /// Up to `log_event_limit` events from `log_group_name` in the last
    /// `minutes_ago` minutes, oldest first.
    pub async fn fetch_recent_logs(
        &self,
        log_group_name: &str,
        minutes_ago: u32,
    ) -> Vec<EvidenceRecord> {
        debug!(log_group = log_group_name, minutes_ago, "fetching recent logs");
        let query = LogQuery {
            log_group_name: log_group_name.to_string(),
            window: LookbackWindow::ending_now(minutes_ago),
            limit: self.limits.log_event_limit,
        };
        let result = self.backend.filter_log_events(&query).await;
        shape("logs", result, self.limits.log_event_limit as usize, |v| {
            EvidenceRecord::from_value(v)
        })
    }

    /// Average and maximum datapoints at the configured period, oldest
    /// first.
    pub async fn fetch_metrics(
        &self,
        namespace: &str,
        metric_name: &str,
        dimension_name: &str,
        dimension_value: &str,
        minutes_ago: u32,
    ) -> Vec<EvidenceRecord> {
        debug!(
            namespace,
            metric_name, dimension_name, dimension_value, minutes_ago, "fetching metrics"
        );
        let query = MetricQuery {
            namespace: namespace.to_string(),
            metric_name: metric_name.to_string(),
            dimension_name: dimension_name.to_string(),
            dimension_value: dimension_value.to_string(),
            window: LookbackWindow::ending_now(minutes_ago),
            period_secs: self.limits.metric_period_secs,
        };
        let result = self.backend.metric_statistics(&query).await;
        shape("metrics", result, usize::MAX, datapoint_record)
    }

    /// Up to `audit_event_limit` recent account-activity events, oldest
    /// first.
    pub async fn lookup_events(&self, minutes_ago: u32) -> Vec<EvidenceRecord> {
        debug!(minutes_ago, "looking up audit events");
        let query = AuditQuery {
            window: LookbackWindow::ending_now(minutes_ago),
            max_results: self.limits.audit_event_limit,
        };
        let result = self.backend.lookup_events(&query).await;
        shape("audit", result, self.limits.audit_event_limit as usize, |v| {
            EvidenceRecord::from_value(v)
        })
    }
}

fn shape(
    source: &'static str,
    result: Result<Vec<Value>, EvidenceRetrievalError>,
    cap: usize,
    to_record: impl Fn(Value) -> EvidenceRecord,
) -> Vec<EvidenceRecord> {
    match result {
        Ok(values) => {
            let records: Vec<EvidenceRecord> = values.into_iter().map(to_record).collect();
            let records = cap_most_recent(records, cap);
            debug!(source, count = records.len(), "evidence retrieved");
            records
        }
        Err(err) => {
            warn!(source, error = %err, "evidence retrieval failed");
            vec![EvidenceRecord::error(err.to_string())]
        }
    }
}

/// Order by occurrence and keep at most `cap` records. Timestamped records
/// win over untimed ones; among them the most recent are kept.
fn cap_most_recent(records: Vec<EvidenceRecord>, cap: usize) -> Vec<EvidenceRecord> {
    let (mut timed, untimed): (Vec<_>, Vec<_>) =
        records.into_iter().partition(|r| r.occurred_at().is_some());
    sort_by_occurrence(&mut timed);
    if timed.len() > cap {
        timed.drain(..timed.len() - cap);
    }
    let room = cap - timed.len();
    timed.extend(untimed.into_iter().take(room));
    timed
}

/// Project a raw datapoint onto `timestamp`, `average`, `maximum` (and
/// `unit` when present).
fn datapoint_record(raw: Value) -> EvidenceRecord {
    let mut record = EvidenceRecord::from_value(json!({}));
    let source = EvidenceRecord::from_value(raw);
    match source.occurred_at() {
        Some(ts) => record.insert("timestamp", json!(ts.to_rfc3339())),
        None => record.insert("timestamp", Value::Null),
    }
    record.insert(
        "average",
        source.get("Average").cloned().unwrap_or(Value::Null),
    );
    record.insert(
        "maximum",
        source.get("Maximum").cloned().unwrap_or(Value::Null),
    );
    if let Some(unit) = source.get("Unit") {
        record.insert("unit", unit.clone());
    }
    record
}

// ---------------------------------------------------------------------------
// StaticBackend
// ---------------------------------------------------------------------------

/// An in-memory backend for tests and offline runs.
///
/// Each operation returns its configured payload. Queries are captured for
/// assertions.
#[derive(Default)]
pub struct StaticBackend {
    logs: Mutex<Option<Result<Vec<Value>, EvidenceRetrievalError>>>,
    metrics: Mutex<Option<Result<Vec<Value>, EvidenceRetrievalError>>>,
    audit: Mutex<Option<Result<Vec<Value>, EvidenceRetrievalError>>>,
    calls: AtomicUsize,
    log_queries: Mutex<VecDeque<LogQuery>>,
}

impl StaticBackend {
    /// A backend that answers every query with an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logs(self, events: Vec<Value>) -> Self {
        *self.logs.lock().unwrap_or_else(|p| p.into_inner()) = Some(Ok(events));
        self
    }

    pub fn with_metrics(self, datapoints: Vec<Value>) -> Self {
        *self.metrics.lock().unwrap_or_else(|p| p.into_inner()) = Some(Ok(datapoints));
        self
    }

    pub fn with_audit_events(self, events: Vec<Value>) -> Self {
        *self.audit.lock().unwrap_or_else(|p| p.into_inner()) = Some(Ok(events));
        self
    }

    /// Make every operation fail with `error`.
    pub fn failing(error: EvidenceRetrievalError) -> Self {
        Self {
            logs: Mutex::new(Some(Err(error.clone()))),
            metrics: Mutex::new(Some(Err(error.clone()))),
            audit: Mutex::new(Some(Err(error))),
            ..Self::default()
        }
    }

    /// Total number of backend calls served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn log_queries(&self) -> Vec<LogQuery> {
        self.log_queries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn answer(
        &self,
        slot: &Mutex<Option<Result<Vec<Value>, EvidenceRetrievalError>>>,
    ) -> Result<Vec<Value>, EvidenceRetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        slot.lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[async_trait]
impl ObservabilityBackend for StaticBackend {
    async fn filter_log_events(
        &self,
        query: &LogQuery,
    ) -> Result<Vec<Value>, EvidenceRetrievalError> {
        self.log_queries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(query.clone());
        self.answer(&self.logs)
    }

    async fn metric_statistics(
        &self,
        _query: &MetricQuery,
    ) -> Result<Vec<Value>, EvidenceRetrievalError> {
        self.answer(&self.metrics)
    }

    async fn lookup_events(
        &self,
        _query: &AuditQuery,
    ) -> Result<Vec<Value>, EvidenceRetrievalError> {
        self.answer(&self.audit)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn providers(backend: StaticBackend) -> EvidenceProviders {
        EvidenceProviders::new(Arc::new(backend))
    }

    #[tokio::test]
    async fn failures_become_single_error_record() {
        let p = providers(StaticBackend::failing(EvidenceRetrievalError::Timeout));

        for records in [
            p.fetch_recent_logs("/aws/lambda/foo", 60).await,
            p.fetch_metrics("AWS/Lambda", "Errors", "FunctionName", "foo", 60).await,
            p.lookup_events(60).await,
        ] {
            assert_eq!(records.len(), 1);
            assert!(records[0].is_error());
            assert_eq!(records[0].error_message(), Some("request timed out"));
        }
    }

    #[tokio::test]
    async fn logs_are_capped_and_ordered() {
        let events: Vec<Value> = (0..150)
            .rev()
            .map(|i| json!({"timestamp": 1_700_000_000_000i64 + i, "message": format!("line {i}")}))
            .collect();
        let p = providers(StaticBackend::new().with_logs(events));

        let records = p.fetch_recent_logs("/aws/lambda/foo", 30).await;
        assert_eq!(records.len(), 100);
        assert_eq!(records[0].get("message"), Some(&json!("line 50")));
        assert_eq!(records[99].get("message"), Some(&json!("line 149")));
    }

    #[tokio::test]
    async fn capping_prefers_timestamped_events_over_untimed() {
        let mut events: Vec<Value> = (0..100)
            .map(|i| json!({"timestamp": 1_700_000_000_000i64 + i, "message": format!("t{i}")}))
            .collect();
        events.push(json!({"message": "untimed"}));
        let p = providers(StaticBackend::new().with_logs(events));

        let records = p.fetch_recent_logs("/aws/lambda/foo", 30).await;
        assert_eq!(records.len(), 100);
        assert_eq!(records[0].get("message"), Some(&json!("t0")));
        assert_eq!(records[99].get("message"), Some(&json!("t99")));
    }

    #[tokio::test]
    async fn untimed_events_fill_remaining_room() {
        let events = vec![
            json!({"message": "untimed"}),
            json!({"timestamp": 1_700_000_000_000i64, "message": "t0"}),
        ];
        let p = providers(StaticBackend::new().with_logs(events));

        let records = p.fetch_recent_logs("/aws/lambda/foo", 30).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("message"), Some(&json!("t0")));
        assert_eq!(records[1].get("message"), Some(&json!("untimed")));
    }

    #[tokio::test]
    async fn log_query_carries_window_and_limit() {
        let backend = Arc::new(StaticBackend::new());
        let p = EvidenceProviders::new(backend.clone());
        p.fetch_recent_logs("/aws/lambda/foo", 45).await;

        let queries = backend.log_queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].log_group_name, "/aws/lambda/foo");
        assert_eq!(queries[0].limit, 100);
        assert_eq!(
            queries[0].window.end_millis() - queries[0].window.start_millis(),
            45 * 60 * 1000
        );
    }

    #[tokio::test]
    async fn datapoints_are_projected_and_sorted() {
        let p = providers(StaticBackend::new().with_metrics(vec![
            json!({"Timestamp": 1_714_565_100.0, "Average": 2.0, "Maximum": 5.0, "Unit": "Count"}),
            json!({"Timestamp": 1_714_564_800.0, "Average": 1.0, "Maximum": 3.0, "Unit": "Count"}),
        ]));

        let records = p.fetch_metrics("AWS/Lambda", "Errors", "FunctionName", "foo", 60).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("average"), Some(&json!(1.0)));
        assert_eq!(records[0].get("maximum"), Some(&json!(3.0)));
        assert_eq!(records[1].get("unit"), Some(&json!("Count")));
        assert!(records[0].get("timestamp").unwrap().is_string());
    }

    #[tokio::test]
    async fn audit_events_capped_at_fifty() {
        let events: Vec<Value> = (0..80)
            .map(|i| json!({"EventTime": 1_714_564_800 + i, "EventName": "PutFunctionConcurrency"}))
            .collect();
        let p = providers(StaticBackend::new().with_audit_events(events));
        assert_eq!(p.lookup_events(60).await.len(), 50);
    }

    #[tokio::test]
    async fn empty_backend_yields_empty_lists() {
        let p = providers(StaticBackend::new());
        assert!(p.fetch_recent_logs("g", 60).await.is_empty());
        assert!(p.lookup_events(60).await.is_empty());
    }
}
