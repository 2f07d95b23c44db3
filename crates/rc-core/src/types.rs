use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// IncidentDescriptor
// ---------------------------------------------------------------------------

/// Default lookback window, in minutes, when a caller does not supply one.
pub const DEFAULT_LOOKBACK_MINUTES: u32 = 60;

fn default_lookback_minutes() -> u32 {
    DEFAULT_LOOKBACK_MINUTES
}

/// The input to an investigation: which resource misbehaved and how far back
/// to look for evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentDescriptor {
    pub log_group_name: String,
    pub namespace: String,
    pub metric_name: String,
    pub dimension_name: String,
    pub dimension_value: String,
    #[serde(default = "default_lookback_minutes")]
    pub minutes_ago: u32,
}

/// Reasons an [`IncidentDescriptor`] is rejected before an investigation
/// is admitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IncidentError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("minutes_ago must be greater than zero")]
    ZeroLookback,
}

impl IncidentDescriptor {
    pub fn new(
        log_group_name: impl Into<String>,
        namespace: impl Into<String>,
        metric_name: impl Into<String>,
        dimension_name: impl Into<String>,
        dimension_value: impl Into<String>,
    ) -> Self {
        Self {
            log_group_name: log_group_name.into(),
            namespace: namespace.into(),
            metric_name: metric_name.into(),
            dimension_name: dimension_name.into(),
            dimension_value: dimension_value.into(),
            minutes_ago: DEFAULT_LOOKBACK_MINUTES,
        }
    }

    pub fn with_minutes_ago(mut self, minutes_ago: u32) -> Self {
        self.minutes_ago = minutes_ago;
        self
    }

    /// Check the descriptor invariants: non-empty identifiers and a
    /// positive lookback window.
    pub fn validate(&self) -> Result<(), IncidentError> {
        let fields = [
            ("log_group_name", &self.log_group_name),
            ("namespace", &self.namespace),
            ("metric_name", &self.metric_name),
            ("dimension_name", &self.dimension_name),
            ("dimension_value", &self.dimension_value),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(IncidentError::EmptyField(name));
            }
        }
        if self.minutes_ago == 0 {
            return Err(IncidentError::ZeroLookback);
        }
        Ok(())
    }

    /// The window `[now - minutes_ago, now]` this incident covers.
    pub fn window(&self) -> LookbackWindow {
        LookbackWindow::ending_now(self.minutes_ago)
    }

    /// Render the descriptor as `key: value` lines for prompt context.
    pub fn describe(&self) -> String {
        format!(
            "log_group_name: {}\nnamespace: {}\nmetric_name: {}\ndimension_name: {}\ndimension_value: {}\nminutes_ago: {}",
            self.log_group_name,
            self.namespace,
            self.metric_name,
            self.dimension_name,
            self.dimension_value,
            self.minutes_ago,
        )
    }
}

// ---------------------------------------------------------------------------
// LookbackWindow
// ---------------------------------------------------------------------------

/// A closed time range used for every evidence query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookbackWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl LookbackWindow {
    pub fn ending_now(minutes: u32) -> Self {
        Self::ending_at(Utc::now(), minutes)
    }

    pub fn ending_at(end: DateTime<Utc>, minutes: u32) -> Self {
        Self {
            start: end - Duration::minutes(i64::from(minutes)),
            end,
        }
    }

    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }
}

// ---------------------------------------------------------------------------
// EvidenceRecord
// ---------------------------------------------------------------------------

/// Field name that marks a record as a retrieval failure.
pub const ERROR_FIELD: &str = "error";

/// Field names, in priority order, that carry a record's occurrence time.
const TIMESTAMP_FIELDS: [&str; 4] = ["timestamp", "Timestamp", "EventTime", "eventTime"];

/// One raw observation: a log event, a metric datapoint, an audit event, or
/// an error marker standing in for evidence that could not be fetched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceRecord(serde_json::Map<String, serde_json::Value>);

impl EvidenceRecord {
    pub fn new(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(fields)
    }

    /// Build a record from a JSON value. Non-object values are kept under a
    /// single `value` field so no evidence is dropped.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self(map),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                Self(map)
            }
        }
    }

    /// A record with a single `error` field.
    pub fn error(message: impl Into<String>) -> Self {
        let mut map = serde_json::Map::new();
        map.insert(
            ERROR_FIELD.to_string(),
            serde_json::Value::String(message.into()),
        );
        Self(map)
    }

    pub fn is_error(&self) -> bool {
        self.0.len() == 1 && self.0.contains_key(ERROR_FIELD)
    }

    pub fn error_message(&self) -> Option<&str> {
        if self.is_error() {
            self.0.get(ERROR_FIELD).and_then(|v| v.as_str())
        } else {
            None
        }
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: serde_json::Value) {
        self.0.insert(field.into(), value);
    }

    pub fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }

    /// Reconstruct the occurrence time, if the record carries one.
    ///
    /// Numbers above 10^11 are epoch milliseconds, smaller numbers are epoch
    /// seconds (fractional allowed); strings must be RFC 3339.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        TIMESTAMP_FIELDS
            .iter()
            .filter_map(|field| self.0.get(*field))
            .find_map(parse_timestamp)
    }
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => {
            let raw = n.as_f64()?;
            if raw.abs() >= 1e11 {
                Utc.timestamp_millis_opt(raw as i64).single()
            } else {
                let millis = (raw * 1000.0).round() as i64;
                Utc.timestamp_millis_opt(millis).single()
            }
        }
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Sort records by occurrence time, oldest first. Records without a
/// timestamp keep their relative order and sort after timestamped ones.
pub fn sort_by_occurrence(records: &mut [EvidenceRecord]) {
    records.sort_by_key(|r| match r.occurred_at() {
        Some(ts) => (0u8, ts.timestamp_millis()),
        None => (1u8, 0),
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
