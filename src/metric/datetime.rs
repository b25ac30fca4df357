use super::{CommonMetricData, MetricKind, MetricType};
use crate::database::Database;
use crate::time;
use chrono::{DateTime, FixedOffset};

/// Precision a datetime metric is kept at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    /// Full nanosecond precision.
    Nanosecond,
    /// Truncated to microseconds.
    Microsecond,
    /// Truncated to milliseconds.
    Millisecond,
    /// Truncated to seconds.
    Second,
    /// Truncated to minutes.
    Minute,
    /// Truncated to hours.
    Hour,
    /// Truncated to days.
    Day,
}

impl TimeUnit {
    /// `strftime` pattern that renders a datetime at this precision.
    pub fn format_pattern(self) -> &'static str {
        match self {
            TimeUnit::Nanosecond => "%Y-%m-%dT%H:%M:%S%.9f%:z",
            TimeUnit::Microsecond => "%Y-%m-%dT%H:%M:%S%.6f%:z",
            TimeUnit::Millisecond => "%Y-%m-%dT%H:%M:%S%.3f%:z",
            TimeUnit::Second => "%Y-%m-%dT%H:%M:%S%:z",
            TimeUnit::Minute => "%Y-%m-%dT%H:%M%:z",
            TimeUnit::Hour => "%Y-%m-%dT%H%:z",
            TimeUnit::Day => "%Y-%m-%d%:z",
        }
    }

    /// Render `value` truncated to this precision.
    pub fn format(self, value: &DateTime<FixedOffset>) -> String {
        value.format(self.format_pattern()).to_string()
    }
}

impl Default for TimeUnit {
    fn default() -> TimeUnit {
        TimeUnit::Millisecond
    }
}

/// A point in time, stored as an RFC 3339-like string truncated to
/// `time_unit`. The UTC offset is always kept.
#[derive(Debug, Clone)]
pub struct DatetimeMetric {
    meta: CommonMetricData,
    time_unit: TimeUnit,
}

impl DatetimeMetric {
    /// Make a handle for the metric described by `meta`.
    pub fn new(meta: CommonMetricData, time_unit: TimeUnit) -> DatetimeMetric {
        DatetimeMetric { meta, time_unit }
    }

    /// The precision values are kept at.
    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// Set the datetime. `None` means now, in the local offset.
    pub fn set(&self, db: &Database, value: Option<DateTime<FixedOffset>>) {
        if !self.should_record(db) {
            return;
        }
        let value = value.unwrap_or_else(time::now);
        db.engines().datetimes.record(
            self.meta.storage_names(),
            self.meta.lifetime,
            &self.meta.identity,
            self.time_unit.format(&value),
        );
    }

    /// The stored, truncated datetime in `store`.
    pub fn test_get_value(&self, db: &Database, store: &str) -> Option<String> {
        db.engines().datetimes.get(store, &self.meta.identity)
    }
}

impl MetricType for DatetimeMetric {
    type Input = Option<DateTime<FixedOffset>>;

    fn kind(&self) -> MetricKind {
        MetricKind::Datetime
    }

    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    fn record(&self, db: &Database, value: Option<DateTime<FixedOffset>>) {
        self.set(db, value)
    }
}
