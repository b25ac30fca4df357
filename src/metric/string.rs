use super::{record_error, CommonMetricData, MetricKind, MetricType};
use crate::database::Database;
use crate::storage::replace;
use crate::validate::{validate_string, Validation, MAX_STRING_BYTES};

/// A single string value, at most `MAX_STRING_BYTES` UTF-8 bytes long.
///
/// Longer values are cut down on a character boundary and the cut is counted
/// as `invalid_overflow`. The caller never hears about it.
#[derive(Debug, Clone)]
pub struct StringMetric {
    meta: CommonMetricData,
}

impl StringMetric {
    /// Make a handle for the metric described by `meta`.
    pub fn new(meta: CommonMetricData) -> StringMetric {
        StringMetric { meta }
    }

    /// Set the string, replacing any previous value.
    pub fn set<S>(&self, db: &Database, value: S)
    where
        S: Into<String>,
    {
        if !self.should_record(db) {
            return;
        }
        let validation = validate_string(value.into(), MAX_STRING_BYTES);
        let original_size = match validation {
            Validation::Truncated { original_size, .. } => Some(original_size),
            _ => None,
        };
        let _cut = match db.engines().hold() {
            Some(guard) => guard,
            None => return,
        };
        if let Some(value) = validation.into_value() {
            db.engines().strings.record_unguarded(
                self.meta.storage_names(),
                self.meta.lifetime,
                &self.meta.identity,
                replace(value),
            );
        }
        if let Some(size) = original_size {
            record_error(
                db,
                &self.meta,
                crate::error::ErrorType::InvalidOverflow,
                &format!("value of {} bytes truncated to {}", size, MAX_STRING_BYTES),
            );
        }
    }

    /// The stored string in `store`.
    pub fn test_get_value(&self, db: &Database, store: &str) -> Option<String> {
        db.engines().strings.get(store, &self.meta.identity)
    }
}

impl MetricType for StringMetric {
    type Input = String;

    fn kind(&self) -> MetricKind {
        MetricKind::String
    }

    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    fn record(&self, db: &Database, value: String) {
        self.set(db, value)
    }
}
