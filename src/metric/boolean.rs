use super::{CommonMetricData, MetricKind, MetricType};
use crate::database::Database;

/// A flag. Last write wins.
#[derive(Debug, Clone)]
pub struct BooleanMetric {
    meta: CommonMetricData,
}

impl BooleanMetric {
    /// Make a handle for the metric described by `meta`.
    pub fn new(meta: CommonMetricData) -> BooleanMetric {
        BooleanMetric { meta }
    }

    /// Set the flag.
    pub fn set(&self, db: &Database, value: bool) {
        if !self.should_record(db) {
            return;
        }
        db.engines().booleans.record(
            self.meta.storage_names(),
            self.meta.lifetime,
            &self.meta.identity,
            value,
        );
    }

    /// The stored flag in `store`.
    pub fn test_get_value(&self, db: &Database, store: &str) -> Option<bool> {
        db.engines().booleans.get(store, &self.meta.identity)
    }
}

impl MetricType for BooleanMetric {
    type Input = bool;

    fn kind(&self) -> MetricKind {
        MetricKind::Boolean
    }

    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    fn record(&self, db: &Database, value: bool) {
        self.set(db, value)
    }
}
