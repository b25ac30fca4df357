use super::{record_error, CommonMetricData, MetricKind, MetricType};
use crate::database::Database;
use crate::error::ErrorType;
use crate::storage::MergeOutcome;
use crate::validate::validate_count;

/// Merge function for counters: saturating add.
///
/// A counter that would pass `i32::MAX` sticks there and reports
/// `MergeOutcome::Overflowed`; it never wraps.
pub(crate) fn accumulate(amount: i32) -> impl FnMut(Option<i32>) -> (i32, MergeOutcome) {
    move |old| match old.unwrap_or(0).checked_add(amount) {
        Some(total) => (total, MergeOutcome::Clean),
        None => (i32::max_value(), MergeOutcome::Overflowed),
    }
}

/// A monotonically increasing count.
#[derive(Debug, Clone)]
pub struct CounterMetric {
    meta: CommonMetricData,
}

impl CounterMetric {
    /// Make a handle for the metric described by `meta`.
    pub fn new(meta: CommonMetricData) -> CounterMetric {
        CounterMetric { meta }
    }

    /// Increase the counter by `amount`.
    ///
    /// Amounts of zero or less are rejected and counted as `invalid_value`.
    /// Saturation is counted as `invalid_overflow`.
    pub fn add(&self, db: &Database, amount: i32) {
        if !self.should_record(db) {
            return;
        }
        let _cut = match db.engines().hold() {
            Some(guard) => guard,
            None => return,
        };
        let amount = match validate_count(amount).into_value() {
            Some(amount) => amount,
            None => {
                record_error(
                    db,
                    &self.meta,
                    ErrorType::InvalidValue,
                    &format!("added negative or zero value {}", amount),
                );
                return;
            }
        };
        let outcome = db.engines().counters.record_unguarded(
            self.meta.storage_names(),
            self.meta.lifetime,
            &self.meta.identity,
            accumulate(amount),
        );
        if outcome == MergeOutcome::Overflowed {
            record_error(db, &self.meta, ErrorType::InvalidOverflow, "counter saturated");
        }
    }

    /// The current count in `store`.
    pub fn test_get_value(&self, db: &Database, store: &str) -> Option<i32> {
        db.engines().counters.get(store, &self.meta.identity)
    }
}

impl MetricType for CounterMetric {
    type Input = i32;

    fn kind(&self) -> MetricKind {
        MetricKind::Counter
    }

    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    fn record(&self, db: &Database, amount: i32) {
        self.add(db, amount)
    }
}
