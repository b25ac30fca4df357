//! Recording errors are metrics too.
//!
//! When a value is truncated or rejected we don't tell the caller. Instead a
//! ping-lifetime counter named after the error and the offending metric is
//! bumped in every store that metric reports to, so error rates travel with
//! the data they concern.

use super::counter::accumulate;
use super::{CommonMetricData, MetricIdentity};
use crate::database::Database;
use crate::error::{ErrorType, RECORDING_ERROR_CATEGORY};
use crate::lifetime::Lifetime;
use crate::storage::Engines;
use std::convert::TryFrom;

/// The identity of the counter that tracks `error` for metric `id`.
pub fn error_identity(id: &MetricIdentity, error: ErrorType) -> MetricIdentity {
    MetricIdentity::new(
        RECORDING_ERROR_CATEGORY,
        format!("{}:{}", error.as_str(), id.full_name()),
    )
}

/// Count one recording error against the metric described by `meta`.
///
/// The caller holds the cut, so the error lands in the same ping as the
/// write it is about.
pub(crate) fn record_error(db: &Database, meta: &CommonMetricData, error: ErrorType, message: &str) {
    warn!("{}: {} ({})", meta.identity, message, error);
    let id = error_identity(&meta.identity, error);
    db.engines()
        .counters
        .record_unguarded(meta.storage_names(), Lifetime::Ping, &id, accumulate(1));
}

/// Count `lost` elements given up by `id` in `store` when a failed
/// collection was put back. The caller holds the cut exclusively.
pub(crate) fn count_lost(
    engines: &Engines,
    store: &str,
    id: &MetricIdentity,
    error: ErrorType,
    lost: usize,
) {
    warn!("{}: {} elements dropped restoring {} ({})", id, lost, store, error);
    let amount = i32::try_from(lost).unwrap_or(i32::max_value());
    engines.counters.record_unguarded(
        &[store.to_string()],
        Lifetime::Ping,
        &error_identity(id, error),
        accumulate(amount),
    );
}

/// How many `error`s were recorded for `id` in `store` since the store was
/// last collected.
pub fn test_get_num_recorded_errors(
    db: &Database,
    id: &MetricIdentity,
    error: ErrorType,
    store: &str,
) -> i32 {
    db.engines()
        .counters
        .get(store, &error_identity(id, error))
        .unwrap_or(0)
}
