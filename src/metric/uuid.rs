use super::{record_error, CommonMetricData, MetricKind, MetricType};
use crate::database::Database;
use crate::validate::validate_uuid;
use ::uuid::Uuid;

/// A UUID, stored in its hyphenated form.
#[derive(Debug, Clone)]
pub struct UuidMetric {
    meta: CommonMetricData,
}

impl UuidMetric {
    /// Make a handle for the metric described by `meta`.
    pub fn new(meta: CommonMetricData) -> UuidMetric {
        UuidMetric { meta }
    }

    /// Set the UUID.
    pub fn set(&self, db: &Database, value: Uuid) {
        if !self.should_record(db) {
            return;
        }
        db.engines().uuids.record(
            self.meta.storage_names(),
            self.meta.lifetime,
            &self.meta.identity,
            value.hyphenated().to_string(),
        );
    }

    /// Parse and set a textual UUID. Text that doesn't parse is counted as
    /// `invalid_value`.
    pub fn set_from_str(&self, db: &Database, value: &str) {
        if !self.should_record(db) {
            return;
        }
        let validation = validate_uuid(value);
        let error = validation.error();
        match validation.into_value() {
            Some(uuid) => self.set(db, uuid),
            None => {
                if let (Some(error), Some(_cut)) = (error, db.engines().hold()) {
                    record_error(db, &self.meta, error, &format!("unparseable uuid {:?}", value));
                }
            }
        }
    }

    /// Generate a random v4 UUID, store it and return it.
    pub fn generate_and_set(&self, db: &Database) -> Uuid {
        let uuid = Uuid::new_v4();
        self.set(db, uuid);
        uuid
    }

    /// The stored UUID in `store`.
    pub fn test_get_value(&self, db: &Database, store: &str) -> Option<Uuid> {
        db.engines()
            .uuids
            .get(store, &self.meta.identity)
            .and_then(|s| Uuid::parse_str(&s).ok())
    }
}

impl MetricType for UuidMetric {
    type Input = Uuid;

    fn kind(&self) -> MetricKind {
        MetricKind::Uuid
    }

    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    fn record(&self, db: &Database, value: Uuid) {
        self.set(db, value)
    }
}
