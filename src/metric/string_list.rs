use super::{record_error, CommonMetricData, MetricKind, MetricType};
use crate::database::Database;
use crate::error::ErrorType;
use crate::storage::{replace, MergeOutcome};
use crate::validate::{validate_list_len, validate_string, Validation, MAX_LIST_ITEMS, MAX_STRING_BYTES};

/// A list of strings.
///
/// Each item is held to `MAX_STRING_BYTES` like a string metric. The list
/// holds at most `MAX_LIST_ITEMS` items; anything past that is turned away
/// and counted as `invalid_value`.
#[derive(Debug, Clone)]
pub struct StringListMetric {
    meta: CommonMetricData,
}

impl StringListMetric {
    /// Make a handle for the metric described by `meta`.
    pub fn new(meta: CommonMetricData) -> StringListMetric {
        StringListMetric { meta }
    }

    /// Append one item.
    pub fn add<S>(&self, db: &Database, value: S)
    where
        S: Into<String>,
    {
        if !self.should_record(db) {
            return;
        }
        let _cut = match db.engines().hold() {
            Some(guard) => guard,
            None => return,
        };
        let item = match self.fit_item(db, value.into()) {
            Some(item) => item,
            None => return,
        };
        let outcome = db.engines().string_lists.record_unguarded(
            self.meta.storage_names(),
            self.meta.lifetime,
            &self.meta.identity,
            |old| {
                let mut list = old.unwrap_or_default();
                if list.len() >= MAX_LIST_ITEMS {
                    return (list, MergeOutcome::Overflowed);
                }
                list.push(item.clone());
                (list, MergeOutcome::Clean)
            },
        );
        if outcome == MergeOutcome::Overflowed {
            record_error(
                db,
                &self.meta,
                ErrorType::InvalidValue,
                &format!("list already holds {} items", MAX_LIST_ITEMS),
            );
        }
    }

    /// Replace the whole list.
    pub fn set(&self, db: &Database, values: Vec<String>) {
        if !self.should_record(db) {
            return;
        }
        let _cut = match db.engines().hold() {
            Some(guard) => guard,
            None => return,
        };
        let (values, dropped) = validate_list_len(values, MAX_LIST_ITEMS);
        let values: Vec<String> = values
            .into_iter()
            .filter_map(|v| self.fit_item(db, v))
            .collect();
        db.engines().string_lists.record_unguarded(
            self.meta.storage_names(),
            self.meta.lifetime,
            &self.meta.identity,
            replace(values),
        );
        if let Some(error) = dropped {
            record_error(
                db,
                &self.meta,
                error,
                &format!("list truncated to {} items", MAX_LIST_ITEMS),
            );
        }
    }

    /// The stored list in `store`.
    pub fn test_get_value(&self, db: &Database, store: &str) -> Option<Vec<String>> {
        db.engines().string_lists.get(store, &self.meta.identity)
    }

    // Caller holds the cut.
    fn fit_item(&self, db: &Database, item: String) -> Option<String> {
        let validation = validate_string(item, MAX_STRING_BYTES);
        if let Validation::Truncated { original_size, .. } = validation {
            record_error(
                db,
                &self.meta,
                ErrorType::InvalidOverflow,
                &format!("item of {} bytes truncated to {}", original_size, MAX_STRING_BYTES),
            );
        }
        validation.into_value()
    }
}

impl MetricType for StringListMetric {
    type Input = Vec<String>;

    fn kind(&self) -> MetricKind {
        MetricKind::StringList
    }

    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    fn record(&self, db: &Database, values: Vec<String>) {
        self.set(db, values)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::lifetime::Lifetime;
    use crate::metric::test_get_num_recorded_errors;

    fn list() -> StringListMetric {
        StringListMetric::new(CommonMetricData::new(
            "prefs",
            "locales",
            Lifetime::Application,
            vec!["metrics".into()],
        ))
    }

    #[test]
    fn add_appends() {
        let db = Database::new(Config::default()).unwrap();
        let m = list();
        m.add(&db, "en-US");
        m.add(&db, "de");
        assert_eq!(
            Some(vec!["en-US".to_string(), "de".to_string()]),
            m.test_get_value(&db, "metrics")
        );
    }

    #[test]
    fn full_list_rejects_further_items() {
        let db = Database::new(Config::default()).unwrap();
        let m = list();
        for i in 0..MAX_LIST_ITEMS + 3 {
            m.add(&db, format!("item{}", i));
        }
        let stored = m.test_get_value(&db, "metrics").unwrap();
        assert_eq!(MAX_LIST_ITEMS, stored.len());
        assert_eq!("item19", stored[MAX_LIST_ITEMS - 1]);
        assert_eq!(
            3,
            test_get_num_recorded_errors(&db, m.identity(), ErrorType::InvalidValue, "metrics")
        );
    }

    #[test]
    fn set_truncates_items_and_length() {
        let db = Database::new(Config::default()).unwrap();
        let m = list();
        let mut values: Vec<String> = (0..25).map(|i| format!("{}", i)).collect();
        values[0] = "y".repeat(70);
        m.set(&db, values);
        let stored = m.test_get_value(&db, "metrics").unwrap();
        assert_eq!(MAX_LIST_ITEMS, stored.len());
        assert_eq!(MAX_STRING_BYTES, stored[0].len());
        assert_eq!(
            1,
            test_get_num_recorded_errors(&db, m.identity(), ErrorType::InvalidValue, "metrics")
        );
        assert_eq!(
            1,
            test_get_num_recorded_errors(&db, m.identity(), ErrorType::InvalidOverflow, "metrics")
        );
    }
}
