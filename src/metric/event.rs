use super::{record_error, CommonMetricData, MetricKind, MetricType};
use crate::config::EventLimits;
use crate::database::Database;
use crate::error::{Error, ErrorType};
use crate::storage::{MergeOutcome, StoredValue};
use crate::time;
use crate::validate::{validate_string, Validation, MAX_EXTRA_VALUE_BYTES};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Milliseconds on the monotonic clock since the process started.
    /// Rebased so the first event of a payload is at 0 when the payload is
    /// assembled.
    pub timestamp: u64,
    /// Category of the event metric.
    pub category: String,
    /// Name of the event metric.
    pub name: String,
    /// Extra key/value pairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<BTreeMap<String, String>>,
}

impl StoredValue for Vec<RecordedEvent> {
    /// Concatenates, older events first, with no bound. A database restores
    /// its event engine through `reconcile_bounded` instead.
    fn reconcile(mut taken: Vec<RecordedEvent>, newer: Vec<RecordedEvent>) -> (Vec<RecordedEvent>, usize) {
        taken.extend(newer);
        (taken, 0)
    }
}

/// What to do with an event once its cell holds `max-events` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest event to make room.
    DropOldest,
    /// Discard the new event.
    Reject,
}

impl Default for OverflowPolicy {
    fn default() -> OverflowPolicy {
        OverflowPolicy::DropOldest
    }
}

impl FromStr for OverflowPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<OverflowPolicy, Error> {
        match s {
            "drop-oldest" => Ok(OverflowPolicy::DropOldest),
            "reject" => Ok(OverflowPolicy::Reject),
            other => Err(Error::Config(format!(
                "unknown event-overflow policy {:?}, expected \"drop-oldest\" or \"reject\"",
                other
            ))),
        }
    }
}

/// Append `event` to a cell holding at most `max_events` events.
pub(crate) fn append_bounded(
    max_events: usize,
    policy: OverflowPolicy,
    event: RecordedEvent,
) -> impl FnMut(Option<Vec<RecordedEvent>>) -> (Vec<RecordedEvent>, MergeOutcome) {
    move |old| {
        let mut events = old.unwrap_or_default();
        if events.len() < max_events {
            events.push(event.clone());
            return (events, MergeOutcome::Clean);
        }
        match policy {
            OverflowPolicy::DropOldest => {
                let surplus = events.len() + 1 - max_events;
                events.drain(..surplus.min(events.len()));
                if max_events > 0 {
                    events.push(event.clone());
                }
            }
            OverflowPolicy::Reject => {}
        }
        (events, MergeOutcome::Overflowed)
    }
}

/// Reconcile an event cell with the events recorded after it was taken,
/// keeping it within `limits`. Returns how many events were dropped.
pub(crate) fn reconcile_bounded(
    limits: EventLimits,
) -> impl FnMut(Vec<RecordedEvent>, Vec<RecordedEvent>) -> (Vec<RecordedEvent>, usize) {
    move |mut taken, newer| {
        taken.extend(newer);
        let surplus = taken.len().saturating_sub(limits.max_events);
        match limits.overflow {
            OverflowPolicy::DropOldest => {
                taken.drain(..surplus);
            }
            OverflowPolicy::Reject => taken.truncate(limits.max_events),
        }
        (taken, surplus)
    }
}

/// A sequence of timestamped events with optional extras.
///
/// Events always have ping lifetime; the registry refuses anything else.
#[derive(Debug, Clone)]
pub struct EventMetric {
    meta: CommonMetricData,
    allowed_extra_keys: Vec<String>,
}

impl EventMetric {
    /// Make a handle for the metric described by `meta`, accepting extras
    /// under `allowed_extra_keys` only.
    pub fn new(meta: CommonMetricData, allowed_extra_keys: Vec<String>) -> EventMetric {
        EventMetric {
            meta,
            allowed_extra_keys,
        }
    }

    /// Keys that may appear in an event's extras.
    pub fn allowed_extra_keys(&self) -> &[String] {
        &self.allowed_extra_keys
    }

    /// Record one event, now.
    ///
    /// An extra under an undeclared key drops the whole event and counts as
    /// `invalid_value`. Extra values longer than `MAX_EXTRA_VALUE_BYTES` are
    /// truncated and count as `invalid_overflow`. So does a full cell,
    /// whatever the database's overflow policy does about it.
    pub fn record_event(&self, db: &Database, extra: Option<HashMap<String, String>>) {
        if !self.should_record(db) {
            return;
        }
        let timestamp = time::elapsed_ms();
        let _cut = match db.engines().hold() {
            Some(guard) => guard,
            None => return,
        };

        let extra = match extra {
            Some(extra) => match self.validate_extra(db, extra) {
                Some(extra) => Some(extra),
                None => return,
            },
            None => None,
        };

        let event = RecordedEvent {
            timestamp,
            category: self.meta.identity.category.clone(),
            name: self.meta.identity.name.clone(),
            extra,
        };
        let limits = db.event_limits();
        let outcome = db.engines().events.record_unguarded(
            self.meta.storage_names(),
            self.meta.lifetime,
            &self.meta.identity,
            append_bounded(limits.max_events, limits.overflow, event),
        );
        if outcome == MergeOutcome::Overflowed {
            record_error(
                db,
                &self.meta,
                ErrorType::InvalidOverflow,
                &format!("more than {} events, {:?}", limits.max_events, limits.overflow),
            );
        }
    }

    /// The events stored in `store`, oldest first.
    pub fn test_get_value(&self, db: &Database, store: &str) -> Option<Vec<RecordedEvent>> {
        db.engines().events.get(store, &self.meta.identity)
    }

    // Caller holds the cut.
    fn validate_extra(
        &self,
        db: &Database,
        extra: HashMap<String, String>,
    ) -> Option<BTreeMap<String, String>> {
        let mut validated = BTreeMap::new();
        for (key, value) in extra {
            if !self.allowed_extra_keys.iter().any(|k| *k == key) {
                record_error(
                    db,
                    &self.meta,
                    ErrorType::InvalidValue,
                    &format!("undeclared extra key {:?}", key),
                );
                return None;
            }
            let validation = validate_string(value, MAX_EXTRA_VALUE_BYTES);
            if let Validation::Truncated { original_size, .. } = validation {
                record_error(
                    db,
                    &self.meta,
                    ErrorType::InvalidOverflow,
                    &format!(
                        "extra {:?} of {} bytes truncated to {}",
                        key, original_size, MAX_EXTRA_VALUE_BYTES
                    ),
                );
            }
            if let Some(value) = validation.into_value() {
                validated.insert(key, value);
            }
        }
        Some(validated)
    }
}

impl MetricType for EventMetric {
    type Input = Option<HashMap<String, String>>;

    fn kind(&self) -> MetricKind {
        MetricKind::Event
    }

    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    fn record(&self, db: &Database, extra: Option<HashMap<String, String>>) {
        self.record_event(db, extra)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::lifetime::Lifetime;
    use crate::metric::test_get_num_recorded_errors;

    fn click() -> EventMetric {
        EventMetric::new(
            CommonMetricData::new("ui", "click", Lifetime::Ping, vec!["events".into()]),
            vec!["target".into()],
        )
    }

    fn db_with(max_events: usize, policy: OverflowPolicy) -> Database {
        let mut config = Config::default();
        config.max_events = max_events;
        config.event_overflow = policy;
        Database::new(config).unwrap()
    }

    fn extra(key: &str, value: &str) -> Option<HashMap<String, String>> {
        let mut map = HashMap::new();
        map.insert(key.to_string(), value.to_string());
        Some(map)
    }

    #[test]
    fn policy_from_str() {
        assert_eq!(OverflowPolicy::DropOldest, "drop-oldest".parse().unwrap());
        assert_eq!(OverflowPolicy::Reject, "reject".parse().unwrap());
        assert!("newest".parse::<OverflowPolicy>().is_err());
    }

    #[test]
    fn events_keep_their_extras() {
        let db = db_with(500, OverflowPolicy::DropOldest);
        let m = click();
        m.record_event(&db, extra("target", "reload"));
        m.record_event(&db, None);
        let events = m.test_get_value(&db, "events").unwrap();
        assert_eq!(2, events.len());
        assert_eq!("ui", events[0].category);
        assert_eq!(
            Some(&"reload".to_string()),
            events[0].extra.as_ref().and_then(|e| e.get("target"))
        );
        assert_eq!(None, events[1].extra);
        assert!(events[0].timestamp <= events[1].timestamp);
    }

    #[test]
    fn undeclared_keys_drop_the_event() {
        let db = db_with(500, OverflowPolicy::DropOldest);
        let m = click();
        m.record_event(&db, extra("elsewhere", "x"));
        assert_eq!(None, m.test_get_value(&db, "events"));
        assert_eq!(
            1,
            test_get_num_recorded_errors(&db, m.identity(), ErrorType::InvalidValue, "events")
        );
    }

    #[test]
    fn long_extras_are_truncated() {
        let db = db_with(500, OverflowPolicy::DropOldest);
        let m = click();
        m.record_event(&db, extra("target", &"z".repeat(150)));
        let events = m.test_get_value(&db, "events").unwrap();
        let value = &events[0].extra.as_ref().unwrap()["target"];
        assert_eq!(MAX_EXTRA_VALUE_BYTES, value.len());
        assert_eq!(
            1,
            test_get_num_recorded_errors(&db, m.identity(), ErrorType::InvalidOverflow, "events")
        );
    }

    #[test]
    fn drop_oldest_keeps_the_newest() {
        let db = db_with(3, OverflowPolicy::DropOldest);
        let m = click();
        for i in 0..5 {
            m.record_event(&db, extra("target", &i.to_string()));
        }
        let events = m.test_get_value(&db, "events").unwrap();
        let targets: Vec<&str> = events
            .iter()
            .map(|e| e.extra.as_ref().unwrap()["target"].as_str())
            .collect();
        assert_eq!(vec!["2", "3", "4"], targets);
        assert_eq!(
            2,
            test_get_num_recorded_errors(&db, m.identity(), ErrorType::InvalidOverflow, "events")
        );
    }

    #[test]
    fn reject_keeps_the_oldest() {
        let db = db_with(3, OverflowPolicy::Reject);
        let m = click();
        for i in 0..5 {
            m.record_event(&db, extra("target", &i.to_string()));
        }
        let events = m.test_get_value(&db, "events").unwrap();
        let targets: Vec<&str> = events
            .iter()
            .map(|e| e.extra.as_ref().unwrap()["target"].as_str())
            .collect();
        assert_eq!(vec!["0", "1", "2"], targets);
        assert_eq!(
            2,
            test_get_num_recorded_errors(&db, m.identity(), ErrorType::InvalidOverflow, "events")
        );
    }
}
