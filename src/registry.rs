//! Metric definitions.
//!
//! Instead of one generated type per metric, metrics are declared as data:
//! `[[metric]]` tables in a TOML document, each naming a kind, a lifetime and
//! the stores the metric reports to. The registry checks the definitions once
//! and hands out typed handles by name.
//!
//! ```toml
//! [[metric]]
//! category = "search"
//! name = "engine"
//! type = "string"
//! lifetime = "application"
//! send_in_pings = ["metrics", "baseline"]
//! ```

use crate::database::INTERNAL_STORE;
use crate::error::{Error, RECORDING_ERROR_CATEGORY};
use crate::lifetime::Lifetime;
use crate::metric::{
    BooleanMetric, CommonMetricData, CounterMetric, DatetimeMetric, EventMetric, MetricIdentity,
    MetricKind, StringListMetric, StringMetric, TimeUnit, UuidMetric,
};
use std::collections::BTreeMap;

/// The store non-event metrics report to unless told otherwise.
pub const DEFAULT_STORE: &str = "metrics";
/// The store event metrics report to unless told otherwise.
pub const DEFAULT_EVENT_STORE: &str = "events";

fn default_lifetime() -> Lifetime {
    Lifetime::Ping
}

/// One `[[metric]]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricDefinition {
    /// Dotted category. May be empty.
    #[serde(default)]
    pub category: String,
    /// Name within the category.
    pub name: String,
    /// The metric kind, spelled as in `MetricKind::as_str`.
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Defaults to `ping`.
    #[serde(default = "default_lifetime")]
    pub lifetime: Lifetime,
    /// Stores to report to. Omitted means the default store of the kind;
    /// an explicitly empty list is an error.
    #[serde(default)]
    pub send_in_pings: Option<Vec<String>>,
    /// Disabled metrics never record.
    #[serde(default)]
    pub disabled: bool,
    /// Datetime precision. Only meaningful for datetimes.
    #[serde(default)]
    pub time_unit: Option<TimeUnit>,
    /// Extra keys an event may carry. Only meaningful for events.
    #[serde(default)]
    pub allowed_extra_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Schema {
    #[serde(default)]
    metric: Vec<MetricDefinition>,
}

/// A checked definition.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredMetric {
    /// The metric kind.
    pub kind: MetricKind,
    /// Identity and metadata.
    pub meta: CommonMetricData,
    /// Datetime precision.
    pub time_unit: TimeUnit,
    /// Event extra keys.
    pub allowed_extra_keys: Vec<String>,
}

impl RegisteredMetric {
    fn check(def: MetricDefinition) -> Result<RegisteredMetric, Error> {
        let id = MetricIdentity::new(def.category.clone(), def.name.clone());
        if def.name.is_empty() {
            return Err(Error::Registry(format!(
                "metric in category {:?} has an empty name",
                def.category
            )));
        }
        if def.category == RECORDING_ERROR_CATEGORY {
            return Err(Error::Registry(format!(
                "{} uses the reserved category {}",
                id, RECORDING_ERROR_CATEGORY
            )));
        }
        if def.kind == MetricKind::Event && def.lifetime != Lifetime::Ping {
            return Err(Error::Registry(format!(
                "event {} must have ping lifetime, not {}",
                id, def.lifetime
            )));
        }
        if def.time_unit.is_some() && def.kind != MetricKind::Datetime {
            warn!("{} is a {}, ignoring its time_unit", id, def.kind);
        }
        if !def.allowed_extra_keys.is_empty() && def.kind != MetricKind::Event {
            warn!("{} is a {}, ignoring its allowed_extra_keys", id, def.kind);
        }
        let send_in_pings = match def.send_in_pings {
            None if def.kind == MetricKind::Event => vec![DEFAULT_EVENT_STORE.to_string()],
            None => vec![DEFAULT_STORE.to_string()],
            Some(ref pings) if pings.is_empty() => {
                return Err(Error::Registry(format!("{} has an empty send_in_pings", id)))
            }
            Some(pings) => pings,
        };
        if let Some(bad) = send_in_pings.iter().find(|s| s.is_empty() || *s == INTERNAL_STORE) {
            return Err(Error::Registry(format!("{} may not report to store {:?}", id, bad)));
        }
        let mut meta = CommonMetricData::new(def.category, def.name, def.lifetime, send_in_pings);
        meta.disabled = def.disabled;
        Ok(RegisteredMetric {
            kind: def.kind,
            meta,
            time_unit: def.time_unit.unwrap_or_default(),
            allowed_extra_keys: def.allowed_extra_keys,
        })
    }
}

/// Every known metric, by identity.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    metrics: BTreeMap<MetricIdentity, RegisteredMetric>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Load every `[[metric]]` table of a TOML document. Other keys are
    /// ignored.
    pub fn from_toml(buffer: &str) -> Result<Registry, Error> {
        let schema: Schema = toml::from_str(buffer)?;
        let mut registry = Registry::new();
        for def in schema.metric {
            registry.register(def)?;
        }
        Ok(registry)
    }

    /// Add a definition.
    ///
    /// Registering the same definition twice is harmless. Registering an
    /// identity again with a different kind or metadata is an error, and
    /// the first definition stays. So is a second identity with the same
    /// full name, such as `a.b` / `c` next to `a` / `b.c`: payloads and error
    /// counters are keyed by full name.
    pub fn register(&mut self, def: MetricDefinition) -> Result<&RegisteredMetric, Error> {
        let checked = RegisteredMetric::check(def)?;
        let id = checked.meta.identity.clone();
        let full_name = id.full_name();
        if let Some(other) = self
            .metrics
            .keys()
            .find(|other| **other != id && other.full_name() == full_name)
        {
            return Err(Error::Registry(format!(
                "{:?}/{:?} and {:?}/{:?} are both reported as {}",
                other.category, other.name, id.category, id.name, full_name
            )));
        }
        if let Some(existing) = self.metrics.get(&id) {
            if *existing != checked {
                return Err(Error::Registry(format!(
                    "{} is already registered as a {} with different metadata",
                    id, existing.kind
                )));
            }
        }
        Ok(self.metrics.entry(id).or_insert(checked))
    }

    /// The definition of `category.name`.
    pub fn get(&self, category: &str, name: &str) -> Option<&RegisteredMetric> {
        self.metrics.get(&MetricIdentity::new(category, name))
    }

    /// Every definition, ordered by identity.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredMetric> {
        self.metrics.values()
    }

    /// How many metrics are registered.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    fn lookup(&self, category: &str, name: &str, kind: MetricKind) -> Result<&RegisteredMetric, Error> {
        match self.get(category, name) {
            Some(m) if m.kind == kind => Ok(m),
            Some(m) => Err(Error::Registry(format!(
                "{} is a {}, not a {}",
                m.meta.identity, m.kind, kind
            ))),
            None => Err(Error::Registry(format!(
                "{} is not registered",
                MetricIdentity::new(category, name)
            ))),
        }
    }

    /// Handle for a registered boolean.
    pub fn boolean(&self, category: &str, name: &str) -> Result<BooleanMetric, Error> {
        self.lookup(category, name, MetricKind::Boolean)
            .map(|m| BooleanMetric::new(m.meta.clone()))
    }

    /// Handle for a registered string.
    pub fn string(&self, category: &str, name: &str) -> Result<StringMetric, Error> {
        self.lookup(category, name, MetricKind::String)
            .map(|m| StringMetric::new(m.meta.clone()))
    }

    /// Handle for a registered string list.
    pub fn string_list(&self, category: &str, name: &str) -> Result<StringListMetric, Error> {
        self.lookup(category, name, MetricKind::StringList)
            .map(|m| StringListMetric::new(m.meta.clone()))
    }

    /// Handle for a registered counter.
    pub fn counter(&self, category: &str, name: &str) -> Result<CounterMetric, Error> {
        self.lookup(category, name, MetricKind::Counter)
            .map(|m| CounterMetric::new(m.meta.clone()))
    }

    /// Handle for a registered UUID.
    pub fn uuid(&self, category: &str, name: &str) -> Result<UuidMetric, Error> {
        self.lookup(category, name, MetricKind::Uuid)
            .map(|m| UuidMetric::new(m.meta.clone()))
    }

    /// Handle for a registered datetime.
    pub fn datetime(&self, category: &str, name: &str) -> Result<DatetimeMetric, Error> {
        self.lookup(category, name, MetricKind::Datetime)
            .map(|m| DatetimeMetric::new(m.meta.clone(), m.time_unit))
    }

    /// Handle for a registered event.
    pub fn event(&self, category: &str, name: &str) -> Result<EventMetric, Error> {
        self.lookup(category, name, MetricKind::Event)
            .map(|m| EventMetric::new(m.meta.clone(), m.allowed_extra_keys.clone()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metric::MetricType;

    const SCHEMA: &str = r#"
data-directory = "/tmp/ignored"

[[metric]]
category = "search"
name = "engine"
type = "string"
lifetime = "application"
send_in_pings = ["metrics", "baseline"]

[[metric]]
category = "install"
name = "first_run"
type = "datetime"
lifetime = "user"
time_unit = "day"

[[metric]]
category = "ui"
name = "click"
type = "event"
allowed_extra_keys = ["target"]

[[metric]]
name = "crashes"
type = "counter"
disabled = true
"#;

    #[test]
    fn loads_a_schema() {
        let registry = Registry::from_toml(SCHEMA).unwrap();
        assert_eq!(4, registry.len());

        let engine = registry.string("search", "engine").unwrap();
        assert_eq!(Lifetime::Application, engine.meta().lifetime);
        assert_eq!(vec!["metrics", "baseline"], engine.meta().send_in_pings);

        let first_run = registry.datetime("install", "first_run").unwrap();
        assert_eq!(TimeUnit::Day, first_run.time_unit());

        let click = registry.event("ui", "click").unwrap();
        assert_eq!(vec!["events"], click.meta().send_in_pings);
        assert_eq!(&["target".to_string()], click.allowed_extra_keys());

        let crashes = registry.counter("", "crashes").unwrap();
        assert!(crashes.meta().disabled);
        assert_eq!(vec!["metrics"], crashes.meta().send_in_pings);
    }

    #[test]
    fn wrong_kind_lookup_fails() {
        let registry = Registry::from_toml(SCHEMA).unwrap();
        assert!(registry.counter("search", "engine").is_err());
        assert!(registry.string("search", "nope").is_err());
    }

    #[test]
    fn conflicting_registration_fails() {
        let registry = Registry::from_toml(SCHEMA).unwrap();
        let mut registry = registry.clone();
        let def = MetricDefinition {
            category: "search".into(),
            name: "engine".into(),
            kind: MetricKind::Counter,
            lifetime: Lifetime::Application,
            send_in_pings: Some(vec!["metrics".into(), "baseline".into()]),
            disabled: false,
            time_unit: None,
            allowed_extra_keys: vec![],
        };
        assert!(registry.register(def.clone()).is_err());
        assert_eq!(
            MetricKind::String,
            registry.get("search", "engine").unwrap().kind
        );

        let same = MetricDefinition {
            kind: MetricKind::String,
            ..def
        };
        assert!(registry.register(same).is_ok());
    }

    #[test]
    fn events_must_be_ping_lifetime() {
        let schema = r#"
[[metric]]
category = "ui"
name = "click"
type = "event"
lifetime = "user"
"#;
        assert!(Registry::from_toml(schema).is_err());
    }

    #[test]
    fn empty_send_in_pings_is_rejected() {
        let schema = r#"
[[metric]]
category = "a"
name = "b"
type = "boolean"
send_in_pings = []
"#;
        assert!(Registry::from_toml(schema).is_err());
    }

    #[test]
    fn internal_store_is_reserved() {
        let schema = r#"
[[metric]]
category = "a"
name = "b"
type = "boolean"
send_in_pings = ["internal-info"]
"#;
        assert!(Registry::from_toml(schema).is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let schema = r#"
[[metric]]
category = "a"
name = "b"
type = "histogram"
"#;
        assert!(Registry::from_toml(schema).is_err());
    }

    #[test]
    fn empty_name_is_rejected() {
        let schema = r#"
[[metric]]
category = "a"
name = ""
type = "boolean"
"#;
        assert!(Registry::from_toml(schema).is_err());
    }

    #[test]
    fn dotted_full_name_collision_is_rejected() {
        let schema = r#"
[[metric]]
category = "a.b"
name = "c"
type = "counter"

[[metric]]
category = "a"
name = "b.c"
type = "counter"
"#;
        assert!(Registry::from_toml(schema).is_err());

        let mut registry = Registry::new();
        let def = MetricDefinition {
            category: "a.b".into(),
            name: "c".into(),
            kind: MetricKind::Counter,
            lifetime: Lifetime::Ping,
            send_in_pings: None,
            disabled: false,
            time_unit: None,
            allowed_extra_keys: vec![],
        };
        assert!(registry.register(def.clone()).is_ok());
        let clash = MetricDefinition {
            category: "a".into(),
            name: "b.c".into(),
            kind: MetricKind::String,
            ..def
        };
        assert!(registry.register(clash).is_err());
        assert_eq!(1, registry.len());
        assert!(registry.get("a", "b.c").is_none());
    }

    #[test]
    fn recording_error_category_is_reserved() {
        let schema = r#"
[[metric]]
category = "recording_error"
name = "invalid_value:search.engine"
type = "counter"
"#;
        assert!(Registry::from_toml(schema).is_err());
    }
}
