//! Metric identities, metadata and the typed recording handles.
//!
//! A metric handle is a small value -- identity plus metadata -- that knows
//! which storage engine its kind lives in and how to validate its input.
//! Handles are cheap to clone and hold no data themselves; every recorded
//! value lives in a `Database`.

use crate::database::Database;
use crate::lifetime::Lifetime;
use std::fmt;

mod boolean;
mod counter;
mod datetime;
mod event;
mod recording_error;
mod string;
mod string_list;
mod uuid;

pub use self::boolean::BooleanMetric;
pub use self::counter::CounterMetric;
pub use self::datetime::{DatetimeMetric, TimeUnit};
pub use self::event::{EventMetric, OverflowPolicy, RecordedEvent};
pub(crate) use self::event::reconcile_bounded;
pub(crate) use self::recording_error::{count_lost, record_error};
pub use self::recording_error::{error_identity, test_get_num_recorded_errors};
pub use self::string::StringMetric;
pub use self::string_list::StringListMetric;
pub use self::uuid::UuidMetric;

/// The name of a metric within its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricIdentity {
    /// Dotted category, e.g. `browser.engagement`. May be empty.
    pub category: String,
    /// Name within the category.
    pub name: String,
}

impl MetricIdentity {
    /// Build an identity.
    pub fn new<S, T>(category: S, name: T) -> MetricIdentity
    where
        S: Into<String>,
        T: Into<String>,
    {
        MetricIdentity {
            category: category.into(),
            name: name.into(),
        }
    }

    /// `category.name`, or just `name` when the category is empty. This is
    /// the key a metric is reported under in a payload.
    pub fn full_name(&self) -> String {
        if self.category.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.category, self.name)
        }
    }
}

impl fmt::Display for MetricIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.category.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.category, self.name)
        }
    }
}

/// The closed set of metric kinds. Each has exactly one storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// A flag, last write wins.
    Boolean,
    /// A bounded string, last write wins.
    String,
    /// A bounded list of bounded strings.
    StringList,
    /// A saturating 32-bit counter.
    Counter,
    /// A UUID.
    Uuid,
    /// A point in time, truncated to a declared precision.
    Datetime,
    /// A bounded sequence of timestamped events.
    Event,
}

impl MetricKind {
    /// Every kind, in payload order.
    pub const ALL: [MetricKind; 7] = [
        MetricKind::Boolean,
        MetricKind::String,
        MetricKind::StringList,
        MetricKind::Counter,
        MetricKind::Uuid,
        MetricKind::Datetime,
        MetricKind::Event,
    ];

    /// Lowercase name, used in payloads and persisted file names.
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Boolean => "boolean",
            MetricKind::String => "string",
            MetricKind::StringList => "string_list",
            MetricKind::Counter => "counter",
            MetricKind::Uuid => "uuid",
            MetricKind::Datetime => "datetime",
            MetricKind::Event => "event",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata shared by every metric kind. Fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonMetricData {
    /// Who the metric is.
    pub identity: MetricIdentity,
    /// A disabled metric never records.
    pub disabled: bool,
    /// How long recorded values survive.
    pub lifetime: Lifetime,
    /// The stores every recorded value is replicated into. Never empty.
    pub send_in_pings: Vec<String>,
}

impl CommonMetricData {
    /// Build enabled metadata.
    pub fn new<S, T>(
        category: S,
        name: T,
        lifetime: Lifetime,
        send_in_pings: Vec<String>,
    ) -> CommonMetricData
    where
        S: Into<String>,
        T: Into<String>,
    {
        CommonMetricData {
            identity: MetricIdentity::new(category, name),
            disabled: false,
            lifetime,
            send_in_pings,
        }
    }

    /// The stores a value of this metric goes to.
    pub fn storage_names(&self) -> &[String] {
        &self.send_in_pings
    }
}

/// What every typed metric handle offers.
///
/// `record` is fire and forget: it either stores a (possibly truncated)
/// value, counts a recording error, or does nothing at all when the gate is
/// closed. It never fails.
pub trait MetricType {
    /// The raw input accepted by `record`.
    type Input;

    /// The kind of this metric.
    fn kind(&self) -> MetricKind;

    /// Identity and metadata.
    fn meta(&self) -> &CommonMetricData;

    /// Who the metric is.
    fn identity(&self) -> &MetricIdentity {
        &self.meta().identity
    }

    /// Whether a write would currently reach storage.
    fn should_record(&self, db: &Database) -> bool {
        db.gate().should_record(self.meta())
    }

    /// Record a value.
    fn record(&self, db: &Database, value: Self::Input);
}
