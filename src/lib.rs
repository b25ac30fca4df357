//! pingstore is the recording core of a typed telemetry system. Application
//! code records metrics -- booleans, strings, counters, events and friends --
//! through narrow typed handles. pingstore validates and truncates those
//! values, accumulates them per named store (a "ping"), and later assembles a
//! store into an immutable payload for some external uploader to ship.
//!
//! The interesting bits:
//!
//!  * Recording is fire and forget. Bad values are truncated or dropped and
//!    the problem is counted in an error metric, never raised to the caller.
//!  * Every metric has a lifetime. Ping-lifetime values vanish when their
//!    store is collected, application- and user-lifetime values survive and
//!    are persisted to disk.
//!  * Collection takes a consistent cut across every metric kind while
//!    writers keep recording.
//!
//! A typical session:
//!
//! ```
//! use pingstore::{CommonMetricData, Config, Database, Lifetime, PingCollector};
//! use pingstore::metric::StringMetric;
//!
//! let db = Database::new(Config::default()).unwrap();
//! let engine = StringMetric::new(CommonMetricData::new(
//!     "search",
//!     "default_engine",
//!     Lifetime::Ping,
//!     vec!["metrics".into()],
//! ));
//! engine.set(&db, "duckduckgo");
//!
//! let payload = db.collect("metrics").unwrap();
//! assert_eq!(Some(&"duckduckgo".to_string()),
//!            payload.metrics.string.get("search.default_engine"));
//! ```
#![allow(unknown_lints)]
#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]
#![warn(missing_docs)]
extern crate chrono;
extern crate seahash;
extern crate serde;
extern crate serde_json;
extern crate toml;
extern crate uuid;

#[macro_use]
extern crate log;

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate serde_derive;

#[cfg(test)]
extern crate quickcheck;

#[cfg(test)]
extern crate tempdir;

pub mod config;
pub mod database;
pub mod error;
pub mod gate;
pub mod lifetime;
pub mod metric;
pub mod persistence;
pub mod ping;
pub mod registry;
pub mod storage;
pub mod thread;
pub mod time;
pub mod validate;

pub use crate::config::Config;
pub use crate::database::Database;
pub use crate::error::{Error, ErrorType};
pub use crate::lifetime::Lifetime;
pub use crate::metric::{CommonMetricData, MetricIdentity, MetricKind, MetricType};
pub use crate::ping::{PingCollector, PingPayload};
