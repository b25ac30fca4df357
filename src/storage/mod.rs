//! Storage engines are the primary internal storage type.
//!
//! There is one `StorageEngine` per metric kind, each generic only in the
//! value it holds. `Engines` bundles the full, closed set of them together
//! with the gate and the collection lock they share.

use crate::error::ErrorType;
use crate::gate::RecordingGate;
use crate::lifetime::Lifetime;
use crate::metric::{MetricKind, RecordedEvent};
use crate::validate::MAX_LIST_ITEMS;
use seahash::SeaHasher;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::{Arc, RwLock, RwLockReadGuard};

mod engine;

pub use self::engine::{StorageEngine, StoreSnapshot};

/// A `HashMap` keyed with seahash.
pub type HashMapSea<K, V> = HashMap<K, V, BuildHasherDefault<SeaHasher>>;

/// The cells of one store: identity to value.
pub type Cells<V> = HashMapSea<crate::metric::MetricIdentity, V>;

/// Whether a merge had to give something up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merge was lossless.
    Clean,
    /// The merge hit a bound: a counter saturated, a sequence dropped an
    /// element.
    Overflowed,
}

/// A value a storage engine can hold.
pub trait StoredValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// The recording error counted for each element `reconcile` gives up.
    const RECONCILE_ERROR: ErrorType = ErrorType::InvalidOverflow;

    /// Combine a value that was taken out of storage for a snapshot with one
    /// written to the same cell after the snapshot, returning the combined
    /// value and how many elements had to be given up to stay in bounds.
    /// Used only when a collection fails and its snapshot is put back.
    fn reconcile(taken: Self, newer: Self) -> (Self, usize);
}

impl StoredValue for bool {
    fn reconcile(_taken: bool, newer: bool) -> (bool, usize) {
        (newer, 0)
    }
}

impl StoredValue for String {
    fn reconcile(_taken: String, newer: String) -> (String, usize) {
        (newer, 0)
    }
}

impl StoredValue for i32 {
    fn reconcile(taken: i32, newer: i32) -> (i32, usize) {
        match taken.checked_add(newer) {
            Some(total) => (total, 0),
            None => (i32::max_value(), 1),
        }
    }
}

impl StoredValue for Vec<String> {
    const RECONCILE_ERROR: ErrorType = ErrorType::InvalidValue;

    fn reconcile(mut taken: Vec<String>, newer: Vec<String>) -> (Vec<String>, usize) {
        taken.extend(newer);
        let lost = taken.len().saturating_sub(MAX_LIST_ITEMS);
        taken.truncate(MAX_LIST_ITEMS);
        (taken, lost)
    }
}

/// Merge function that replaces whatever a cell held.
pub(crate) fn replace<V: Clone>(value: V) -> impl FnMut(Option<V>) -> (V, MergeOutcome) {
    move |_| (value.clone(), MergeOutcome::Clean)
}

/// One persisted cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord<V> {
    /// Lifetime of the cell, never `Ping`.
    pub lifetime: Lifetime,
    /// Store the cell belongs to.
    pub store: String,
    /// Metric category.
    pub category: String,
    /// Metric name.
    pub name: String,
    /// The stored value.
    pub value: V,
}

/// One storage engine per metric kind.
pub struct Engines {
    /// Boolean metrics.
    pub booleans: StorageEngine<bool>,
    /// String metrics.
    pub strings: StorageEngine<String>,
    /// String list metrics.
    pub string_lists: StorageEngine<Vec<String>>,
    /// Counter metrics, including recording errors and ping sequence numbers.
    pub counters: StorageEngine<i32>,
    /// UUID metrics, hyphenated.
    pub uuids: StorageEngine<String>,
    /// Datetime metrics, as truncated RFC 3339 strings.
    pub datetimes: StorageEngine<String>,
    /// Event metrics.
    pub events: StorageEngine<Vec<RecordedEvent>>,
    cut: Arc<RwLock<()>>,
}

impl Engines {
    /// Build the engine set around one gate.
    pub fn new(gate: &Arc<RecordingGate>) -> Engines {
        let cut = Arc::new(RwLock::new(()));
        Engines {
            booleans: StorageEngine::new(MetricKind::Boolean, Arc::clone(gate), Arc::clone(&cut)),
            strings: StorageEngine::new(MetricKind::String, Arc::clone(gate), Arc::clone(&cut)),
            string_lists: StorageEngine::new(
                MetricKind::StringList,
                Arc::clone(gate),
                Arc::clone(&cut),
            ),
            counters: StorageEngine::new(MetricKind::Counter, Arc::clone(gate), Arc::clone(&cut)),
            uuids: StorageEngine::new(MetricKind::Uuid, Arc::clone(gate), Arc::clone(&cut)),
            datetimes: StorageEngine::new(MetricKind::Datetime, Arc::clone(gate), Arc::clone(&cut)),
            events: StorageEngine::new(MetricKind::Event, Arc::clone(gate), Arc::clone(&cut)),
            cut,
        }
    }

    /// The collection lock. Writers hold it shared for a single write; the
    /// ping assembler and the reset operations hold it exclusively.
    pub fn cut(&self) -> &RwLock<()> {
        &self.cut
    }

    /// Hold the shared side of the cut, so several writes land in the same
    /// ping. `None` if the lock is poisoned; the writes are then dropped.
    pub(crate) fn hold(&self) -> Option<RwLockReadGuard<()>> {
        match self.cut.read() {
            Ok(guard) => Some(guard),
            Err(_) => {
                error!("collection lock poisoned, dropping write");
                None
            }
        }
    }

    /// Drop every value of `lifetime` in every engine. The caller must hold
    /// the cut exclusively.
    pub(crate) fn clear_unguarded(&self, lifetime: Lifetime) {
        self.booleans.clear_unguarded(lifetime);
        self.strings.clear_unguarded(lifetime);
        self.string_lists.clear_unguarded(lifetime);
        self.counters.clear_unguarded(lifetime);
        self.uuids.clear_unguarded(lifetime);
        self.datetimes.clear_unguarded(lifetime);
        self.events.clear_unguarded(lifetime);
    }
}
