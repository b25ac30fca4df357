//! Ping assembly.
//!
//! Collecting a store takes the collection lock exclusively, swaps the
//! store's ping-lifetime cells out of every engine, copies what is retained
//! and advances the store's sequence number. The lock is then released and
//! writers carry on while the payload is flushed and built. If the flush
//! fails the swapped-out cells go back where they came from and the
//! sequence number is rolled back, so a failed collection loses nothing.

use crate::database::{seq_identity, start_identity, Database, INTERNAL_STORE, PING_TIME_UNIT};
use crate::config::EventLimits;
use crate::error::{Error, ErrorType};
use crate::lifetime::{ClearEvent, Lifetime};
use crate::metric::{count_lost, reconcile_bounded, MetricIdentity, RecordedEvent};
use crate::storage::{Engines, MergeOutcome, StorageEngine, StoreSnapshot, StoredValue};
use crate::time;
use std::collections::BTreeMap;

/// Identifies the ping a payload belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingInfo {
    /// The collected store.
    pub ping: String,
    /// How many times this store was successfully collected before.
    pub seq: i32,
    /// When the previous collection of this store ended, or when the
    /// database was opened if there wasn't one.
    pub start_time: String,
    /// When this collection happened.
    pub end_time: String,
}

/// Identifies the client a payload came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Random per-installation identifier, hyphenated.
    pub client_id: Option<String>,
}

/// Every non-event metric of a payload, by kind, keyed by full name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingMetrics {
    /// Boolean metrics.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub boolean: BTreeMap<String, bool>,
    /// String metrics.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub string: BTreeMap<String, String>,
    /// String list metrics.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub string_list: BTreeMap<String, Vec<String>>,
    /// Counter metrics, recording errors included.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub counter: BTreeMap<String, i32>,
    /// UUID metrics.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub uuid: BTreeMap<String, String>,
    /// Datetime metrics.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub datetime: BTreeMap<String, String>,
}

impl PingMetrics {
    /// True if no metric has a value.
    pub fn is_empty(&self) -> bool {
        self.boolean.is_empty()
            && self.string.is_empty()
            && self.string_list.is_empty()
            && self.counter.is_empty()
            && self.uuid.is_empty()
            && self.datetime.is_empty()
    }
}

/// An assembled ping. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingPayload {
    /// Which ping this is.
    pub ping_info: PingInfo,
    /// Who sent it.
    pub client_info: ClientInfo,
    /// Metric values.
    pub metrics: PingMetrics,
    /// Events, oldest first, the first one at timestamp 0.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<RecordedEvent>,
}

impl PingPayload {
    /// True if the store held no metric data. Ping and client info don't
    /// count.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.events.is_empty()
    }

    /// The payload as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Anything stores can be collected from.
pub trait PingCollector {
    /// Snapshot `store` into a payload, clearing its ping-lifetime data.
    ///
    /// Either the full payload is returned and the data it holds is gone
    /// from storage, or an error is returned and storage is as it was.
    fn collect(&self, store: &str) -> Result<PingPayload, Error>;
}

impl PingCollector for Database {
    fn collect(&self, store: &str) -> Result<PingPayload, Error> {
        collect_with(self, store, || ())
    }
}

/// `collect`, running `before_flush` once the store has been cut and the
/// cut released, right before the flush that makes the collection final.
fn collect_with<F>(db: &Database, store: &str, before_flush: F) -> Result<PingPayload, Error>
where
    F: FnOnce(),
{
    if !db.is_upload_enabled() {
        return Err(Error::UploadDisabled);
    }
    if store == INTERNAL_STORE {
        return Err(Error::Registry(format!("{} is a reserved store", store)));
    }
    // Resets take this too, so nothing clears the store between the cut and
    // a rollback.
    let _serial = db.collect_guard()?;
    let lifetimes = db.lifetimes();
    let clears = move |l: Lifetime| lifetimes.clears_on(ClearEvent::PingCollected, l);
    let engines = db.engines();
    let limits = db.event_limits();

    let (cut, info) = {
        let _cut = db.exclusive()?;
        let cut = StoreCut::take(engines, store, limits, &clears)?;
        let info = advance_ping_info(db, store);
        (cut, info)
    };

    before_flush();

    if let Err(e) = db.flush() {
        error!("collection of {} failed, restoring its data: {}", store, e);
        // Restore even past a poisoned lock; losing the data is worse.
        let _cut = match engines.cut().write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cut.restore(engines, store, limits);
        rewind_ping_info(db, &info);
        return Err(e);
    }

    let client_id = db.client_id().map(|id| id.hyphenated().to_string());
    let payload = cut.into_payload(info, ClientInfo { client_id });
    debug!(
        "collected {} seq {}: {} events",
        store,
        payload.ping_info.seq,
        payload.events.len()
    );
    Ok(payload)
}

// Caller holds the cut exclusively.
fn advance_ping_info(db: &Database, store: &str) -> PingInfo {
    let engines = db.engines();
    let internal = [INTERNAL_STORE.to_string()];
    let seq_id = seq_identity(store);
    let start_id = start_identity(store);

    let seq = engines.counters.get(INTERNAL_STORE, &seq_id).unwrap_or(0);
    let start_time = engines
        .datetimes
        .get(INTERNAL_STORE, &start_id)
        .unwrap_or_else(|| db.opened_at().to_string());
    let end_time = PING_TIME_UNIT.format(&time::now());

    engines.counters.record_unguarded(&internal, Lifetime::User, &seq_id, |_| {
        (seq.saturating_add(1), MergeOutcome::Clean)
    });
    engines.datetimes.record_unguarded(&internal, Lifetime::User, &start_id, |_| {
        (end_time.clone(), MergeOutcome::Clean)
    });

    PingInfo {
        ping: store.to_string(),
        seq,
        start_time,
        end_time,
    }
}

// Caller holds the cut exclusively.
fn rewind_ping_info(db: &Database, info: &PingInfo) {
    let engines = db.engines();
    let internal = [INTERNAL_STORE.to_string()];
    engines.counters.record_unguarded(
        &internal,
        Lifetime::User,
        &seq_identity(&info.ping),
        |_| (info.seq, MergeOutcome::Clean),
    );
    engines.datetimes.record_unguarded(
        &internal,
        Lifetime::User,
        &start_identity(&info.ping),
        |_| (info.start_time.clone(), MergeOutcome::Clean),
    );
}

/// One store's snapshot across every engine.
#[derive(Default)]
struct StoreCut {
    booleans: Option<StoreSnapshot<bool>>,
    strings: Option<StoreSnapshot<String>>,
    string_lists: Option<StoreSnapshot<Vec<String>>>,
    counters: Option<StoreSnapshot<i32>>,
    uuids: Option<StoreSnapshot<String>>,
    datetimes: Option<StoreSnapshot<String>>,
    events: Option<StoreSnapshot<Vec<RecordedEvent>>>,
}

impl StoreCut {
    /// Take `store` out of every engine, or out of none. The caller must
    /// hold the cut exclusively.
    fn take<F>(engines: &Engines, store: &str, limits: EventLimits, clears: &F) -> Result<StoreCut, Error>
    where
        F: Fn(Lifetime) -> bool,
    {
        let mut cut = StoreCut::default();
        if let Err(e) = cut.take_all(engines, store, clears) {
            cut.restore(engines, store, limits);
            return Err(e);
        }
        Ok(cut)
    }

    fn take_all<F>(&mut self, engines: &Engines, store: &str, clears: &F) -> Result<(), Error>
    where
        F: Fn(Lifetime) -> bool,
    {
        self.booleans = Some(engines.booleans.take_unguarded(store, clears)?);
        self.strings = Some(engines.strings.take_unguarded(store, clears)?);
        self.string_lists = Some(engines.string_lists.take_unguarded(store, clears)?);
        self.counters = Some(engines.counters.take_unguarded(store, clears)?);
        self.uuids = Some(engines.uuids.take_unguarded(store, clears)?);
        self.datetimes = Some(engines.datetimes.take_unguarded(store, clears)?);
        self.events = Some(engines.events.take_unguarded(store, clears)?);
        Ok(())
    }

    /// Put everything back, reconciling with what was written since. Elements
    /// that no longer fit are dropped and counted as recording errors. The
    /// caller must hold the cut exclusively.
    fn restore(self, engines: &Engines, store: &str, limits: EventLimits) {
        let mut lost = Vec::new();
        put_back(&engines.booleans, store, self.booleans, &mut lost);
        put_back(&engines.strings, store, self.strings, &mut lost);
        put_back(&engines.string_lists, store, self.string_lists, &mut lost);
        put_back(&engines.counters, store, self.counters, &mut lost);
        put_back(&engines.uuids, store, self.uuids, &mut lost);
        put_back(&engines.datetimes, store, self.datetimes, &mut lost);
        if let Some(s) = self.events {
            let dropped = engines
                .events
                .restore_unguarded_with(store, s, reconcile_bounded(limits));
            lost.extend(dropped.into_iter().map(|(id, n)| (id, ErrorType::InvalidOverflow, n)));
        }
        for (id, error, count) in lost {
            count_lost(engines, store, &id, error, count);
        }
    }

    fn into_payload(self, ping_info: PingInfo, client_info: ClientInfo) -> PingPayload {
        let metrics = PingMetrics {
            boolean: by_full_name(self.booleans),
            string: by_full_name(self.strings),
            string_list: by_full_name(self.string_lists),
            counter: by_full_name(self.counters),
            uuid: by_full_name(self.uuids),
            datetime: by_full_name(self.datetimes),
        };
        let mut events: Vec<RecordedEvent> = self
            .events
            .map(|s| s.into_values())
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(_, events)| events)
            .collect();
        normalize_events(&mut events);
        PingPayload {
            ping_info,
            client_info,
            metrics,
            events,
        }
    }
}

fn put_back<V: StoredValue>(
    engine: &StorageEngine<V>,
    store: &str,
    snapshot: Option<StoreSnapshot<V>>,
    lost: &mut Vec<(MetricIdentity, ErrorType, usize)>,
) {
    if let Some(snapshot) = snapshot {
        let dropped = engine.restore_unguarded(store, snapshot);
        lost.extend(dropped.into_iter().map(|(id, n)| (id, V::RECONCILE_ERROR, n)));
    }
}

fn by_full_name<V>(snapshot: Option<StoreSnapshot<V>>) -> BTreeMap<String, V> {
    snapshot
        .map(|s| s.into_values())
        .unwrap_or_default()
        .into_iter()
        .map(|(id, v): (MetricIdentity, V)| (id.full_name(), v))
        .collect()
}

/// Order events by time and rebase them so the first is at 0.
fn normalize_events(events: &mut Vec<RecordedEvent>) {
    events.sort_by_key(|e| e.timestamp);
    if let Some(first) = events.first().map(|e| e.timestamp) {
        for event in events.iter_mut() {
            event.timestamp -= first;
        }
    }
}
