//! The database: storage engines, the recording gate, persistence and the
//! background flusher, wired together.

use crate::config::{Config, EventLimits};
use crate::error::Error;
use crate::gate::RecordingGate;
use crate::lifetime::{ClearEvent, Lifetime, LifetimeManager};
use crate::metric::{MetricIdentity, MetricKind, TimeUnit};
use crate::persistence::Persistence;
use crate::storage::{Engines, MergeOutcome, StorageEngine, StoredValue};
use crate::thread::{self, ThreadHandle};
use crate::time;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLockWriteGuard};
use std::time::Duration;
use uuid::Uuid;

/// The store internal bookkeeping lives in. It is never collected as a ping.
pub const INTERNAL_STORE: &str = "internal-info";

/// Precision of ping start and end times.
pub const PING_TIME_UNIT: TimeUnit = TimeUnit::Minute;

pub(crate) fn client_id_identity() -> MetricIdentity {
    MetricIdentity::new("client_info", "client_id")
}

pub(crate) fn seq_identity(store: &str) -> MetricIdentity {
    MetricIdentity::new("ping_info", format!("{}#seq", store))
}

pub(crate) fn start_identity(store: &str) -> MetricIdentity {
    MetricIdentity::new("ping_info", format!("{}#start", store))
}

struct Shared {
    engines: Engines,
    gate: Arc<RecordingGate>,
    lifetimes: LifetimeManager,
    persistence: Option<Persistence>,
    limits: EventLimits,
    opened_at: String,
    // Serializes flushes so an older view never lands on disk after a newer
    // one.
    flushing: Mutex<()>,
    // Serializes collections so ping info rollback sees its own writes.
    collecting: Mutex<()>,
}

impl Shared {
    fn flush(&self) -> Result<(), Error> {
        let persistence = match self.persistence {
            Some(ref p) => p,
            None => {
                self.forget_dirty();
                return Ok(());
            }
        };
        let _serial = self
            .flushing
            .lock()
            .map_err(|_| Error::Consistency("flush lock poisoned".into()))?;
        let e = &self.engines;
        let results = vec![
            flush_engine(persistence, &e.booleans),
            flush_engine(persistence, &e.strings),
            flush_engine(persistence, &e.string_lists),
            flush_engine(persistence, &e.counters),
            flush_engine(persistence, &e.uuids),
            flush_engine(persistence, &e.datetimes),
            flush_engine(persistence, &e.events),
        ];
        results.into_iter().collect::<Result<Vec<()>, Error>>().map(|_| ())
    }

    fn forget_dirty(&self) {
        let e = &self.engines;
        e.booleans.take_dirty();
        e.strings.take_dirty();
        e.string_lists.take_dirty();
        e.counters.take_dirty();
        e.uuids.take_dirty();
        e.datetimes.take_dirty();
        e.events.take_dirty();
    }

    fn load(&self) {
        let persistence = match self.persistence {
            Some(ref p) => p,
            None => return,
        };
        let e = &self.engines;
        load_engine(persistence, &e.booleans);
        load_engine(persistence, &e.strings);
        load_engine(persistence, &e.string_lists);
        load_engine(persistence, &e.counters);
        load_engine(persistence, &e.uuids);
        load_engine(persistence, &e.datetimes);
        load_engine(persistence, &e.events);
    }

    fn exclusive(&self) -> Result<RwLockWriteGuard<()>, Error> {
        self.engines
            .cut()
            .write()
            .map_err(|_| Error::Consistency("collection lock poisoned".into()))
    }

    // Caller holds the cut.
    fn set_client_id(&self, id: Uuid) {
        self.engines.uuids.record_unguarded(
            &[INTERNAL_STORE.to_string()],
            Lifetime::User,
            &client_id_identity(),
            |_| (id.hyphenated().to_string(), MergeOutcome::Clean),
        );
    }
}

/// Persist the records of one engine if it changed. A failed write leaves
/// the engine dirty for the next attempt.
fn flush_engine<V: StoredValue>(persistence: &Persistence, engine: &StorageEngine<V>) -> Result<(), Error> {
    if !engine.take_dirty() {
        return Ok(());
    }
    let records = engine.persisted_records();
    persistence.flush(engine.kind(), &records).map_err(|e| {
        error!("could not flush {} records: {}", engine.kind(), e);
        engine.mark_dirty();
        e
    })
}

/// Load the persisted records of one engine. Unreadable files are logged and
/// the engine starts empty; in-memory state becomes the truth from here on.
fn load_engine<V: StoredValue>(persistence: &Persistence, engine: &StorageEngine<V>) {
    match persistence.load(engine.kind()) {
        Ok(records) => engine.restore_records(records),
        Err(e) => error!(
            "could not load {} records from {:?}, starting empty: {}",
            engine.kind(),
            persistence.path(engine.kind()),
            e
        ),
    }
}

/// All recorded telemetry of a process.
///
/// Metric handles record into a `Database`; `PingCollector::collect` turns
/// a store into a payload. A `Database` is `Sync`: share it between threads
/// by reference or behind an `Arc`.
pub struct Database {
    shared: Arc<Shared>,
    flusher: Mutex<Option<ThreadHandle>>,
}

impl Database {
    /// Open a database.
    ///
    /// With a data directory configured, previously persisted Application
    /// and User lifetime data is loaded and, unless `flush_interval` is zero,
    /// a background thread flushes changes periodically.
    pub fn new(config: Config) -> Result<Database, Error> {
        let gate = Arc::new(RecordingGate::new(config.upload_enabled));
        let persistence = match config.data_directory {
            Some(ref dir) => Some(Persistence::new(dir)?),
            None => None,
        };
        let shared = Arc::new(Shared {
            engines: Engines::new(&gate),
            gate,
            lifetimes: LifetimeManager,
            persistence,
            limits: config.event_limits(),
            opened_at: PING_TIME_UNIT.format(&time::now()),
            flushing: Mutex::new(()),
            collecting: Mutex::new(()),
        });
        shared.load();

        {
            let _cut = shared.exclusive()?;
            if shared
                .engines
                .uuids
                .get(INTERNAL_STORE, &client_id_identity())
                .is_none()
            {
                let id = Uuid::new_v4();
                info!("no client id found, generated {}", id);
                shared.set_client_id(id);
            }
        }
        if let Err(e) = shared.flush() {
            warn!("initial flush failed, will retry: {}", e);
        }

        let flusher = match (&shared.persistence, config.flush_interval) {
            (&Some(_), interval) if interval > 0 => {
                let worker = Arc::clone(&shared);
                let interval = Duration::from_secs(interval);
                Some(thread::spawn("pingstore-flush", move |shutdown| {
                    while !shutdown.wait(interval) {
                        if let Err(e) = worker.flush() {
                            warn!("background flush failed, will retry: {}", e);
                        }
                    }
                })?)
            }
            _ => None,
        };

        Ok(Database {
            shared,
            flusher: Mutex::new(flusher),
        })
    }

    /// The storage engines.
    pub fn engines(&self) -> &Engines {
        &self.shared.engines
    }

    /// The recording gate shared by every engine.
    pub fn gate(&self) -> &RecordingGate {
        &self.shared.gate
    }

    /// Lifetime retention policy.
    pub fn lifetimes(&self) -> LifetimeManager {
        self.shared.lifetimes
    }

    /// Bounds on event cells.
    pub fn event_limits(&self) -> EventLimits {
        self.shared.limits
    }

    /// When this database was opened, at ping time precision.
    pub fn opened_at(&self) -> &str {
        &self.shared.opened_at
    }

    /// The data directory, if persisting.
    pub fn data_directory(&self) -> Option<&Path> {
        self.shared.persistence.as_ref().map(|p| p.root())
    }

    /// Open or close the recording gate.
    ///
    /// Closing it drops every later write. Data already recorded stays
    /// where it is; `clear_all` is the way to forget it.
    pub fn set_upload_enabled(&self, enabled: bool) {
        info!("upload {}", if enabled { "enabled" } else { "disabled" });
        self.shared.gate.set_upload_enabled(enabled);
    }

    /// Whether the recording gate is open.
    pub fn is_upload_enabled(&self) -> bool {
        self.shared.gate.is_open()
    }

    /// The client id reported in every payload.
    pub fn client_id(&self) -> Option<Uuid> {
        self.shared
            .engines
            .uuids
            .get(INTERNAL_STORE, &client_id_identity())
            .and_then(|s| Uuid::parse_str(&s).ok())
    }

    /// Write every changed engine to disk now.
    pub fn flush(&self) -> Result<(), Error> {
        self.shared.flush()
    }

    /// Forget Ping and Application lifetime data, e.g. because the
    /// application was upgraded.
    pub fn clear_application_lifetime(&self) -> Result<(), Error> {
        self.clear(ClearEvent::ApplicationReset)
    }

    /// Forget everything, including the client id, which is regenerated.
    pub fn clear_all(&self) -> Result<(), Error> {
        self.clear(ClearEvent::UserReset)
    }

    fn clear(&self, event: ClearEvent) -> Result<(), Error> {
        // Wait out any collection, or its rollback could put back what is
        // cleared here.
        let _serial = self.collect_guard()?;
        {
            let _cut = self.shared.exclusive()?;
            for lifetime in self.shared.lifetimes.cleared_by(event) {
                self.shared.engines.clear_unguarded(lifetime);
            }
            if self.shared.lifetimes.clears_on(event, Lifetime::User) {
                let id = Uuid::new_v4();
                info!("client id reset to {}", id);
                self.shared.set_client_id(id);
            }
        }
        info!("cleared data on {:?}", event);
        self.shared.flush()
    }

    /// Every persisted record, grouped by kind name, optionally limited to
    /// one store.
    pub fn persisted_json(&self, store: Option<&str>) -> Result<serde_json::Value, Error> {
        let e = &self.shared.engines;
        let mut out = BTreeMap::new();
        out.insert(MetricKind::Boolean.as_str(), records_json(&e.booleans, store)?);
        out.insert(MetricKind::String.as_str(), records_json(&e.strings, store)?);
        out.insert(MetricKind::StringList.as_str(), records_json(&e.string_lists, store)?);
        out.insert(MetricKind::Counter.as_str(), records_json(&e.counters, store)?);
        out.insert(MetricKind::Uuid.as_str(), records_json(&e.uuids, store)?);
        out.insert(MetricKind::Datetime.as_str(), records_json(&e.datetimes, store)?);
        out.insert(MetricKind::Event.as_str(), records_json(&e.events, store)?);
        Ok(serde_json::to_value(out)?)
    }

    pub(crate) fn collect_guard(&self) -> Result<MutexGuard<()>, Error> {
        self.shared
            .collecting
            .lock()
            .map_err(|_| Error::Consistency("collect lock poisoned".into()))
    }

    pub(crate) fn exclusive(&self) -> Result<RwLockWriteGuard<()>, Error> {
        self.shared.exclusive()
    }
}

fn records_json<V: StoredValue>(
    engine: &StorageEngine<V>,
    store: Option<&str>,
) -> Result<serde_json::Value, Error> {
    let records: Vec<_> = engine
        .persisted_records()
        .into_iter()
        .filter(|r| store.map_or(true, |s| r.store == s))
        .collect();
    Ok(serde_json::to_value(records)?)
}

impl Drop for Database {
    fn drop(&mut self) {
        let flusher = match self.flusher.get_mut() {
            Ok(flusher) => flusher.take(),
            Err(_) => None,
        };
        if let Some(flusher) = flusher {
            flusher.shutdown();
        }
        if let Err(e) = self.shared.flush() {
            error!("final flush failed, recent changes are lost: {}", e);
        }
    }
}
