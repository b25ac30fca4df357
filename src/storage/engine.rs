use super::{replace, Cells, HashMapSea, MergeOutcome, PersistedRecord, StoredValue};
use crate::error::Error;
use crate::gate::RecordingGate;
use crate::lifetime::Lifetime;
use crate::metric::{MetricIdentity, MetricKind};
use std::collections::BTreeMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

type StoreCell<V> = Arc<Mutex<Cells<V>>>;

/// The stores of one lifetime.
struct LifetimeSlot<V> {
    stores: RwLock<HashMapSea<String, StoreCell<V>>>,
}

impl<V> LifetimeSlot<V> {
    fn new() -> LifetimeSlot<V> {
        LifetimeSlot {
            stores: RwLock::new(HashMapSea::default()),
        }
    }
}

/// The result of `StorageEngine::snapshot_and_clear` for a single store.
///
/// `cleared` holds cells that were swapped out of storage -- the snapshot now
/// owns them outright. `retained` holds copies of cells that stay behind.
#[derive(Debug)]
pub struct StoreSnapshot<V> {
    cleared: Vec<(Lifetime, Cells<V>)>,
    retained: Cells<V>,
}

impl<V> StoreSnapshot<V> {
    fn new() -> StoreSnapshot<V> {
        StoreSnapshot {
            cleared: Vec::new(),
            retained: Cells::default(),
        }
    }

    /// True if the store held nothing.
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty() && self.cleared.iter().all(|&(_, ref c)| c.is_empty())
    }

    /// Every value in the snapshot, ordered by identity.
    pub fn into_values(self) -> BTreeMap<MetricIdentity, V> {
        let mut values: BTreeMap<MetricIdentity, V> = self.retained.into_iter().collect();
        for (_, cells) in self.cleared {
            values.extend(cells);
        }
        values
    }
}

/// Storage for every metric of one kind.
///
/// Values are kept per lifetime, then per store, then per identity. Each
/// store's cells sit behind their own mutex so writes to one cell are
/// linearizable and writes to different stores never contend. The write path
/// doesn't care about lifetime beyond picking the right map; clearing is
/// decided by the caller of `snapshot_and_clear` and `clear`.
///
/// Every write holds the shared side of `cut`, the lock the ping assembler
/// takes exclusively to get a consistent view across all engines.
pub struct StorageEngine<V> {
    kind: MetricKind,
    gate: Arc<RecordingGate>,
    cut: Arc<RwLock<()>>,
    slots: [LifetimeSlot<V>; 3],
    dirty: AtomicBool,
}

impl<V> StorageEngine<V>
where
    V: StoredValue,
{
    /// Create an empty engine sharing `gate` and `cut` with its siblings.
    pub fn new(kind: MetricKind, gate: Arc<RecordingGate>, cut: Arc<RwLock<()>>) -> StorageEngine<V> {
        StorageEngine {
            kind,
            gate,
            cut,
            slots: [LifetimeSlot::new(), LifetimeSlot::new(), LifetimeSlot::new()],
            dirty: AtomicBool::new(false),
        }
    }

    /// The kind stored here.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Store `value` in every store of `stores`, replacing what was there.
    pub fn record(&self, stores: &[String], lifetime: Lifetime, id: &MetricIdentity, value: V) {
        self.record_with(stores, lifetime, id, replace(value));
    }

    /// Merge a value into every store of `stores`.
    ///
    /// `merge` is called once per store with the value currently held there
    /// and returns the replacement. If any store reports
    /// `MergeOutcome::Overflowed` so does this call. Nothing happens while
    /// the gate is closed.
    pub fn record_with<F>(
        &self,
        stores: &[String],
        lifetime: Lifetime,
        id: &MetricIdentity,
        merge: F,
    ) -> MergeOutcome
    where
        F: FnMut(Option<V>) -> (V, MergeOutcome),
    {
        if !self.gate.is_open() {
            trace!("gate closed, dropping {} write to {}", self.kind, id);
            return MergeOutcome::Clean;
        }
        let _cut = match self.cut.read() {
            Ok(guard) => guard,
            Err(_) => {
                error!("collection lock poisoned, dropping {} write to {}", self.kind, id);
                return MergeOutcome::Clean;
            }
        };
        self.record_unguarded(stores, lifetime, id, merge)
    }

    /// `record_with` without the gate or the cut. The caller must already
    /// hold the cut, shared or exclusive.
    pub(crate) fn record_unguarded<F>(
        &self,
        stores: &[String],
        lifetime: Lifetime,
        id: &MetricIdentity,
        mut merge: F,
    ) -> MergeOutcome
    where
        F: FnMut(Option<V>) -> (V, MergeOutcome),
    {
        let mut outcome = MergeOutcome::Clean;
        for store in stores {
            let cell = match self.cell_or_insert(lifetime, store) {
                Some(cell) => cell,
                None => continue,
            };
            let mut cells = match cell.lock() {
                Ok(cells) => cells,
                Err(_) => {
                    error!("{} store {} poisoned, dropping write to {}", self.kind, store, id);
                    continue;
                }
            };
            let (value, merged) = merge(cells.remove(id));
            cells.insert(id.clone(), value);
            if merged == MergeOutcome::Overflowed {
                outcome = MergeOutcome::Overflowed;
            }
        }
        if lifetime.is_persisted() {
            self.mark_dirty();
        }
        outcome
    }

    /// The current value of one cell, searching every lifetime.
    pub fn get(&self, store: &str, id: &MetricIdentity) -> Option<V> {
        for lifetime in Lifetime::ALL.iter() {
            if let Some(cell) = self.cell(*lifetime, store) {
                if let Ok(cells) = cell.lock() {
                    if let Some(v) = cells.get(id) {
                        return Some(v.clone());
                    }
                }
            }
        }
        None
    }

    /// Copy every value held for `store`, without clearing anything.
    pub fn peek(&self, store: &str) -> BTreeMap<MetricIdentity, V> {
        let mut values = BTreeMap::new();
        for lifetime in Lifetime::ALL.iter() {
            if let Some(cell) = self.cell(*lifetime, store) {
                if let Ok(cells) = cell.lock() {
                    for (id, v) in cells.iter() {
                        values.insert(id.clone(), v.clone());
                    }
                }
            }
        }
        values
    }

    /// Snapshot `store`, clearing the lifetimes for which `clears` is true.
    ///
    /// Takes the cut exclusively, so the snapshot is consistent for this
    /// engine. To snapshot several engines as one cut, hold the cut and use
    /// `take_unguarded` on each.
    pub fn snapshot_and_clear<F>(&self, store: &str, clears: F) -> Result<StoreSnapshot<V>, Error>
    where
        F: Fn(Lifetime) -> bool,
    {
        let _cut = self
            .cut
            .write()
            .map_err(|_| Error::Consistency("collection lock poisoned".into()))?;
        self.take_unguarded(store, clears)
    }

    /// `snapshot_and_clear` without taking the cut. The caller must hold it
    /// exclusively.
    ///
    /// Clearing is a swap of the store's map for an empty one, so writers
    /// are held up by a pointer swap rather than a copy. Either every
    /// lifetime of the store is taken or, if a store lock turns out to be
    /// poisoned, nothing is.
    pub(crate) fn take_unguarded<F>(&self, store: &str, clears: F) -> Result<StoreSnapshot<V>, Error>
    where
        F: Fn(Lifetime) -> bool,
    {
        let cells: Vec<(Lifetime, StoreCell<V>)> = Lifetime::ALL
            .iter()
            .filter_map(|l| self.cell(*l, store).map(|c| (*l, c)))
            .collect();
        let mut guards: Vec<(Lifetime, MutexGuard<Cells<V>>)> = Vec::with_capacity(cells.len());
        for &(lifetime, ref cell) in &cells {
            match cell.lock() {
                Ok(guard) => guards.push((lifetime, guard)),
                Err(_) => {
                    return Err(Error::Consistency(format!(
                        "{} store {} ({} lifetime) poisoned by a panicked writer",
                        self.kind, store, lifetime
                    )))
                }
            }
        }

        let mut snapshot = StoreSnapshot::new();
        for (lifetime, mut guard) in guards {
            if clears(lifetime) {
                let taken = mem::replace(&mut *guard, Cells::default());
                snapshot.cleared.push((lifetime, taken));
            } else {
                for (id, v) in guard.iter() {
                    snapshot.retained.insert(id.clone(), v.clone());
                }
            }
        }
        Ok(snapshot)
    }

    /// Put cells taken by `take_unguarded` back into `store`, reconciling
    /// with anything written to the same cells since. Returns, per identity,
    /// how many elements were given up to keep the cells in bounds. The
    /// caller must hold the cut exclusively.
    pub(crate) fn restore_unguarded(
        &self,
        store: &str,
        snapshot: StoreSnapshot<V>,
    ) -> Vec<(MetricIdentity, usize)> {
        self.restore_unguarded_with(store, snapshot, V::reconcile)
    }

    /// `restore_unguarded` with a caller-supplied reconcile function, for
    /// kinds whose bounds are configured rather than fixed.
    pub(crate) fn restore_unguarded_with<F>(
        &self,
        store: &str,
        snapshot: StoreSnapshot<V>,
        mut reconcile: F,
    ) -> Vec<(MetricIdentity, usize)>
    where
        F: FnMut(V, V) -> (V, usize),
    {
        let mut lost = Vec::new();
        for (lifetime, taken) in snapshot.cleared {
            if taken.is_empty() {
                continue;
            }
            let cell = match self.cell_or_insert(lifetime, store) {
                Some(cell) => cell,
                None => continue,
            };
            let mut live = match cell.lock() {
                Ok(live) => live,
                Err(_) => {
                    error!("{} store {} poisoned, cannot restore", self.kind, store);
                    continue;
                }
            };
            for (id, v) in taken {
                let value = match live.remove(&id) {
                    Some(newer) => {
                        let (value, dropped) = reconcile(v, newer);
                        if dropped > 0 {
                            lost.push((id.clone(), dropped));
                        }
                        value
                    }
                    None => v,
                };
                live.insert(id, value);
            }
            if lifetime.is_persisted() {
                self.mark_dirty();
            }
        }
        lost
    }

    /// Drop every store of `lifetime`. The caller must hold the cut
    /// exclusively.
    pub(crate) fn clear_unguarded(&self, lifetime: Lifetime) {
        match self.slots[lifetime.index()].stores.write() {
            Ok(mut stores) => stores.clear(),
            Err(_) => error!("{} {} stores poisoned, cannot clear", self.kind, lifetime),
        }
        if lifetime.is_persisted() {
            self.mark_dirty();
        }
    }

    /// Every persisted-lifetime value as a flat, ordered list of records.
    pub fn persisted_records(&self) -> Vec<PersistedRecord<V>> {
        let mut records = Vec::new();
        for lifetime in Lifetime::ALL.iter().filter(|l| l.is_persisted()) {
            let stores = match self.slots[lifetime.index()].stores.read() {
                Ok(stores) => stores,
                Err(_) => continue,
            };
            for (store, cell) in stores.iter() {
                if let Ok(cells) = cell.lock() {
                    for (id, v) in cells.iter() {
                        records.push(PersistedRecord {
                            lifetime: *lifetime,
                            store: store.clone(),
                            category: id.category.clone(),
                            name: id.name.clone(),
                            value: v.clone(),
                        });
                    }
                }
            }
        }
        records.sort_by(|a, b| {
            (a.lifetime, &a.store, &a.category, &a.name).cmp(&(b.lifetime, &b.store, &b.category, &b.name))
        });
        records
    }

    /// Load persisted records into memory. Ping-lifetime records are
    /// ignored; they are never legitimately on disk.
    pub fn restore_records(&self, records: Vec<PersistedRecord<V>>) {
        for record in records {
            if !record.lifetime.is_persisted() {
                warn!(
                    "ignoring persisted {} record {}.{} with ping lifetime",
                    self.kind, record.category, record.name
                );
                continue;
            }
            let id = MetricIdentity::new(record.category, record.name);
            if let Some(cell) = self.cell_or_insert(record.lifetime, &record.store) {
                if let Ok(mut cells) = cell.lock() {
                    cells.insert(id, record.value);
                }
            }
        }
    }

    /// Clear and return the dirty flag.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Note that persisted-lifetime data changed since the last flush.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn cell(&self, lifetime: Lifetime, store: &str) -> Option<StoreCell<V>> {
        self.slots[lifetime.index()]
            .stores
            .read()
            .ok()
            .and_then(|stores| stores.get(store).cloned())
    }

    fn cell_or_insert(&self, lifetime: Lifetime, store: &str) -> Option<StoreCell<V>> {
        if let Some(cell) = self.cell(lifetime, store) {
            return Some(cell);
        }
        match self.slots[lifetime.index()].stores.write() {
            Ok(mut stores) => Some(Arc::clone(
                stores
                    .entry(store.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(Cells::default()))),
            )),
            Err(_) => {
                error!("{} {} stores poisoned", self.kind, lifetime);
                None
            }
        }
    }
}
