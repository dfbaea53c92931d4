use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use mazu_core::Entity;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::trace;

/// Where a push-created record lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
    Append,
    /// Newest first (rounds, flags).
    Prepend,
}

/// Immutable view of a collection at one epoch.
#[derive(Debug, Clone)]
pub struct CollectionSnapshot<T: Entity> {
    pub epoch: u64,
    pub items: Vec<T>,
    index: FxHashMap<T::Id, usize>,
}

impl<T: Entity> Default for CollectionSnapshot<T> {
    fn default() -> Self { Self { epoch: 0, items: Vec::new(), index: FxHashMap::default() } }
}

impl<T: Entity> CollectionSnapshot<T> {
    pub fn get(&self, id: &T::Id) -> Option<&T> { self.index.get(id).map(|&i| &self.items[i]) }

    pub fn contains(&self, id: &T::Id) -> bool { self.index.contains_key(id) }

    pub fn ids(&self) -> Vec<T::Id> { self.items.iter().map(Entity::id).collect() }

    pub fn len(&self) -> usize { self.items.len() }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, it) in self.items.iter().enumerate() {
            self.index.insert(it.id(), i);
        }
    }

    fn replace_all(&mut self, records: Vec<T>) {
        self.items.clear();
        self.index.clear();
        // Later duplicates win but keep the first position.
        for r in records {
            let id = r.id();
            match self.index.get(&id) {
                Some(&i) => self.items[i] = r,
                None => {
                    self.index.insert(id, self.items.len());
                    self.items.push(r);
                }
            }
        }
    }

    fn upsert(&mut self, mut record: T, at: InsertAt) {
        let id = record.id();
        if let Some(&i) = self.index.get(&id) {
            record.inherit(&self.items[i]);
            self.items[i] = record;
            return;
        }
        match at {
            InsertAt::Append => {
                self.index.insert(id, self.items.len());
                self.items.push(record);
            }
            InsertAt::Prepend => {
                self.items.insert(0, record);
                self.reindex();
            }
        }
    }

    fn remove(&mut self, id: &T::Id) -> bool {
        match self.index.remove(id) {
            Some(i) => {
                self.items.remove(i);
                self.reindex();
                true
            }
            None => false,
        }
    }
}

/// Reactive keyed collection: `replace_all`, `upsert` and `remove` are the
/// whole mutation surface. Every change bumps the epoch seen by `subscribe`.
pub struct Collection<T: Entity> {
    name: &'static str,
    at: InsertAt,
    snap: ArcSwap<CollectionSnapshot<T>>,
    write: Mutex<()>,
    epoch_tx: watch::Sender<u64>,
}

impl<T: Entity> Collection<T> {
    pub fn new(name: &'static str) -> Self { Self::with_insert(name, InsertAt::Append) }

    pub fn newest_first(name: &'static str) -> Self { Self::with_insert(name, InsertAt::Prepend) }

    pub fn with_insert(name: &'static str, at: InsertAt) -> Self {
        let (epoch_tx, _) = watch::channel(0u64);
        Self { name, at, snap: ArcSwap::from_pointee(CollectionSnapshot::default()), write: Mutex::new(()), epoch_tx }
    }

    pub fn name(&self) -> &'static str { self.name }

    pub fn snapshot(&self) -> Arc<CollectionSnapshot<T>> { self.snap.load_full() }

    /// Current records, in collection order.
    pub fn items(&self) -> Vec<T> { self.snap.load().items.clone() }

    pub fn get(&self, id: &T::Id) -> Option<T> { self.snap.load().get(id).cloned() }

    pub fn contains(&self, id: &T::Id) -> bool { self.snap.load().contains(id) }

    pub fn ids(&self) -> Vec<T::Id> { self.snap.load().ids() }

    pub fn len(&self) -> usize { self.snap.load().len() }

    pub fn is_empty(&self) -> bool { self.snap.load().is_empty() }

    pub fn epoch(&self) -> u64 { self.snap.load().epoch }

    /// Receiver that observes the epoch after every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> { self.epoch_tx.subscribe() }

    pub fn replace_all(&self, records: Vec<T>) {
        let n = records.len();
        self.mutate(|s| {
            s.replace_all(records);
            true
        });
        trace!(collection = self.name, n, "replace_all");
    }

    /// Insert if absent, else replace in place keeping the position.
    pub fn upsert(&self, record: T) { self.upsert_at(record, self.at) }

    /// `upsert` with an explicit landing spot for a new record.
    pub fn upsert_at(&self, record: T, at: InsertAt) {
        self.mutate(|s| {
            s.upsert(record, at);
            true
        });
    }

    /// Returns whether anything was removed; absent ids are a no-op.
    pub fn remove(&self, id: &T::Id) -> bool { self.mutate(|s| s.remove(id)) }

    /// Read-modify-upsert of an existing record; no-op when absent.
    pub fn update(&self, id: &T::Id, f: impl FnOnce(&mut T)) -> bool {
        self.mutate(|s| match s.index.get(id) {
            Some(&i) => {
                f(&mut s.items[i]);
                true
            }
            None => false,
        })
    }

    pub fn clear(&self) { self.replace_all(Vec::new()) }

    fn mutate(&self, f: impl FnOnce(&mut CollectionSnapshot<T>) -> bool) -> bool {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**self.snap.load()).clone();
        if !f(&mut next) {
            return false;
        }
        next.epoch = next.epoch.saturating_add(1);
        let epoch = next.epoch;
        self.snap.store(Arc::new(next));
        self.epoch_tx.send_replace(epoch);
        true
    }
}
