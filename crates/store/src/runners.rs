use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use mazu_core::ExploitJob;
use rustc_hash::FxHashMap;
use tokio::sync::watch;

/// Jobs currently executing per container, fetched on demand.
pub struct ContainerRunners {
    map: ArcSwap<FxHashMap<String, Vec<ExploitJob>>>,
    write: Mutex<()>,
    epoch_tx: watch::Sender<u64>,
}

impl Default for ContainerRunners {
    fn default() -> Self { Self::new() }
}

impl ContainerRunners {
    pub fn new() -> Self {
        let (epoch_tx, _) = watch::channel(0u64);
        Self { map: ArcSwap::from_pointee(FxHashMap::default()), write: Mutex::new(()), epoch_tx }
    }

    pub fn get(&self, container_id: &str) -> Option<Vec<ExploitJob>> { self.map.load().get(container_id).cloned() }

    pub fn all(&self) -> Arc<FxHashMap<String, Vec<ExploitJob>>> { self.map.load_full() }

    pub fn subscribe(&self) -> watch::Receiver<u64> { self.epoch_tx.subscribe() }

    pub fn set(&self, container_id: &str, runners: Vec<ExploitJob>) {
        self.edit(|m| {
            m.insert(container_id.to_string(), runners);
            true
        });
    }

    pub fn remove(&self, container_id: &str) -> bool { self.edit(|m| m.remove(container_id).is_some()) }

    pub fn clear(&self) { self.edit(|m| { m.clear(); true }); }

    fn edit(&self, f: impl FnOnce(&mut FxHashMap<String, Vec<ExploitJob>>) -> bool) -> bool {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**self.map.load()).clone();
        if !f(&mut next) {
            return false;
        }
        self.map.store(Arc::new(next));
        self.epoch_tx.send_modify(|e| *e = e.saturating_add(1));
        true
    }
}
