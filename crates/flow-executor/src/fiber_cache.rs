// Archivo: fiber_cache.rs
// Propósito: caché acotada flow_id -> fiber vivo, compartida por todos los
// workers del proceso. Get-or-create atómico por entrada y expulsión LRU por
// tamaño; toda expulsión pasa por el hook `release` del runner.
use crate::partition::{partition_for, PartitionId};
use dashmap::{DashMap, DashSet};
use flow::{release_shared, Checkpoint, FiberError, FiberRunner, FiberSource, FlowId, SharedFiber};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Motivo por el que un fiber salió de la caché.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Se superó la capacidad (LRU).
    Capacity,
    /// La partición dueña del flow se reasignó a otro nodo.
    PartitionLost,
    /// Flow terminal, fallo transitorio o estado dudoso.
    Discarded,
    Shutdown,
}

pub type EvictionCallback = Arc<dyn Fn(&FlowId, EvictionReason) + Send + Sync>;

struct CacheEntry {
    fiber: SharedFiber,
    partition: PartitionId,
    last_used: AtomicU64,
}

pub struct FlowFiberCache {
    runner: Arc<dyn FiberRunner>,
    entries: DashMap<FlowId, Arc<CacheEntry>>,
    capacity: usize,
    partition_count: u32,
    clock: AtomicU64,
    /// Particiones perdidas: `acquire` no crea ni entrega fibers suyos.
    revoked: DashSet<PartitionId>,
    on_evict: Mutex<Option<EvictionCallback>>,
}

impl FlowFiberCache {
    pub fn new(runner: Arc<dyn FiberRunner>, capacity: usize, partition_count: u32) -> Self {
        Self { runner,
               entries: DashMap::new(),
               capacity: capacity.max(1),
               partition_count,
               clock: AtomicU64::new(0),
               revoked: DashSet::new(),
               on_evict: Mutex::new(None) }
    }

    /// Callback inyectado que observa cada expulsión.
    pub fn set_eviction_callback(&self, callback: EvictionCallback) {
        *self.on_evict.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, flow_id: &FlowId) -> bool {
        self.entries.contains_key(flow_id)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Expulsa todos los fibers cuyos flows caen en `partition`. Al volver,
    /// la caché no contiene ninguna entrada de esa partición.
    pub fn evict_partition(&self, partition: PartitionId) -> usize {
        let victims: Vec<FlowId> = self.entries
                                       .iter()
                                       .filter(|e| e.value().partition == partition)
                                       .map(|e| e.key().clone())
                                       .collect();
        let mut evicted = 0;
        for flow_id in victims {
            if self.evict(&flow_id, EvictionReason::PartitionLost) {
                evicted += 1;
            }
        }
        log::info!("fiber_cache_partition_evicted partition={} evicted={}", partition, evicted);
        evicted
    }

    /// Marca la partición como perdida y expulsa sus fibers. Un pipeline
    /// que siga en vuelo para esa partición ya no puede volver a poblar la
    /// caché hasta `restore_partition`.
    pub fn revoke_partition(&self, partition: PartitionId) -> usize {
        self.revoked.insert(partition);
        self.evict_partition(partition)
    }

    /// La partición vuelve a ser propia.
    pub fn restore_partition(&self, partition: PartitionId) {
        if self.revoked.remove(&partition).is_some() {
            log::debug!("fiber_cache_partition_restored partition={}", partition);
        }
    }

    pub fn is_revoked(&self, partition: PartitionId) -> bool {
        self.revoked.contains(&partition)
    }

    /// Libera todos los fibers (parada del executor).
    pub fn clear(&self) {
        let all: Vec<FlowId> = self.entries.iter().map(|e| e.key().clone()).collect();
        for flow_id in all {
            self.evict(&flow_id, EvictionReason::Shutdown);
        }
    }

    fn revoked_error(flow_id: &FlowId, partition: PartitionId) -> FiberError {
        FiberError::Fatal(format!("partición {} revocada; flow {} sin dueño local", partition, flow_id))
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Quita la entrada y libera su fiber fuera de cualquier lock del mapa.
    fn evict(&self, flow_id: &FlowId, reason: EvictionReason) -> bool {
        match self.entries.remove(flow_id) {
            Some((_, entry)) => {
                release_shared(&entry.fiber);
                self.notify(flow_id, reason);
                log::debug!("fiber_evicted flow_id={} reason={:?}", flow_id, reason);
                true
            }
            None => false,
        }
    }

    fn notify(&self, flow_id: &FlowId, reason: EvictionReason) {
        let callback = self.on_evict.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(callback) = callback {
            callback(flow_id, reason);
        }
    }

    /// Expulsa las entradas menos usadas hasta respetar la capacidad; nunca
    /// la que se acaba de entregar.
    fn enforce_capacity(&self, keep: &FlowId) {
        while self.entries.len() > self.capacity {
            let victim = self.entries
                             .iter()
                             .filter(|e| e.key() != keep)
                             .min_by_key(|e| e.value().last_used.load(Ordering::SeqCst))
                             .map(|e| e.key().clone());
            match victim {
                Some(flow_id) => {
                    self.evict(&flow_id, EvictionReason::Capacity);
                }
                None => break,
            }
        }
    }
}

impl FiberSource for FlowFiberCache {
    /// Get-or-create atómico: dos workers que piden el mismo flow a la vez
    /// obtienen el mismo fiber y el runner sólo lo crea una vez.
    fn acquire(&self, checkpoint: &Checkpoint) -> Result<SharedFiber, FiberError> {
        let now = self.tick();
        let partition = partition_for(&checkpoint.flow_id, self.partition_count);
        if self.is_revoked(partition) {
            return Err(Self::revoked_error(&checkpoint.flow_id, partition));
        }
        let fiber = {
            let entry = self.entries
                            .entry(checkpoint.flow_id.clone())
                            .or_try_insert_with(|| {
                                let fiber = self.runner.create_fiber(checkpoint)?;
                                log::debug!("fiber_created flow_id={} partition={}", checkpoint.flow_id, partition);
                                Ok::<_, FiberError>(Arc::new(CacheEntry { fiber: Arc::new(Mutex::new(fiber)),
                                                                          partition,
                                                                          last_used: AtomicU64::new(now) }))
                            })?;
            entry.last_used.store(now, Ordering::SeqCst);
            entry.fiber.clone()
        };
        // la revocación pudo llegar mientras se creaba la entrada
        if self.is_revoked(partition) {
            self.evict(&checkpoint.flow_id, EvictionReason::PartitionLost);
            return Err(Self::revoked_error(&checkpoint.flow_id, partition));
        }
        self.enforce_capacity(&checkpoint.flow_id);
        Ok(fiber)
    }

    fn finish(&self, flow_id: &FlowId, fiber: SharedFiber, keep: bool) {
        if keep {
            return;
        }
        let removed = self.entries
                          .remove_if(flow_id, |_, entry| Arc::ptr_eq(&entry.fiber, &fiber))
                          .is_some();
        release_shared(&fiber);
        if removed {
            self.notify(flow_id, EvictionReason::Discarded);
        }
    }

    fn discard(&self, flow_id: &FlowId) {
        self.evict(flow_id, EvictionReason::Discarded);
    }
}
