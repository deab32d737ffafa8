// Archivo: in_memory.rs
// Propósito: log de eventos en memoria para pruebas y la demo. Guarda los
// eventos por partición, un cursor confirmado por partición, los
// checkpoints (vía `InMemoryCheckpointStore`) y los registros publicados.
// No es durable.
use crate::errors::{ExecutorError, Result};
use crate::partition::{partition_for, PartitionId};
use crate::transport::{CheckpointUpdate, CommitBatch, EventLog, LogRecord};
use async_trait::async_trait;
use flow::{Checkpoint, CheckpointStore, FlowEvent, FlowId, FlowStatus, InMemoryCheckpointStore, OutboundRecord};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct PartitionLog {
    events: Vec<FlowEvent>,
    /// Siguiente offset pendiente de confirmar.
    committed: u64,
}

#[derive(Default)]
struct PartitionSlot {
    log: Mutex<PartitionLog>,
    notify: Notify,
}

/// Fallos inyectables para pruebas de aislamiento.
#[derive(Default)]
struct Faults {
    commits: HashMap<PartitionId, usize>,
    loads: HashSet<FlowId>,
}

pub struct InMemoryEventLog {
    partitions: Vec<PartitionSlot>,
    store: InMemoryCheckpointStore,
    published: Mutex<Vec<OutboundRecord>>,
    faults: Mutex<Faults>,
}

impl InMemoryEventLog {
    pub fn new(partition_count: u32) -> Self {
        Self { partitions: (0..partition_count.max(1)).map(|_| PartitionSlot::default()).collect(),
               store: InMemoryCheckpointStore::new(),
               published: Mutex::new(Vec::new()),
               faults: Mutex::new(Faults::default()) }
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    fn slot(&self, partition: PartitionId) -> Result<&PartitionSlot> {
        self.partitions
            .get(partition.0 as usize)
            .ok_or(ExecutorError::PartitionNotOwned(partition))
    }

    fn lock<'a, T>(&'a self, m: &'a Mutex<T>) -> Result<MutexGuard<'a, T>> {
        m.lock().map_err(|e| ExecutorError::Transport(format!("mutex poisoned: {:?}", e)))
    }

    /// Publica en la partición dueña del flow.
    pub async fn send(&self, event: FlowEvent) -> Result<(PartitionId, u64)> {
        let partition = partition_for(&event.flow_id, self.partition_count());
        let offset = self.publish(partition, event).await?;
        Ok((partition, offset))
    }

    /// Todos los registros salientes confirmados, en orden de commit.
    pub fn published(&self) -> Vec<OutboundRecord> {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Registros `FlowStatus` confirmados para un flow.
    pub fn statuses_for(&self, flow_id: &FlowId) -> Vec<FlowStatus> {
        self.published()
            .into_iter()
            .filter_map(|r| match r {
                OutboundRecord::Status(status) if &status.flow_id == flow_id => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn checkpoint(&self, flow_id: &FlowId) -> Option<Checkpoint> {
        self.store.get(flow_id).ok().flatten()
    }

    pub fn committed_offset(&self, partition: PartitionId) -> u64 {
        self.partitions
            .get(partition.0 as usize)
            .map(|slot| slot.log.lock().unwrap_or_else(|e| e.into_inner()).committed)
            .unwrap_or(0)
    }

    pub fn event_count(&self, partition: PartitionId) -> u64 {
        self.partitions
            .get(partition.0 as usize)
            .map(|slot| slot.log.lock().unwrap_or_else(|e| e.into_inner()).events.len() as u64)
            .unwrap_or(0)
    }

    /// `true` cuando todas las particiones confirmaron todos sus eventos.
    pub fn is_drained(&self) -> bool {
        (0..self.partition_count()).map(PartitionId)
                                   .all(|p| self.committed_offset(p) == self.event_count(p))
    }

    /// Espera (sondeando) hasta que `condition` se cumpla o venza `timeout`.
    pub async fn wait_until<F>(&self, timeout: Duration, condition: F) -> bool
        where F: Fn(&Self) -> bool
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Los próximos `count` commits de la partición fallan con error de
    /// transporte.
    pub fn fail_next_commits(&self, partition: PartitionId, count: usize) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .commits
            .insert(partition, count);
    }

    /// La próxima carga del checkpoint de este flow falla.
    pub fn fail_next_load(&self, flow_id: FlowId) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).loads.insert(flow_id);
    }

    /// Siembra un checkpoint directamente en el store (estado heredado de
    /// otro nodo).
    pub fn seed_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        self.store.put(checkpoint)?;
        Ok(())
    }

    fn take_commit_fault(&self, partition: PartitionId) -> Result<bool> {
        let mut faults = self.lock(&self.faults)?;
        match faults.commits.get_mut(&partition) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn pending(&self, partition: PartitionId, max: usize) -> Result<Vec<LogRecord>> {
        let slot = self.slot(partition)?;
        let log = self.lock(&slot.log)?;
        let from = log.committed as usize;
        Ok(log.events
              .iter()
              .enumerate()
              .skip(from)
              .take(max)
              .map(|(offset, event)| LogRecord { partition,
                                                 offset: offset as u64,
                                                 event: event.clone() })
              .collect())
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn poll(&self, partition: PartitionId, max: usize) -> Result<Vec<LogRecord>> {
        let slot = self.slot(partition)?;
        loop {
            let notified = slot.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let records = self.pending(partition, max)?;
            if !records.is_empty() {
                return Ok(records);
            }
            notified.await;
        }
    }

    async fn load_checkpoint(&self, flow_id: &FlowId) -> Result<Option<Checkpoint>> {
        if self.lock(&self.faults)?.loads.remove(flow_id) {
            return Err(ExecutorError::Transport(format!("carga fallida del checkpoint {}", flow_id)));
        }
        Ok(self.store.get(flow_id)?)
    }

    async fn partition_snapshot(&self, partition: PartitionId) -> Result<Vec<Checkpoint>> {
        let count = self.partition_count();
        Ok(self.store
               .list()?
               .into_iter()
               .filter(|cp| partition_for(&cp.flow_id, count) == partition)
               .collect())
    }

    async fn commit(&self, batch: CommitBatch) -> Result<()> {
        if self.take_commit_fault(batch.partition)? {
            return Err(ExecutorError::Transport(format!("commit rechazado en la partición {}", batch.partition)));
        }
        let slot = self.slot(batch.partition)?;
        let mut log = self.lock(&slot.log)?;
        if batch.offset != log.committed {
            return Err(ExecutorError::StaleCommit { partition: batch.partition,
                                                    expected: log.committed,
                                                    got: batch.offset });
        }
        match batch.checkpoint {
            CheckpointUpdate::Put(checkpoint) => self.store.put(checkpoint)?,
            CheckpointUpdate::Remove => self.store.remove(&batch.flow_id)?,
            CheckpointUpdate::Keep => {}
        }
        self.lock(&self.published)?.extend(batch.records);
        log.committed += 1;
        Ok(())
    }

    async fn publish(&self, partition: PartitionId, event: FlowEvent) -> Result<u64> {
        let slot = self.slot(partition)?;
        let offset = {
            let mut log = self.lock(&slot.log)?;
            log.events.push(event);
            log.events.len() as u64 - 1
        };
        slot.notify.notify_waiters();
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_commit_is_fenced() {
        tokio_test::block_on(async {
            let log = InMemoryEventLog::new(1);
            let p = PartitionId(0);
            log.publish(p, FlowEvent::wakeup(FlowId::from("a"))).await.unwrap();
            log.publish(p, FlowEvent::wakeup(FlowId::from("b"))).await.unwrap();

            let batch = |offset| CommitBatch { partition: p,
                                               offset,
                                               flow_id: FlowId::from("a"),
                                               checkpoint: CheckpointUpdate::Keep,
                                               records: Vec::new() };
            log.commit(batch(0)).await.unwrap();
            let stale = log.commit(batch(0)).await;
            assert!(matches!(stale, Err(ExecutorError::StaleCommit { expected: 1, got: 0, .. })));
            assert_eq!(log.committed_offset(p), 1);
            let pending = log.poll(p, 10).await.unwrap();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].offset, 1);
        });
    }
}
