// Archivo: scheduler.rs
// Propósito: temporizadores que convierten registros `Wakeup` y
// `ScheduleCleanup` confirmados en `FlowEvent`s publicados de vuelta en el
// log cuando vence su hora.
//
// Hay a lo sumo un temporizador por (flow, tipo): programar de nuevo
// reemplaza el anterior.
use crate::errors::{ExecutorError, Result};
use crate::partition::{partition_for, PartitionId};
use crate::transport::EventLog;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flow::{FlowEvent, FlowEventPayload, FlowId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Wakeup,
    Cleanup,
}

impl TimerKind {
    fn of(payload: &FlowEventPayload) -> Option<TimerKind> {
        match payload {
            FlowEventPayload::Wakeup => Some(TimerKind::Wakeup),
            FlowEventPayload::ScheduleCleanup => Some(TimerKind::Cleanup),
            _ => None,
        }
    }
}

type TimerKey = (FlowId, TimerKind);
type Timers = DashMap<TimerKey, (u64, JoinHandle<()>)>;

pub struct WakeupScheduler {
    log: Arc<dyn EventLog>,
    partition_count: u32,
    timers: Arc<Timers>,
    generation: AtomicU64,
}

impl WakeupScheduler {
    pub fn new(log: Arc<dyn EventLog>, partition_count: u32) -> Self {
        Self { log,
               partition_count,
               timers: Arc::new(DashMap::new()),
               generation: AtomicU64::new(0) }
    }

    /// Publica `event` en la partición de su flow cuando llegue `due_at`.
    /// Sólo acepta `Wakeup` y `ScheduleCleanup`. Requiere un runtime tokio.
    pub fn schedule(&self, event: FlowEvent, due_at: DateTime<Utc>) -> Result<()> {
        let kind = TimerKind::of(&event.payload).ok_or_else(|| {
                       ExecutorError::Config(format!("evento no programable: {:?}", event.payload.kind()))
                   })?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ExecutorError::Transport(format!("sin runtime tokio: {}", e)))?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let key: TimerKey = (event.flow_id.clone(), kind);
        let partition = partition_for(&event.flow_id, self.partition_count);

        // la entrada queda bloqueada hasta registrar el handle; un temporizador
        // que dispare antes espera en `remove_if`
        let entry = self.timers.entry(key.clone());
        let handle = runtime.spawn(fire(self.log.clone(),
                                        self.timers.clone(),
                                        key,
                                        generation,
                                        partition,
                                        event,
                                        due_at));
        match entry {
            Entry::Occupied(mut occupied) => {
                let (_, previous) = occupied.insert((generation, handle));
                previous.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert((generation, handle));
            }
        }
        Ok(())
    }

    /// Cancela los temporizadores de un flow (por ejemplo tras su tombstone).
    pub fn cancel_flow(&self, flow_id: &FlowId) {
        for kind in [TimerKind::Wakeup, TimerKind::Cleanup] {
            if let Some((_, (_, handle))) = self.timers.remove(&(flow_id.clone(), kind)) {
                handle.abort();
            }
        }
    }

    /// Cancela todo lo programado para flows de `partition`.
    pub fn cancel_partition(&self, partition: PartitionId) -> usize {
        let keys: Vec<TimerKey> = self.timers
                                      .iter()
                                      .filter(|e| partition_for(&e.key().0, self.partition_count) == partition)
                                      .map(|e| e.key().clone())
                                      .collect();
        self.cancel_keys(keys)
    }

    pub fn cancel_all(&self) -> usize {
        let keys: Vec<TimerKey> = self.timers.iter().map(|e| e.key().clone()).collect();
        self.cancel_keys(keys)
    }

    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }

    pub fn is_scheduled(&self, flow_id: &FlowId, kind: TimerKind) -> bool {
        self.timers.contains_key(&(flow_id.clone(), kind))
    }

    fn cancel_keys(&self, keys: Vec<TimerKey>) -> usize {
        let mut cancelled = 0;
        for key in keys {
            if let Some((_, (_, handle))) = self.timers.remove(&key) {
                handle.abort();
                cancelled += 1;
            }
        }
        cancelled
    }
}

async fn fire(log: Arc<dyn EventLog>,
              timers: Arc<Timers>,
              key: TimerKey,
              generation: u64,
              partition: PartitionId,
              event: FlowEvent,
              due_at: DateTime<Utc>) {
    // el reloj de pared puede ir por detrás del monotónico
    loop {
        let remaining = (due_at - Utc::now()).to_std().unwrap_or_default();
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(remaining).await;
    }
    match log.publish(partition, event).await {
        Ok(offset) => {
            log::debug!("timer_fired flow_id={} kind={:?} partition={} offset={}", key.0, key.1, partition, offset)
        }
        Err(e) => log::error!("timer_publish_failed flow_id={} kind={:?} error={}", key.0, key.1, e),
    }
    timers.remove_if(&key, |_, (current, _)| *current == generation);
}
