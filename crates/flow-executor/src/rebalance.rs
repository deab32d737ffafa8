// Archivo: rebalance.rs
// Propósito: reacción a cambios de asignación de particiones y a commits
// confirmados.
use crate::fiber_cache::FlowFiberCache;
use crate::partition::PartitionId;
use crate::scheduler::WakeupScheduler;
use flow::{Checkpoint, CheckpointStatus, FlowEvent, OutboundRecord, WaitingFor};
use std::sync::Arc;

/// Lo invoca la capa de transporte. Las tres llamadas son síncronas: cuando
/// `on_partition_lost` vuelve, ningún fiber de la partición sigue vivo en
/// este proceso.
pub trait RebalanceListener: Send + Sync {
    /// Partición ganada, con la foto de sus checkpoints actuales.
    fn on_partition_synced(&self, partition: PartitionId, checkpoints: &[Checkpoint]);

    fn on_partition_lost(&self, partition: PartitionId);

    /// Tras confirmar de forma durable el lote de un evento.
    fn on_post_commit(&self, partition: PartitionId, records: &[OutboundRecord]);
}

pub struct FlowRebalanceListener {
    cache: Arc<FlowFiberCache>,
    scheduler: Arc<WakeupScheduler>,
    cleanup_retention: chrono::Duration,
}

impl FlowRebalanceListener {
    pub fn new(cache: Arc<FlowFiberCache>, scheduler: Arc<WakeupScheduler>, cleanup_retention: chrono::Duration) -> Self {
        Self { cache,
               scheduler,
               cleanup_retention }
    }

    fn schedule(&self, event: FlowEvent, due_at: chrono::DateTime<chrono::Utc>) {
        let flow_id = event.flow_id.clone();
        if let Err(e) = self.scheduler.schedule(event, due_at) {
            log::warn!("timer_schedule_failed flow_id={} error={}", flow_id, e);
        }
    }
}

impl RebalanceListener for FlowRebalanceListener {
    /// Los fibers se crean en el primer evento; aquí sólo se re-siembran los
    /// temporizadores que el dueño anterior tenía en memoria.
    fn on_partition_synced(&self, partition: PartitionId, checkpoints: &[Checkpoint]) {
        self.cache.restore_partition(partition);
        let mut seeded = 0;
        for checkpoint in checkpoints {
            match (&checkpoint.status, &checkpoint.waiting_for) {
                (CheckpointStatus::Suspended | CheckpointStatus::Retrying, WaitingFor::Wakeup { at }) => {
                    self.schedule(FlowEvent::wakeup(checkpoint.flow_id.clone()), *at);
                    seeded += 1;
                }
                (status, _) if status.is_terminal() => {
                    let due_at = checkpoint.last_updated_at + self.cleanup_retention;
                    self.schedule(FlowEvent::cleanup(checkpoint.flow_id.clone()), due_at);
                    seeded += 1;
                }
                _ => {}
            }
        }
        log::info!("partition_synced partition={} checkpoints={} timers={}",
                   partition,
                   checkpoints.len(),
                   seeded);
    }

    fn on_partition_lost(&self, partition: PartitionId) {
        let timers = self.scheduler.cancel_partition(partition);
        let fibers = self.cache.revoke_partition(partition);
        log::info!("partition_lost partition={} timers_cancelled={} fibers_evicted={}",
                   partition,
                   timers,
                   fibers);
    }

    fn on_post_commit(&self, _partition: PartitionId, records: &[OutboundRecord]) {
        for record in records {
            match record {
                OutboundRecord::Wakeup { flow_id, due_at } => self.schedule(FlowEvent::wakeup(flow_id.clone()), *due_at),
                OutboundRecord::ScheduleCleanup { flow_id, due_at } => {
                    self.schedule(FlowEvent::cleanup(flow_id.clone()), *due_at)
                }
                _ => {}
            }
        }
    }
}
