// Archivo: executor.rs
// Propósito: objeto de ciclo de vida de nivel superior. Un worker tokio por
// partición asignada procesa sus eventos en orden de log:
// cargar checkpoint -> pipeline (en `spawn_blocking`) -> commit atómico ->
// post-commit. La caché de fibers es la única estructura compartida entre
// workers.
use crate::config::ExecutorConfig;
use crate::errors::{ExecutorError, Result};
use crate::fiber_cache::FlowFiberCache;
use crate::partition::PartitionId;
use crate::rebalance::{FlowRebalanceListener, RebalanceListener};
use crate::scheduler::WakeupScheduler;
use crate::transport::{CheckpointUpdate, CommitBatch, EventLog, LogRecord};
use chrono::Utc;
use flow::{FailureKind, FiberRunner, FiberSource, FlowConfig, FlowFailure, FlowPipeline, PipelineContext, PipelineResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Eventos pedidos al log por cada poll.
const POLL_BATCH: usize = 64;

struct WorkerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct FlowExecutor {
    config: ExecutorConfig,
    log: Arc<dyn EventLog>,
    cache: Arc<FlowFiberCache>,
    pipeline: Arc<FlowPipeline>,
    scheduler: Arc<WakeupScheduler>,
    listener: Arc<dyn RebalanceListener>,
    workers: Mutex<BTreeMap<PartitionId, WorkerHandle>>,
}

impl FlowExecutor {
    pub fn new(config: ExecutorConfig, log: Arc<dyn EventLog>, runner: Arc<dyn FiberRunner>) -> Result<Self> {
        config.validate()?;
        let retention = config.flow.cleanup_retention();
        let cache = Arc::new(FlowFiberCache::new(runner, config.fiber_cache_capacity, config.partition_count));
        let pipeline = Arc::new(FlowPipeline::new(cache.clone()));
        let scheduler = Arc::new(WakeupScheduler::new(log.clone(), config.partition_count));
        let listener: Arc<dyn RebalanceListener> =
            Arc::new(FlowRebalanceListener::new(cache.clone(), scheduler.clone(), retention));
        log::info!("executor_created partitions={} fiber_cache_capacity={}",
                   config.partition_count,
                   config.fiber_cache_capacity);
        Ok(Self { config,
                  log,
                  cache,
                  pipeline,
                  scheduler,
                  listener,
                  workers: Mutex::new(BTreeMap::new()) })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn fiber_cache(&self) -> &Arc<FlowFiberCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Arc<WakeupScheduler> {
        &self.scheduler
    }

    /// Particiones ganadas: sincroniza con la foto actual y arranca un
    /// worker por partición. Reasignar una partición ya propia no hace nada.
    pub async fn on_partitions_assigned(&self, partitions: &[PartitionId]) -> Result<()> {
        let mut workers = self.workers.lock().await;
        for &partition in partitions {
            if partition.0 >= self.config.partition_count {
                return Err(ExecutorError::PartitionNotOwned(partition));
            }
            if workers.contains_key(&partition) {
                log::debug!("partition_already_assigned partition={}", partition);
                continue;
            }
            let snapshot = self.log.partition_snapshot(partition).await?;
            self.listener.on_partition_synced(partition, &snapshot);

            let (stop, stop_rx) = watch::channel(false);
            let task = tokio::spawn(self.worker(partition).run(stop_rx));
            workers.insert(partition, WorkerHandle { stop, task });
            log::info!("partition_assigned partition={} checkpoints={}", partition, snapshot.len());
        }
        Ok(())
    }

    /// Particiones perdidas: para sus workers, espera a que terminen el
    /// evento en vuelo (hasta `drain_timeout`) y expulsa sus fibers antes
    /// de volver.
    pub async fn on_partitions_lost(&self, partitions: &[PartitionId]) -> Result<()> {
        let handles: Vec<(PartitionId, WorkerHandle)> = {
            let mut workers = self.workers.lock().await;
            partitions.iter()
                      .filter_map(|p| workers.remove(p).map(|h| (*p, h)))
                      .collect()
        };
        for (_, handle) in &handles {
            // el receptor puede haber terminado ya
            let _ = handle.stop.send(true);
        }

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout();
        let mut timed_out = false;
        let mut join_failure = None;
        for (partition, handle) in handles {
            let abort = handle.task.abort_handle();
            match tokio::time::timeout_at(deadline, handle.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!("worker_join_failed partition={} error={}", partition, e);
                    join_failure = Some(format!("worker de la partición {}: {}", partition, e));
                }
                Err(_) => {
                    log::error!("worker_drain_timeout partition={} timeout_ms={}",
                                partition,
                                self.config.drain_timeout_ms);
                    abort.abort();
                    timed_out = true;
                }
            }
        }
        for partition in partitions {
            self.listener.on_partition_lost(*partition);
        }
        if timed_out {
            return Err(ExecutorError::DrainTimeout(self.config.drain_timeout_ms));
        }
        match join_failure {
            Some(message) => Err(ExecutorError::Join(message)),
            None => Ok(()),
        }
    }

    /// Drena todos los workers, cancela los temporizadores y libera todos
    /// los fibers cacheados.
    pub async fn stop(&self) -> Result<()> {
        let partitions = self.assigned_partitions().await;
        let drained = self.on_partitions_lost(&partitions).await;
        self.scheduler.cancel_all();
        self.cache.clear();
        log::info!("executor_stopped partitions={}", partitions.len());
        drained
    }

    pub async fn assigned_partitions(&self) -> Vec<PartitionId> {
        self.workers.lock().await.keys().copied().collect()
    }

    fn worker(&self, partition: PartitionId) -> PartitionWorker {
        PartitionWorker { partition,
                          log: self.log.clone(),
                          pipeline: self.pipeline.clone(),
                          cache: self.cache.clone(),
                          scheduler: self.scheduler.clone(),
                          listener: self.listener.clone(),
                          flow_config: self.config.flow.clone(),
                          error_backoff: self.config.error_backoff() }
    }
}

struct PartitionWorker {
    partition: PartitionId,
    log: Arc<dyn EventLog>,
    pipeline: Arc<FlowPipeline>,
    cache: Arc<FlowFiberCache>,
    scheduler: Arc<WakeupScheduler>,
    listener: Arc<dyn RebalanceListener>,
    flow_config: FlowConfig,
    error_backoff: Duration,
}

impl PartitionWorker {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        log::info!("worker_started partition={}", self.partition);
        'poll: loop {
            if *stop.borrow() {
                break;
            }
            let polled = tokio::select! {
                _ = stop.changed() => break,
                polled = self.log.poll(self.partition, POLL_BATCH) => polled,
            };
            let records = match polled {
                Ok(records) => records,
                Err(e) => {
                    log::error!("poll_failed partition={} error={}", self.partition, e);
                    tokio::select! {
                        _ = stop.changed() => break,
                        _ = tokio::time::sleep(self.error_backoff) => continue,
                    }
                }
            };
            for record in records {
                // la parada se atiende entre eventos, nunca a mitad de uno
                if *stop.borrow() {
                    break 'poll;
                }
                let offset = record.offset;
                if let Err(e) = self.process_record(record).await {
                    log::error!("event_not_committed partition={} offset={} error={}", self.partition, offset, e);
                    tokio::time::sleep(self.error_backoff).await;
                    continue 'poll;
                }
            }
        }
        log::info!("worker_stopped partition={}", self.partition);
    }

    /// Procesa un evento y confirma su resultado. Devuelve error si la carga
    /// del checkpoint o el commit fallan; en ambos casos el offset no avanza
    /// y el evento se vuelve a entregar.
    async fn process_record(&self, record: LogRecord) -> Result<()> {
        let LogRecord { partition, offset, event } = record;
        let flow_id = event.flow_id.clone();
        let ctx = PipelineContext::new(self.flow_config.clone(), Utc::now());

        let checkpoint = match self.log.load_checkpoint(&flow_id).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                log::error!("checkpoint_load_failed flow_id={} partition={} offset={} error={}",
                            flow_id, partition, offset, e);
                return Err(e);
            }
        };
        let snapshot = checkpoint.clone();
        let pipeline = self.pipeline.clone();
        let (task_event, task_ctx) = (event.clone(), ctx.clone());
        let joined = tokio::task::spawn_blocking(move || pipeline.process(checkpoint, &task_event, &task_ctx)).await;
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                let message = join_error_message(e);
                log::error!("pipeline_panicked flow_id={} partition={} offset={} error={}",
                            flow_id, partition, offset, message);
                self.cache.discard(&flow_id);
                self.pipeline
                    .fail_event(snapshot, &event, FlowFailure::new(FailureKind::Platform, message), &ctx)
            }
        };
        let update = checkpoint_update(&result);

        let tombstone = update == CheckpointUpdate::Remove;
        let records = result.outbound_records;
        let batch = CommitBatch { partition,
                                  offset,
                                  flow_id: flow_id.clone(),
                                  checkpoint: update,
                                  records: records.clone() };
        if let Err(e) = self.log.commit(batch).await {
            // el fiber vivo va por delante del último estado confirmado
            self.cache.discard(&flow_id);
            return Err(e);
        }
        if tombstone {
            self.scheduler.cancel_flow(&flow_id);
        }
        self.listener.on_post_commit(partition, &records);
        log::debug!("event_committed flow_id={} partition={} offset={} fiber_iterations={} records={}",
                    flow_id,
                    partition,
                    offset,
                    result.stats.fiber_iterations,
                    records.len());
        Ok(())
    }
}

fn checkpoint_update(result: &PipelineResult) -> CheckpointUpdate {
    match &result.updated_checkpoint {
        Some(checkpoint) => CheckpointUpdate::Put(checkpoint.clone()),
        None => CheckpointUpdate::Remove,
    }
}

fn join_error_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return format!("tarea cancelada: {}", err);
    }
    let panic = err.into_panic();
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("pánico: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("pánico: {}", message)
    } else {
        "pánico sin mensaje".to_string()
    }
}
