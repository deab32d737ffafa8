// Archivo: transport.rs
// Propósito: contrato con el log de eventos particionado con semántica
// state-and-event: lectura del último checkpoint confirmado y commit
// atómico de (checkpoint, registros salientes, offset).
use crate::errors::Result;
use crate::partition::PartitionId;
use async_trait::async_trait;
use flow::{Checkpoint, FlowEvent, FlowId, OutboundRecord};

/// Evento entregado por el log en una partición y offset concretos.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub partition: PartitionId,
    pub offset: u64,
    pub event: FlowEvent,
}

/// Qué hacer con el checkpoint del flow al confirmar.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointUpdate {
    Put(Checkpoint),
    /// Tombstone.
    Remove,
    /// Estado no leído (fallo de carga): se deja como está.
    Keep,
}

/// Lote atómico que cierra el procesamiento de un evento.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitBatch {
    pub partition: PartitionId,
    /// Offset del evento procesado; el cursor avanza a `offset + 1`.
    pub offset: u64,
    pub flow_id: FlowId,
    pub checkpoint: CheckpointUpdate,
    pub records: Vec<OutboundRecord>,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Espera hasta que haya eventos sin confirmar en la partición y
    /// devuelve hasta `max` a partir del cursor confirmado. Un evento cuyo
    /// commit falló se vuelve a entregar.
    async fn poll(&self, partition: PartitionId, max: usize) -> Result<Vec<LogRecord>>;

    /// Último checkpoint confirmado del flow.
    async fn load_checkpoint(&self, flow_id: &FlowId) -> Result<Option<Checkpoint>>;

    /// Checkpoints actuales de una partición (sincronización al ganarla).
    async fn partition_snapshot(&self, partition: PartitionId) -> Result<Vec<Checkpoint>>;

    /// Confirma el lote. Falla con `StaleCommit` si `offset` no es el
    /// siguiente pendiente de la partición.
    async fn commit(&self, batch: CommitBatch) -> Result<()>;

    /// Añade un evento al final de la partición y devuelve su offset.
    async fn publish(&self, partition: PartitionId, event: FlowEvent) -> Result<u64>;
}
