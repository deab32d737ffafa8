// Archivo: repository.rs
// Propósito: definir el trait `CheckpointStore`, el contrato del store de
// checkpoints que provee el framework state-and-event (en memoria, tabla
// compactada del log, etc.).
use crate::domain::{Checkpoint, FlowId};
use crate::errors::Result;

/// Store de checkpoints indexado por `flow_id`.
///
/// Sólo el dueño actual de la partición escribe; el store no arbitra
/// concurrencia entre nodos.
pub trait CheckpointStore: Send + Sync {
    /// Último checkpoint confirmado del flow, si existe.
    fn get(&self, flow_id: &FlowId) -> Result<Option<Checkpoint>>;

    /// Guarda (o reemplaza) el checkpoint.
    fn put(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Tombstone: elimina el checkpoint. Eliminar uno inexistente no es
    /// error.
    fn remove(&self, flow_id: &FlowId) -> Result<()>;

    /// Todos los checkpoints guardados, en orden de `flow_id`.
    fn list(&self) -> Result<Vec<Checkpoint>>;
}
