// Archivo: errors.rs
// Propósito: errores del runtime (transporte, commits, rebalanceo) y el
// alias Result<T> del crate.
use crate::partition::PartitionId;
use flow::FlowError;
use thiserror::Error;

/// Errores del executor. Los errores de flow se envuelven con `#[from]`.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Error de flow: {0}")]
    Flow(#[from] FlowError),
    /// Fallo del log de eventos (poll, publish, carga de estado).
    #[error("Error de transporte: {0}")]
    Transport(String),
    /// Commit de un dueño obsoleto: el offset ya no es el siguiente.
    #[error("Commit obsoleto en la partición {partition}: esperado {expected}, recibido {got}")]
    StaleCommit { partition: PartitionId, expected: u64, got: u64 },
    /// El worker de una partición no terminó dentro del plazo de drenado.
    #[error("Tiempo de drenado agotado ({0} ms)")]
    DrainTimeout(u64),
    #[error("Error en tarea: {0}")]
    Join(String),
    #[error("Error de configuración: {0}")]
    Config(String),
    #[error("La partición {0} no existe o no está asignada")]
    PartitionNotOwned(PartitionId),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
