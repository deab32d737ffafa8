// Archivo: errors.rs
// Propósito: definir los errores del plano de control de flujos y el alias
// Result<T> usado por las APIs del crate.
use crate::domain::{CheckpointStatus, FlowId, SessionId};
use thiserror::Error;

/// Errores comunes del plano de control.
///
/// Ninguno de estos errores cruza la frontera pública de
/// `FlowPipeline::process`: el pipeline los convierte en un checkpoint
/// `FAILED` más un registro `FlowStatus`.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Evento distinto de `StartFlow` para un flow sin checkpoint previo.
    #[error("Checkpoint inexistente para el flow {0}")]
    MissingCheckpoint(FlowId),
    /// Transición de estado fuera de la tabla permitida.
    #[error("Transición inválida: {from:?} -> {to:?}")]
    InvalidTransition { from: CheckpointStatus, to: CheckpointStatus },
    /// La lógica del flow referenció una sesión que no existe.
    #[error("Sesión {session_id} no encontrada en el flow {flow_id}")]
    SessionNotFound { flow_id: FlowId, session_id: SessionId },
    /// Operación no permitida en el estado actual de la sesión.
    #[error("Error de sesión {session_id}: {reason}")]
    Session { session_id: SessionId, reason: String },
    /// Fallo del Fiber Runner (creación o ejecución).
    #[error("Error de fiber: {0}")]
    Fiber(#[from] FiberError),
    /// Error genérico de almacenamiento (store de checkpoints).
    #[error("Error de almacenamiento: {0}")]
    Storage(String),
    /// Configuración inválida o mal formada.
    #[error("Error de configuración: {0}")]
    Config(String),
    /// Errores de serialización/deserialización JSON.
    #[error("Error de serialización: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Otro tipo de error.
    #[error("Otro: {0}")]
    Other(String),
}

/// Errores reportados por la frontera del Fiber Runner.
///
/// `Transient` dispara la ruta de reintentos (`RETRYING`); `Fatal` mueve
/// el checkpoint a `FAILED` sin reintento.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FiberError {
    #[error("fallo transitorio: {0}")]
    Transient(String),
    #[error("fallo fatal: {0}")]
    Fatal(String),
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, FlowError>;
