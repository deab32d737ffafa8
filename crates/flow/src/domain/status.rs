// Archivo: domain/status.rs
// Propósito: máquina de estados del checkpoint, fallos tipados y el
// registro `FlowStatus` que ven los observadores externos.
use super::ids::{FlowId, HoldingIdentity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Estado del checkpoint de un flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    Created,
    Running,
    Suspended,
    Retrying,
    Completed,
    Failed,
    Killed,
}

impl CheckpointStatus {
    pub const ALL: [CheckpointStatus; 7] = [CheckpointStatus::Created,
                                            CheckpointStatus::Running,
                                            CheckpointStatus::Suspended,
                                            CheckpointStatus::Retrying,
                                            CheckpointStatus::Completed,
                                            CheckpointStatus::Failed,
                                            CheckpointStatus::Killed];

    /// Los estados terminales son finales.
    pub fn is_terminal(self) -> bool {
        matches!(self, CheckpointStatus::Completed | CheckpointStatus::Failed | CheckpointStatus::Killed)
    }

    /// Tabla de transiciones permitidas:
    /// `CREATED→RUNNING`, `RUNNING↔SUSPENDED`, `RUNNING→RETRYING→RUNNING`,
    /// `RUNNING|SUSPENDED|RETRYING→{COMPLETED,FAILED,KILLED}`.
    pub fn can_transition_to(self, next: CheckpointStatus) -> bool {
        use CheckpointStatus::*;
        match (self, next) {
            (Created, Running) => true,
            (Running, Suspended) | (Suspended, Running) => true,
            (Running, Retrying) | (Retrying, Running) => true,
            (Running | Suspended | Retrying, Completed | Failed | Killed) => true,
            _ => false,
        }
    }

    /// Proyección observable: `CREATED` no se publica y `SUSPENDED` se ve
    /// como `RUNNING` desde fuera.
    pub fn observable(self) -> Option<FlowStatusKind> {
        match self {
            CheckpointStatus::Created => None,
            CheckpointStatus::Running | CheckpointStatus::Suspended => Some(FlowStatusKind::Running),
            CheckpointStatus::Retrying => Some(FlowStatusKind::Retrying),
            CheckpointStatus::Completed => Some(FlowStatusKind::Completed),
            CheckpointStatus::Failed => Some(FlowStatusKind::Failed),
            CheckpointStatus::Killed => Some(FlowStatusKind::Killed),
        }
    }
}

/// Clasificación de fallos usada en checkpoints y registros de estado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Fallo de infraestructura reintentable.
    Transient,
    /// Error de plataforma reportado por la lógica del flow.
    Platform,
    /// Regla de negocio violada, señalada explícitamente por el flow.
    Business,
    /// Detectado por el plano de control (estado corrupto, defecto).
    Fatal,
    /// Terminado por una petición `KillFlow`.
    Killed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FlowFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind,
               message: message.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Fatal, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn business(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Business, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

/// Estado publicado hacia el sink de estado/métricas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatusKind {
    Running,
    Retrying,
    Completed,
    Failed,
    Killed,
}

/// Registro `FlowStatus`: único canal por el que los observadores ven el
/// progreso de un flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStatus {
    pub flow_id: FlowId,
    /// `None` cuando el flow nunca tuvo checkpoint (evento huérfano).
    pub holding_identity: Option<HoldingIdentity>,
    pub status: FlowStatusKind,
    pub error: Option<FlowFailure>,
    pub result: Option<JsonValue>,
    pub timestamp: DateTime<Utc>,
}
