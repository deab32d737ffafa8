// Archivo: domain/io.rs
// Propósito: protocolo explícito petición/respuesta con el Fiber Runner.
// El runner entrega un `IoRequest` en cada punto de suspensión y recibe un
// `ResumePayload` al reanudar.
use super::ids::{HoldingIdentity, SessionId};
use super::status::FlowFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Conjunto cerrado de peticiones que la lógica del flow puede emitir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IoRequest {
    InitiateSession { session_id: SessionId, counterparty: HoldingIdentity },
    SendMessage { session_id: SessionId, payload: JsonValue },
    ReceiveMessage { session_id: SessionId },
    CloseSession { session_id: SessionId },
    Sleep { until: DateTime<Utc> },
    ForceCheckpoint,
    SubFlowSpawn { name: String },
    SubFlowFinished,
    Complete { result: JsonValue },
    Fail { failure: FlowFailure },
}

impl IoRequest {
    /// Nombre corto para logs.
    pub fn name(&self) -> &'static str {
        match self {
            IoRequest::InitiateSession { .. } => "initiate_session",
            IoRequest::SendMessage { .. } => "send_message",
            IoRequest::ReceiveMessage { .. } => "receive_message",
            IoRequest::CloseSession { .. } => "close_session",
            IoRequest::Sleep { .. } => "sleep",
            IoRequest::ForceCheckpoint => "force_checkpoint",
            IoRequest::SubFlowSpawn { .. } => "sub_flow_spawn",
            IoRequest::SubFlowFinished => "sub_flow_finished",
            IoRequest::Complete { .. } => "complete",
            IoRequest::Fail { .. } => "fail",
        }
    }
}

/// Valor entregado al fiber al reanudarlo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResumePayload {
    /// Primer arranque del flow con sus argumentos.
    Start { args: JsonValue },
    /// Mensaje de datos entregado en orden.
    SessionMessage { session_id: SessionId, sequence_num: u64, payload: JsonValue },
    /// El par cerró la sesión y no quedan mensajes por entregar.
    SessionClosed { session_id: SessionId },
    SessionError { session_id: SessionId, message: String },
    /// Temporizador vencido.
    Wakeup,
    /// Continuación tras una petición que no suspende.
    Continue,
}

/// Continuación opaca propiedad del runner; el plano de control nunca
/// inspecciona su contenido.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "bytes", rename_all = "snake_case")]
pub enum FiberState {
    #[default]
    NotStarted,
    Suspended(Vec<u8>),
}

impl FiberState {
    pub fn is_started(&self) -> bool {
        !matches!(self, FiberState::NotStarted)
    }
}

/// Resultado de una llamada `run_until_suspend` exitosa.
#[derive(Debug, Clone, PartialEq)]
pub struct FiberSuspension {
    pub request: IoRequest,
    pub fiber_state: FiberState,
}
