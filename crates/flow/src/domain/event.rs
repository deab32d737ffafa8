// Archivo: domain/event.rs
// Propósito: sobre `FlowEvent` entregado por el log particionado.
use super::ids::{FlowId, HoldingIdentity};
use super::session::SessionEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Petición de arranque de un flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartFlow {
    pub holding_identity: HoldingIdentity,
    /// Identifica el código a ejecutar.
    pub package_id: String,
    pub request_id: String,
    pub args: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEventPayload {
    StartFlow(StartFlow),
    SessionEvent(SessionEvent),
    Wakeup,
    ScheduleCleanup,
    KillFlow { reason: String },
}

/// Discriminante del payload; clave del registro de handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    StartFlow,
    SessionEvent,
    Wakeup,
    ScheduleCleanup,
    KillFlow,
}

impl FlowEventPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            FlowEventPayload::StartFlow(_) => PayloadKind::StartFlow,
            FlowEventPayload::SessionEvent(_) => PayloadKind::SessionEvent,
            FlowEventPayload::Wakeup => PayloadKind::Wakeup,
            FlowEventPayload::ScheduleCleanup => PayloadKind::ScheduleCleanup,
            FlowEventPayload::KillFlow { .. } => PayloadKind::KillFlow,
        }
    }
}

/// Sobre `{flow_id, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    pub flow_id: FlowId,
    pub payload: FlowEventPayload,
}

impl FlowEvent {
    pub fn new(flow_id: FlowId, payload: FlowEventPayload) -> Self {
        Self { flow_id, payload }
    }

    pub fn start(flow_id: FlowId, start: StartFlow) -> Self {
        Self::new(flow_id, FlowEventPayload::StartFlow(start))
    }

    pub fn session(flow_id: FlowId, event: SessionEvent) -> Self {
        Self::new(flow_id, FlowEventPayload::SessionEvent(event))
    }

    pub fn wakeup(flow_id: FlowId) -> Self {
        Self::new(flow_id, FlowEventPayload::Wakeup)
    }

    pub fn cleanup(flow_id: FlowId) -> Self {
        Self::new(flow_id, FlowEventPayload::ScheduleCleanup)
    }

    pub fn kill(flow_id: FlowId, reason: impl Into<String>) -> Self {
        Self::new(flow_id, FlowEventPayload::KillFlow { reason: reason.into() })
    }
}
