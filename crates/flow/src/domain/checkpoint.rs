// Archivo: domain/checkpoint.rs
// Propósito: estado persistido de un flow (`Checkpoint`) y su marcador
// `WaitingFor`. Las transiciones de estado se validan aquí.
use super::event::StartFlow;
use super::ids::{FlowId, HoldingIdentity, SessionId};
use super::io::{FiberState, ResumePayload};
use super::session::SessionState;
use super::status::{CheckpointStatus, FlowFailure};
use crate::errors::{FlowError, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Qué clase de evento desbloquea un checkpoint suspendido.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitingFor {
    #[default]
    None,
    SessionMessage { session_id: SessionId },
    Wakeup { at: DateTime<Utc> },
}

/// Marco de la pila de sub-flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubFlowFrame {
    pub name: String,
    pub started_at: DateTime<Utc>,
}

/// Estado durable de un flow entre suspensiones.
///
/// Lo posee en exclusiva el pipeline: a lo sumo una invocación por
/// `flow_id` está en vuelo en cada momento.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub flow_id: FlowId,
    pub holding_identity: HoldingIdentity,
    pub package_id: String,
    pub request_id: String,
    pub start_args: JsonValue,
    pub status: CheckpointStatus,
    pub waiting_for: WaitingFor,
    pub sessions: IndexMap<SessionId, SessionState>,
    pub fiber_state: FiberState,
    /// Payload a reinyectar en la próxima ejecución (pausa o reintento).
    pub pending_resume: Option<ResumePayload>,
    pub flow_stack: Vec<SubFlowFrame>,
    pub retry_count: u32,
    pub last_error: Option<FlowFailure>,
    pub result: Option<JsonValue>,
    /// Marcado por `ScheduleCleanup`: el pipeline devuelve tombstone.
    pub marked_for_deletion: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Checkpoint nuevo en `CREATED` con el fiber sin arrancar.
    pub fn new(flow_id: FlowId, start: &StartFlow, now: DateTime<Utc>) -> Self {
        Self { flow_id,
               holding_identity: start.holding_identity.clone(),
               package_id: start.package_id.clone(),
               request_id: start.request_id.clone(),
               start_args: start.args.clone(),
               status: CheckpointStatus::Created,
               waiting_for: WaitingFor::None,
               sessions: IndexMap::new(),
               fiber_state: FiberState::NotStarted,
               pending_resume: None,
               flow_stack: Vec::new(),
               retry_count: 0,
               last_error: None,
               result: None,
               marked_for_deletion: false,
               created_at: now,
               last_updated_at: now }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Aplica una transición validándola contra la tabla de estados.
    /// Una transición al mismo estado es un no-op.
    pub fn transition_to(&mut self, next: CheckpointStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(FlowError::InvalidTransition { from: self.status,
                                                      to: next });
        }
        self.status = next;
        if next != CheckpointStatus::Suspended && next != CheckpointStatus::Retrying {
            self.waiting_for = WaitingFor::None;
        }
        Ok(())
    }

    /// Suspende el flow a la espera de `waiting_for`.
    pub fn suspend(&mut self, waiting_for: WaitingFor) -> Result<()> {
        self.transition_to(CheckpointStatus::Suspended)?;
        self.waiting_for = waiting_for;
        Ok(())
    }

    /// Mueve el checkpoint a `FAILED` registrando el fallo. Un checkpoint en
    /// `CREATED` pasa antes por `RUNNING`; uno terminal no cambia.
    pub fn fail(&mut self, failure: FlowFailure) {
        if self.is_terminal() {
            return;
        }
        if self.status == CheckpointStatus::Created {
            self.status = CheckpointStatus::Running;
        }
        self.status = CheckpointStatus::Failed;
        self.waiting_for = WaitingFor::None;
        self.pending_resume = None;
        self.last_error = Some(failure);
    }

    pub fn session(&self, session_id: &SessionId) -> Result<&SessionState> {
        self.sessions.get(session_id).ok_or_else(|| FlowError::SessionNotFound { flow_id: self.flow_id.clone(),
                                                                                 session_id: session_id.clone() })
    }

    pub fn session_mut(&mut self, session_id: &SessionId) -> Result<&mut SessionState> {
        let flow_id = self.flow_id.clone();
        self.sessions.get_mut(session_id).ok_or_else(|| FlowError::SessionNotFound { flow_id,
                                                                                     session_id: session_id.clone() })
    }
}
