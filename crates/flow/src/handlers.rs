// Archivo: handlers.rs
// Propósito: un handler por variante de `FlowEventPayload`, seleccionado por
// un registro estático. Los handlers sólo preparan el checkpoint y las
// sesiones; nunca llaman al Fiber Runner.
use crate::config::PipelineContext;
use crate::domain::{Checkpoint, CheckpointStatus, FailureKind, FlowEvent, FlowEventPayload, FlowFailure, PayloadKind,
                    SessionDirection, SessionId, SessionPayload, SessionState, SessionStatus, StartFlow, WaitingFor};
use crate::errors::{FlowError, Result};
use crate::session::{apply_session_event, SequenceOutcome};

/// Qué ocurrió al aplicar el evento; lo consume el resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedEvent {
    Started,
    SessionAdvanced { session_id: SessionId },
    SessionBuffered { session_id: SessionId },
    SessionDuplicate { session_id: SessionId },
    SessionErrored { session_id: SessionId },
    SessionAcknowledged { session_id: SessionId },
    WakeupArrived,
    CleanupRequested,
    Killed,
    /// Evento absorbido sin efecto (duplicado, violación de protocolo,
    /// flow terminal).
    Ignored,
}

#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub checkpoint: Checkpoint,
    pub applied: AppliedEvent,
}

impl HandlerOutcome {
    fn new(checkpoint: Checkpoint, applied: AppliedEvent) -> Self {
        Self { checkpoint, applied }
    }
}

pub trait FlowEventHandler: Send + Sync {
    fn apply(&self, checkpoint: Option<Checkpoint>, event: &FlowEvent, ctx: &PipelineContext) -> Result<HandlerOutcome>;
}

fn require_checkpoint(checkpoint: Option<Checkpoint>, event: &FlowEvent) -> Result<Checkpoint> {
    checkpoint.ok_or_else(|| FlowError::MissingCheckpoint(event.flow_id.clone()))
}

fn unexpected_payload(event: &FlowEvent) -> FlowError {
    FlowError::Other(format!("payload {:?} entregado al handler equivocado", event.payload.kind()))
}

/// Crea el checkpoint en `CREATED` con el fiber sin arrancar. Un
/// `StartFlow` repetido se absorbe.
pub struct StartFlowHandler;

impl StartFlowHandler {
    fn start<'a>(event: &'a FlowEvent) -> Result<&'a StartFlow> {
        match &event.payload {
            FlowEventPayload::StartFlow(start) => Ok(start),
            _ => Err(unexpected_payload(event)),
        }
    }
}

impl FlowEventHandler for StartFlowHandler {
    fn apply(&self, checkpoint: Option<Checkpoint>, event: &FlowEvent, ctx: &PipelineContext) -> Result<HandlerOutcome> {
        let start = Self::start(event)?;
        match checkpoint {
            Some(existing) => {
                log::warn!("duplicate_start flow_id={} request_id={} status={:?}",
                           event.flow_id, start.request_id, existing.status);
                Ok(HandlerOutcome::new(existing, AppliedEvent::Ignored))
            }
            None => {
                let checkpoint = Checkpoint::new(event.flow_id.clone(), start, ctx.now);
                Ok(HandlerOutcome::new(checkpoint, AppliedEvent::Started))
            }
        }
    }
}

/// Enruta el evento al protocolo de sesión. No decide el desbloqueo.
pub struct SessionEventHandler;

impl FlowEventHandler for SessionEventHandler {
    fn apply(&self, checkpoint: Option<Checkpoint>, event: &FlowEvent, ctx: &PipelineContext) -> Result<HandlerOutcome> {
        let session_event = match &event.payload {
            FlowEventPayload::SessionEvent(e) => e,
            _ => return Err(unexpected_payload(event)),
        };
        let mut checkpoint = require_checkpoint(checkpoint, event)?;
        let session_id = session_event.session_id.clone();

        if checkpoint.is_terminal() {
            log::debug!("session_event_after_termination flow_id={} session_id={}", event.flow_id, session_id);
            return Ok(HandlerOutcome::new(checkpoint, AppliedEvent::Ignored));
        }

        let awaiting_init = checkpoint.sessions.get(&session_id).map(|s| s.awaiting_init);
        match (awaiting_init, &session_event.payload) {
            (Some(true), SessionPayload::Init { counterparty }) => {
                checkpoint.session_mut(&session_id)?.accept_init(counterparty.clone());
            }
            (Some(_), _) => {}
            (None, SessionPayload::Init { counterparty }) => {
                let mut session = SessionState::new(session_id.clone(), counterparty.clone(), SessionDirection::Inbound);
                session.status = SessionStatus::Confirmed;
                checkpoint.sessions.insert(session_id.clone(), session);
            }
            // el transporte puede adelantar datos al `Init`: se guardan en el
            // buffer fuera de orden hasta que llegue
            (None, SessionPayload::Data { .. } | SessionPayload::Close) if session_event.sequence_num.is_some() => {
                log::debug!("session_opened_before_init flow_id={} session_id={} seq={:?}",
                            event.flow_id, session_id, session_event.sequence_num);
                checkpoint.sessions.insert(session_id.clone(), SessionState::pending_init(session_id.clone()));
            }
            (None, other) => {
                log::warn!("session_protocol_violation flow_id={} session_id={} reason=unknown_session payload={:?}",
                           event.flow_id, session_id, other);
                return Ok(HandlerOutcome::new(checkpoint, AppliedEvent::Ignored));
            }
        }

        let session = checkpoint.session_mut(&session_id)?;
        let outcome = apply_session_event(session, session_event, ctx.config.session_replay_window);
        let applied = match outcome {
            SequenceOutcome::Advanced { .. } => AppliedEvent::SessionAdvanced { session_id },
            SequenceOutcome::Buffered => AppliedEvent::SessionBuffered { session_id },
            SequenceOutcome::Duplicate => AppliedEvent::SessionDuplicate { session_id },
            SequenceOutcome::Unsequenced => match session_event.payload {
                SessionPayload::Error { .. } => AppliedEvent::SessionErrored { session_id },
                _ => AppliedEvent::SessionAcknowledged { session_id },
            },
        };
        Ok(HandlerOutcome::new(checkpoint, applied))
    }
}

/// Sólo marca que llegó un temporizador; el resolver decide.
pub struct WakeupHandler;

impl FlowEventHandler for WakeupHandler {
    fn apply(&self, checkpoint: Option<Checkpoint>, event: &FlowEvent, _ctx: &PipelineContext) -> Result<HandlerOutcome> {
        let checkpoint = require_checkpoint(checkpoint, event)?;
        let applied = if checkpoint.is_terminal() { AppliedEvent::Ignored } else { AppliedEvent::WakeupArrived };
        Ok(HandlerOutcome::new(checkpoint, applied))
    }
}

/// Válido sólo sobre checkpoints terminales: los marca para borrado.
pub struct ScheduleCleanupHandler;

impl FlowEventHandler for ScheduleCleanupHandler {
    fn apply(&self, checkpoint: Option<Checkpoint>, event: &FlowEvent, _ctx: &PipelineContext) -> Result<HandlerOutcome> {
        let mut checkpoint = require_checkpoint(checkpoint, event)?;
        if !checkpoint.is_terminal() {
            log::warn!("cleanup_rejected flow_id={} status={:?}", event.flow_id, checkpoint.status);
            return Ok(HandlerOutcome::new(checkpoint, AppliedEvent::Ignored));
        }
        checkpoint.marked_for_deletion = true;
        Ok(HandlerOutcome::new(checkpoint, AppliedEvent::CleanupRequested))
    }
}

/// Mueve un checkpoint no terminal a `KILLED`.
pub struct KillFlowHandler;

impl FlowEventHandler for KillFlowHandler {
    fn apply(&self, checkpoint: Option<Checkpoint>, event: &FlowEvent, _ctx: &PipelineContext) -> Result<HandlerOutcome> {
        let reason = match &event.payload {
            FlowEventPayload::KillFlow { reason } => reason.clone(),
            _ => return Err(unexpected_payload(event)),
        };
        let mut checkpoint = require_checkpoint(checkpoint, event)?;
        if checkpoint.is_terminal() {
            return Ok(HandlerOutcome::new(checkpoint, AppliedEvent::Ignored));
        }
        checkpoint.transition_to(CheckpointStatus::Killed)?;
        checkpoint.waiting_for = WaitingFor::None;
        checkpoint.pending_resume = None;
        checkpoint.last_error = Some(FlowFailure::new(FailureKind::Killed, reason));
        Ok(HandlerOutcome::new(checkpoint, AppliedEvent::Killed))
    }
}

/// Registro estático variante → handler, resuelto por `match` exhaustivo.
pub struct HandlerRegistry {
    start: StartFlowHandler,
    session: SessionEventHandler,
    wakeup: WakeupHandler,
    cleanup: ScheduleCleanupHandler,
    kill: KillFlowHandler,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self { start: StartFlowHandler,
               session: SessionEventHandler,
               wakeup: WakeupHandler,
               cleanup: ScheduleCleanupHandler,
               kill: KillFlowHandler }
    }

    pub fn handler_for(&self, kind: PayloadKind) -> &dyn FlowEventHandler {
        match kind {
            PayloadKind::StartFlow => &self.start,
            PayloadKind::SessionEvent => &self.session,
            PayloadKind::Wakeup => &self.wakeup,
            PayloadKind::ScheduleCleanup => &self.cleanup,
            PayloadKind::KillFlow => &self.kill,
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
