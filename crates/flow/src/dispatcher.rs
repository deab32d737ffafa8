// Archivo: dispatcher.rs
// Propósito: conducir el Fiber Runner desde el punto de suspensión actual
// hasta la siguiente suspensión, traduciendo cada `IoRequest` en cambios de
// checkpoint/sesión y registros salientes.
use crate::config::PipelineContext;
use crate::domain::{Checkpoint, CheckpointStatus, FlowFailure, IoRequest, OutboundRecord, PipelineStats, ResumePayload,
                    SessionDirection, SessionId, SessionPayload, SessionState, SubFlowFrame, WaitingFor};
use crate::errors::{FiberError, FlowError, Result};
use crate::fiber::{FiberSource, SharedFiber};
use crate::session::{stamp_outbound, take_next_delivery};
use std::sync::Arc;

/// Qué hacer tras interpretar una petición.
enum Step {
    /// Reentrar al runner con este payload.
    Continue(ResumePayload),
    /// El loop termina (suspensión, pausa o estado terminal).
    Stop,
}

pub struct RequestDispatcher {
    fibers: Arc<dyn FiberSource>,
}

impl RequestDispatcher {
    pub fn new(fibers: Arc<dyn FiberSource>) -> Self {
        Self { fibers }
    }

    /// Reanuda el flow y ejecuta el loop hasta una nueva suspensión o un
    /// estado terminal. Los fallos del runner se convierten en reintento o
    /// `FAILED`; sólo los defectos (sesión inexistente, transición
    /// inválida) se devuelven como `Err`.
    pub fn dispatch(&self,
                    checkpoint: &mut Checkpoint,
                    ctx: &PipelineContext,
                    outbound: &mut Vec<OutboundRecord>,
                    stats: &mut PipelineStats)
                    -> Result<()> {
        let resume = Self::initial_resume(checkpoint)?;
        checkpoint.transition_to(CheckpointStatus::Running)?;

        let fiber = match self.fibers.acquire(checkpoint) {
            Ok(fiber) => fiber,
            Err(err) => return Self::on_fiber_error(checkpoint, err, resume, ctx, outbound),
        };
        let outcome = Self::run_loop(checkpoint, &fiber, resume, ctx, outbound, stats);
        let keep = matches!(outcome, Ok(true)) && !checkpoint.is_terminal();
        self.fibers.finish(&checkpoint.flow_id, fiber, keep);
        outcome.map(|_| ())
    }

    /// Devuelve `true` si el fiber sigue siendo válido para reutilizarse.
    fn run_loop(checkpoint: &mut Checkpoint,
                fiber: &SharedFiber,
                mut resume: ResumePayload,
                ctx: &PipelineContext,
                outbound: &mut Vec<OutboundRecord>,
                stats: &mut PipelineStats)
                -> Result<bool> {
        loop {
            if stats.fiber_iterations >= ctx.config.max_loop_iterations {
                log::debug!("loop_iteration_cap flow_id={} iterations={}", checkpoint.flow_id, stats.fiber_iterations);
                Self::pause(checkpoint, resume, ctx, outbound)?;
                return Ok(true);
            }
            stats.fiber_iterations += 1;

            let step = {
                let mut guard = fiber.lock().unwrap_or_else(|e| e.into_inner());
                guard.run_until_suspend(&checkpoint.fiber_state, resume.clone())
            };
            let suspension = match step {
                Ok(suspension) => suspension,
                Err(err) => {
                    Self::on_fiber_error(checkpoint, err, resume, ctx, outbound)?;
                    return Ok(false);
                }
            };
            if let IoRequest::Fail { failure } = &suspension.request {
                if failure.is_retryable() {
                    Self::retry_or_fail(checkpoint, failure.clone(), resume, ctx, outbound)?;
                    return Ok(false);
                }
            }

            log::debug!("fiber_suspended flow_id={} request={}", checkpoint.flow_id, suspension.request.name());
            checkpoint.fiber_state = suspension.fiber_state;
            checkpoint.retry_count = 0;
            match Self::handle_request(checkpoint, suspension.request, ctx, outbound)? {
                Step::Continue(next) => resume = next,
                Step::Stop => return Ok(true),
            }
        }
    }

    /// Payload con el que se reanuda el fiber según lo que esperaba.
    fn initial_resume(checkpoint: &mut Checkpoint) -> Result<ResumePayload> {
        if let Some(pending) = checkpoint.pending_resume.take() {
            return Ok(pending);
        }
        match checkpoint.waiting_for.clone() {
            WaitingFor::None if checkpoint.fiber_state.is_started() => Ok(ResumePayload::Continue),
            WaitingFor::None => Ok(ResumePayload::Start { args: checkpoint.start_args.clone() }),
            WaitingFor::SessionMessage { session_id } => {
                let session = checkpoint.session_mut(&session_id)?;
                take_next_delivery(session).ok_or_else(|| FlowError::Session { session_id,
                                                                               reason: "sin mensaje entregable".into() })
            }
            WaitingFor::Wakeup { .. } => Ok(ResumePayload::Wakeup),
        }
    }

    fn handle_request(checkpoint: &mut Checkpoint,
                      request: IoRequest,
                      ctx: &PipelineContext,
                      outbound: &mut Vec<OutboundRecord>)
                      -> Result<Step> {
        match request {
            IoRequest::InitiateSession { session_id, counterparty } => {
                if checkpoint.sessions.contains_key(&session_id) {
                    return Err(FlowError::Session { session_id,
                                                    reason: "la sesión ya existe".into() });
                }
                let mut session = SessionState::new(session_id.clone(), counterparty, SessionDirection::Outbound);
                let init = SessionPayload::Init { counterparty: checkpoint.holding_identity.clone() };
                let event = stamp_outbound(&mut session, init, ctx.now)?;
                outbound.push(OutboundRecord::Peer { source: checkpoint.holding_identity.clone(),
                                                     counterparty: session.counterparty.clone(),
                                                     event });
                checkpoint.sessions.insert(session_id, session);
                Ok(Step::Continue(ResumePayload::Continue))
            }
            IoRequest::SendMessage { session_id, payload } => {
                Self::send(checkpoint, &session_id, SessionPayload::Data { payload }, ctx, outbound)?;
                Ok(Step::Continue(ResumePayload::Continue))
            }
            IoRequest::CloseSession { session_id } => {
                Self::send(checkpoint, &session_id, SessionPayload::Close, ctx, outbound)?;
                Ok(Step::Continue(ResumePayload::Continue))
            }
            // Una sesión aún desconocida se espera igual: la creará el
            // `Init` del par.
            IoRequest::ReceiveMessage { session_id } => {
                let delivery = checkpoint.sessions.get_mut(&session_id).and_then(take_next_delivery);
                match delivery {
                    Some(delivery) => Ok(Step::Continue(delivery)),
                    None => {
                        checkpoint.suspend(WaitingFor::SessionMessage { session_id })?;
                        Ok(Step::Stop)
                    }
                }
            }
            IoRequest::Sleep { until } => {
                checkpoint.suspend(WaitingFor::Wakeup { at: until })?;
                outbound.push(OutboundRecord::Wakeup { flow_id: checkpoint.flow_id.clone(),
                                                       due_at: until });
                Ok(Step::Stop)
            }
            IoRequest::ForceCheckpoint => {
                Self::pause(checkpoint, ResumePayload::Continue, ctx, outbound)?;
                Ok(Step::Stop)
            }
            IoRequest::SubFlowSpawn { name } => {
                checkpoint.flow_stack.push(SubFlowFrame { name,
                                                          started_at: ctx.now });
                Ok(Step::Continue(ResumePayload::Continue))
            }
            IoRequest::SubFlowFinished => {
                if checkpoint.flow_stack.pop().is_none() {
                    log::warn!("sub_flow_stack_underflow flow_id={}", checkpoint.flow_id);
                }
                Ok(Step::Continue(ResumePayload::Continue))
            }
            IoRequest::Complete { result } => {
                checkpoint.transition_to(CheckpointStatus::Completed)?;
                checkpoint.result = Some(result);
                checkpoint.pending_resume = None;
                Ok(Step::Stop)
            }
            IoRequest::Fail { failure } => {
                log::error!("flow_failed flow_id={} kind={:?} message={}", checkpoint.flow_id, failure.kind, failure.message);
                checkpoint.fail(failure);
                Ok(Step::Stop)
            }
        }
    }

    fn send(checkpoint: &mut Checkpoint,
            session_id: &SessionId,
            payload: SessionPayload,
            ctx: &PipelineContext,
            outbound: &mut Vec<OutboundRecord>)
            -> Result<()> {
        let source = checkpoint.holding_identity.clone();
        let session = checkpoint.session_mut(session_id)?;
        let event = stamp_outbound(session, payload, ctx.now)?;
        outbound.push(OutboundRecord::Peer { source,
                                             counterparty: session.counterparty.clone(),
                                             event });
        Ok(())
    }

    /// Pausa sin suspensión lógica: guarda el payload pendiente y se
    /// auto-envía un `Wakeup` inmediato para que el checkpoint se confirme.
    fn pause(checkpoint: &mut Checkpoint,
             resume: ResumePayload,
             ctx: &PipelineContext,
             outbound: &mut Vec<OutboundRecord>)
             -> Result<()> {
        checkpoint.suspend(WaitingFor::Wakeup { at: ctx.now })?;
        checkpoint.pending_resume = Some(resume);
        outbound.push(OutboundRecord::Wakeup { flow_id: checkpoint.flow_id.clone(),
                                               due_at: ctx.now });
        Ok(())
    }

    fn on_fiber_error(checkpoint: &mut Checkpoint,
                      err: FiberError,
                      resume: ResumePayload,
                      ctx: &PipelineContext,
                      outbound: &mut Vec<OutboundRecord>)
                      -> Result<()> {
        match err {
            FiberError::Transient(message) => {
                Self::retry_or_fail(checkpoint, FlowFailure::transient(message), resume, ctx, outbound)
            }
            FiberError::Fatal(message) => {
                log::error!("fiber_fatal flow_id={} message={}", checkpoint.flow_id, message);
                checkpoint.fail(FlowFailure::fatal(message));
                Ok(())
            }
        }
    }

    /// Fallo transitorio: incrementa `retry_count` y registra el `Wakeup`
    /// diferido del intento. El fallo que alcanza `max_retries` escala a
    /// `FAILED` en el mismo paso; su `Wakeup` llega a un flow terminal y se
    /// absorbe.
    fn retry_or_fail(checkpoint: &mut Checkpoint,
                     failure: FlowFailure,
                     resume: ResumePayload,
                     ctx: &PipelineContext,
                     outbound: &mut Vec<OutboundRecord>)
                     -> Result<()> {
        checkpoint.retry_count += 1;
        let due_at = ctx.now + ctx.config.retry_backoff(checkpoint.retry_count);
        outbound.push(OutboundRecord::Wakeup { flow_id: checkpoint.flow_id.clone(),
                                               due_at });
        if checkpoint.retry_count >= ctx.config.max_retries {
            log::error!("retries_exhausted flow_id={} retries={} message={}",
                        checkpoint.flow_id, checkpoint.retry_count, failure.message);
            let message = format!("reintentos agotados ({}): {}", checkpoint.retry_count, failure.message);
            checkpoint.fail(FlowFailure::fatal(message));
            return Ok(());
        }
        log::warn!("flow_retry flow_id={} attempt={} due_at={} message={}",
                   checkpoint.flow_id, checkpoint.retry_count, due_at, failure.message);
        checkpoint.transition_to(CheckpointStatus::Retrying)?;
        checkpoint.waiting_for = WaitingFor::Wakeup { at: due_at };
        checkpoint.pending_resume = Some(resume);
        checkpoint.last_error = Some(failure);
        Ok(())
    }
}
