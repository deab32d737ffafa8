// Archivo: post_processor.rs
// Propósito: pasada final del pipeline. Proyecta el estado observable,
// emite acks explícitos, aplica los efectos de terminación y decide el
// tombstone.
use crate::config::PipelineContext;
use crate::domain::{Checkpoint, CheckpointStatus, FlowFailure, FlowId, FlowStatus, FlowStatusKind, OutboundRecord,
                    PipelineResult, PipelineStats, SessionPayload};
use crate::fiber::FiberSource;
use crate::session::stamp_outbound;
use std::sync::Arc;

pub struct PostProcessor {
    fibers: Arc<dyn FiberSource>,
}

impl PostProcessor {
    pub fn new(fibers: Arc<dyn FiberSource>) -> Self {
        Self { fibers }
    }

    /// Cierra la invocación.
    ///
    /// `previous_status` es el estado del checkpoint antes del evento
    /// (`None` si no existía) y permite detectar cambios observables y la
    /// entrada en un estado terminal.
    pub fn finalize(&self,
                    previous_status: Option<CheckpointStatus>,
                    mut checkpoint: Checkpoint,
                    mut outbound: Vec<OutboundRecord>,
                    ctx: &PipelineContext,
                    stats: PipelineStats)
                    -> PipelineResult {
        if checkpoint.marked_for_deletion {
            log::info!("flow_tombstoned flow_id={} status={:?}", checkpoint.flow_id, checkpoint.status);
            self.fibers.discard(&checkpoint.flow_id);
            return PipelineResult { updated_checkpoint: None,
                                    outbound_records: outbound,
                                    stats };
        }

        let entered_terminal = checkpoint.is_terminal() && !previous_status.map(|s| s.is_terminal()).unwrap_or(false);
        if entered_terminal {
            self.on_terminal(&mut checkpoint, &mut outbound, ctx);
        }

        Self::flush_acks(&mut checkpoint, &mut outbound, ctx);

        let before = previous_status.and_then(CheckpointStatus::observable);
        if let Some(kind) = checkpoint.status.observable() {
            if before != Some(kind) {
                outbound.push(OutboundRecord::Status(Self::status_record(&checkpoint, kind, ctx)));
            }
        }

        checkpoint.last_updated_at = ctx.now;
        PipelineResult { updated_checkpoint: Some(checkpoint),
                         outbound_records: outbound,
                         stats }
    }

    /// Resultado para un evento que no es `StartFlow` sobre un flow sin
    /// checkpoint: `FAILED` sin identidad y sin estado que guardar.
    pub fn missing_checkpoint(&self, flow_id: &FlowId, failure: FlowFailure, ctx: &PipelineContext) -> PipelineResult {
        log::error!("missing_checkpoint flow_id={} message={}", flow_id, failure.message);
        self.fibers.discard(flow_id);
        let status = FlowStatus { flow_id: flow_id.clone(),
                                  holding_identity: None,
                                  status: FlowStatusKind::Failed,
                                  error: Some(failure),
                                  result: None,
                                  timestamp: ctx.now };
        PipelineResult { updated_checkpoint: None,
                         outbound_records: vec![OutboundRecord::Status(status)],
                         stats: PipelineStats::default() }
    }

    fn on_terminal(&self, checkpoint: &mut Checkpoint, outbound: &mut Vec<OutboundRecord>, ctx: &PipelineContext) {
        log::info!("flow_terminal flow_id={} status={:?}", checkpoint.flow_id, checkpoint.status);
        let reason = match &checkpoint.last_error {
            Some(failure) => format!("flow terminado: {}", failure.message),
            None => "flow terminado".to_string(),
        };
        let source = checkpoint.holding_identity.clone();
        for session in checkpoint.sessions.values_mut().filter(|s| s.status.can_send() && !s.awaiting_init) {
            match stamp_outbound(session, SessionPayload::Error { message: reason.clone() }, ctx.now) {
                Ok(event) => outbound.push(OutboundRecord::Peer { source: source.clone(),
                                                                  counterparty: session.counterparty.clone(),
                                                                  event }),
                Err(err) => log::warn!("session_error_not_sent flow_id={} session_id={} error={}",
                                       checkpoint.flow_id, session.session_id, err),
            }
        }
        outbound.push(OutboundRecord::ScheduleCleanup { flow_id: checkpoint.flow_id.clone(),
                                                        due_at: ctx.now + ctx.config.cleanup_retention() });
        self.fibers.discard(&checkpoint.flow_id);
    }

    /// Ack explícito para las sesiones que recibieron algo y no lo
    /// reconocieron a cuestas de un envío.
    fn flush_acks(checkpoint: &mut Checkpoint, outbound: &mut Vec<OutboundRecord>, ctx: &PipelineContext) {
        let source = checkpoint.holding_identity.clone();
        for session in checkpoint.sessions.values_mut().filter(|s| s.ack_pending && !s.awaiting_init) {
            match stamp_outbound(session, SessionPayload::Ack, ctx.now) {
                Ok(event) => outbound.push(OutboundRecord::Peer { source: source.clone(),
                                                                  counterparty: session.counterparty.clone(),
                                                                  event }),
                Err(err) => log::warn!("ack_not_sent flow_id={} session_id={} error={}",
                                       checkpoint.flow_id, session.session_id, err),
            }
        }
    }

    fn status_record(checkpoint: &Checkpoint, kind: FlowStatusKind, ctx: &PipelineContext) -> FlowStatus {
        let error = match kind {
            FlowStatusKind::Failed | FlowStatusKind::Killed | FlowStatusKind::Retrying => checkpoint.last_error.clone(),
            _ => None,
        };
        FlowStatus { flow_id: checkpoint.flow_id.clone(),
                     holding_identity: Some(checkpoint.holding_identity.clone()),
                     status: kind,
                     error,
                     result: checkpoint.result.clone(),
                     timestamp: ctx.now }
    }
}
