// Archivo: pipeline.rs
// Propósito: orquestar las etapas para un único evento.
//
// `process` es puro respecto a sus entradas: el reloj y la configuración
// llegan en `PipelineContext`, el único colaborador externo es la fuente de
// fibers. Nunca devuelve error; los fallos se representan como un
// checkpoint `FAILED` y un registro `FlowStatus`.
use crate::config::PipelineContext;
use crate::dispatcher::RequestDispatcher;
use crate::domain::{Checkpoint, FlowEvent, FlowEventPayload, FlowFailure, FlowId, OutboundRecord, PayloadKind, PipelineResult, PipelineStats};
use crate::errors::{FlowError, Result};
use crate::fiber::FiberSource;
use crate::handlers::HandlerRegistry;
use crate::post_processor::PostProcessor;
use crate::waiting_for::WaitingForResolver;
use std::sync::Arc;

pub struct FlowPipeline {
    handlers: HandlerRegistry,
    resolver: WaitingForResolver,
    dispatcher: RequestDispatcher,
    post_processor: PostProcessor,
}

/// Estado intermedio tras aplicar handler, resolver y dispatcher.
struct Processed {
    checkpoint: Checkpoint,
    outbound: Vec<OutboundRecord>,
    stats: PipelineStats,
}

impl FlowPipeline {
    pub fn new(fibers: Arc<dyn FiberSource>) -> Self {
        Self { handlers: HandlerRegistry::new(),
               resolver: WaitingForResolver::new(),
               dispatcher: RequestDispatcher::new(fibers.clone()),
               post_processor: PostProcessor::new(fibers) }
    }

    /// Procesa `event` sobre el último checkpoint confirmado del flow.
    pub fn process(&self, checkpoint: Option<Checkpoint>, event: &FlowEvent, ctx: &PipelineContext) -> PipelineResult {
        let previous_status = checkpoint.as_ref().map(|c| c.status);
        let snapshot = checkpoint.clone();

        match self.run_stages(checkpoint, event, ctx) {
            Ok(Some(processed)) => {
                log::debug!("event_processed flow_id={} kind={:?} iterations={} status={:?}",
                            event.flow_id,
                            event.payload.kind(),
                            processed.stats.fiber_iterations,
                            processed.checkpoint.status);
                self.post_processor
                    .finalize(previous_status, processed.checkpoint, processed.outbound, ctx, processed.stats)
            }
            Ok(None) => PipelineResult { updated_checkpoint: None,
                                         outbound_records: Vec::new(),
                                         stats: PipelineStats::default() },
            Err(err) => {
                log::error!("pipeline_failed flow_id={} kind={:?} error={}", event.flow_id, event.payload.kind(), err);
                self.fail_event(snapshot, event, FlowFailure::fatal(err.to_string()), ctx)
            }
        }
    }

    /// Como `fail_flow`, pero un `StartFlow` sin checkpoint previo conserva
    /// el checkpoint recién creado en `FAILED`.
    pub fn fail_event(&self,
                      checkpoint: Option<Checkpoint>,
                      event: &FlowEvent,
                      failure: FlowFailure,
                      ctx: &PipelineContext)
                      -> PipelineResult {
        let base = checkpoint.or_else(|| match &event.payload {
                                 FlowEventPayload::StartFlow(start) => {
                                     Some(Checkpoint::new(event.flow_id.clone(), start, ctx.now))
                                 }
                                 _ => None,
                             });
        self.fail_flow(base, &event.flow_id, failure, ctx)
    }

    /// Mueve el flow a `FAILED` partiendo del último checkpoint confirmado;
    /// los registros parciales de la invocación fallida se descartan. Sin
    /// checkpoint produce un `FlowStatus(FAILED)` sin estado que guardar.
    pub fn fail_flow(&self,
                     checkpoint: Option<Checkpoint>,
                     flow_id: &FlowId,
                     failure: FlowFailure,
                     ctx: &PipelineContext)
                     -> PipelineResult {
        match checkpoint {
            Some(mut checkpoint) => {
                let previous_status = Some(checkpoint.status);
                checkpoint.fail(failure);
                self.post_processor
                    .finalize(previous_status, checkpoint, Vec::new(), ctx, PipelineStats::default())
            }
            None => self.post_processor.missing_checkpoint(flow_id, failure, ctx),
        }
    }

    fn run_stages(&self, checkpoint: Option<Checkpoint>, event: &FlowEvent, ctx: &PipelineContext) -> Result<Option<Processed>> {
        let kind = event.payload.kind();
        if checkpoint.is_none() {
            match kind {
                PayloadKind::StartFlow => {}
                PayloadKind::ScheduleCleanup => {
                    log::debug!("cleanup_without_checkpoint flow_id={}", event.flow_id);
                    return Ok(None);
                }
                _ => return Err(FlowError::MissingCheckpoint(event.flow_id.clone())),
            }
        }

        let outcome = self.handlers.handler_for(kind).apply(checkpoint, event, ctx)?;
        let mut checkpoint = outcome.checkpoint;
        let mut outbound = Vec::new();
        let mut stats = PipelineStats::default();

        if self.resolver.resolve(&checkpoint, &outcome.applied, ctx) {
            self.dispatcher.dispatch(&mut checkpoint, ctx, &mut outbound, &mut stats)?;
        } else {
            log::debug!("event_absorbed flow_id={} kind={:?} applied={:?} waiting_for={:?}",
                        event.flow_id, kind, outcome.applied, checkpoint.waiting_for);
        }

        Ok(Some(Processed { checkpoint,
                            outbound,
                            stats }))
    }
}
