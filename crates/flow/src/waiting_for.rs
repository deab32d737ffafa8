// Archivo: waiting_for.rs
// Propósito: decidir si el evento recién aplicado desbloquea el flow. Un
// evento no resuelto es legal y se absorbe (mensajes fuera de orden,
// wakeups prematuros).
use crate::config::PipelineContext;
use crate::domain::{Checkpoint, WaitingFor};
use crate::handlers::AppliedEvent;
use crate::session::can_resume_receive;

#[derive(Debug, Default, Clone, Copy)]
pub struct WaitingForResolver;

impl WaitingForResolver {
    pub fn new() -> Self {
        Self
    }

    /// Una regla por variante de `WaitingFor`:
    /// - sesión X: el evento avanzó la marca contigua de X (o la puso en
    ///   error) y hay algo que entregar;
    /// - wakeup en T: el evento es `Wakeup` y `now >= T`;
    /// - ninguno: siempre, salvo eventos absorbidos.
    pub fn resolve(&self, checkpoint: &Checkpoint, applied: &AppliedEvent, ctx: &PipelineContext) -> bool {
        if checkpoint.is_terminal() {
            return false;
        }
        match (&checkpoint.waiting_for, applied) {
            (_, AppliedEvent::Ignored) => false,
            (WaitingFor::None, _) => true,
            (WaitingFor::SessionMessage { session_id },
             AppliedEvent::SessionAdvanced { session_id: applied_id } | AppliedEvent::SessionErrored { session_id: applied_id })
                if session_id == applied_id =>
            {
                checkpoint.sessions.get(session_id).map(can_resume_receive).unwrap_or(false)
            }
            (WaitingFor::SessionMessage { .. }, _) => false,
            (WaitingFor::Wakeup { at }, AppliedEvent::WakeupArrived) => ctx.now >= *at,
            (WaitingFor::Wakeup { .. }, _) => false,
        }
    }
}
