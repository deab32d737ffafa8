// Archivo: fiber.rs
// Propósito: contrato con el Fiber Runner externo y la fuente de fibers
// vivos que usa el dispatcher.
//
// El runner es dueño del mecanismo de continuación (hilo aparcado, máquina
// de estados reanudable, sandbox...). El plano de control sólo ve
// `IoRequest` y un `FiberState` opaco.
use crate::domain::{Checkpoint, FiberState, FiberSuspension, FlowId, ResumePayload};
use crate::errors::FiberError;
use std::sync::{Arc, Mutex};

/// Handle vivo (ya inicializado) de un flow.
pub trait FlowFiber: Send {
    /// Ejecuta la lógica del flow desde `fiber_state` hasta la siguiente
    /// petición de suspensión.
    fn run_until_suspend(&mut self, fiber_state: &FiberState, resume: ResumePayload) -> Result<FiberSuspension, FiberError>;

    /// Hook de liberación: cierra sandbox y recursos del handle. Debe ser
    /// idempotente.
    fn release(&mut self);
}

/// Fábrica de fibers. Crear un fiber es caro (carga de código, sandbox);
/// por eso existe la caché del executor.
pub trait FiberRunner: Send + Sync {
    fn create_fiber(&self, checkpoint: &Checkpoint) -> Result<Box<dyn FlowFiber>, FiberError>;
}

pub type SharedFiber = Arc<Mutex<Box<dyn FlowFiber>>>;

/// De dónde obtiene el dispatcher el fiber vivo de un flow.
pub trait FiberSource: Send + Sync {
    /// Obtiene (o crea) el fiber del flow.
    fn acquire(&self, checkpoint: &Checkpoint) -> Result<SharedFiber, FiberError>;

    /// Devuelve el fiber tras usarlo. `keep == false` lo libera.
    fn finish(&self, flow_id: &FlowId, fiber: SharedFiber, keep: bool);

    /// Descarta cualquier fiber vivo del flow (terminal o estado dudoso).
    fn discard(&self, flow_id: &FlowId);
}

/// Fuente sin caché: crea un fiber por invocación y lo libera al terminar.
pub struct DirectFiberSource {
    runner: Arc<dyn FiberRunner>,
}

impl DirectFiberSource {
    pub fn new(runner: Arc<dyn FiberRunner>) -> Self {
        Self { runner }
    }
}

impl FiberSource for DirectFiberSource {
    fn acquire(&self, checkpoint: &Checkpoint) -> Result<SharedFiber, FiberError> {
        let fiber = self.runner.create_fiber(checkpoint)?;
        Ok(Arc::new(Mutex::new(fiber)))
    }

    fn finish(&self, _flow_id: &FlowId, fiber: SharedFiber, _keep: bool) {
        release_shared(&fiber);
    }

    fn discard(&self, _flow_id: &FlowId) {}
}

/// Llama al hook de liberación de un fiber compartido.
pub fn release_shared(fiber: &SharedFiber) {
    fiber.lock().unwrap_or_else(|e| e.into_inner()).release();
}
