// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// Incluye un store de checkpoints en memoria (`InMemoryCheckpointStore`) y
// un Fiber Runner guionizado (`ScriptedFiberRunner`). No son durables y se
// usan para demos o pruebas locales.
use crate::domain::{Checkpoint, FiberState, FiberSuspension, FlowId, IoRequest, ResumePayload};
use crate::errors::{FiberError, FlowError, Result};
use crate::fiber::{FiberRunner, FlowFiber};
use crate::repository::CheckpointStore;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// Minimal in-memory store for wiring examples (not durable)
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<BTreeMap<FlowId, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Helper para mapear `Mutex::lock()` en un `Result` con
    /// `FlowError::Storage`.
    fn lock(&self) -> std::result::Result<MutexGuard<'_, BTreeMap<FlowId, Checkpoint>>, FlowError> {
        self.checkpoints
            .lock()
            .map_err(|e| FlowError::Storage(format!("mutex poisoned: {:?}", e)))
    }

    pub fn len(&self) -> usize {
        self.checkpoints.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn get(&self, flow_id: &FlowId) -> Result<Option<Checkpoint>> {
        Ok(self.lock()?.get(flow_id).cloned())
    }

    fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        self.lock()?.insert(checkpoint.flow_id.clone(), checkpoint);
        Ok(())
    }

    fn remove(&self, flow_id: &FlowId) -> Result<()> {
        self.lock()?.remove(flow_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.lock()?.values().cloned().collect())
    }
}

/// Paso de guion: la petición que devuelve el fiber o el fallo que reporta.
pub type ScriptStep = std::result::Result<IoRequest, FiberError>;

/// Estado compartido entre el runner y los fibers que crea.
#[derive(Default)]
struct ScriptState {
    scripts: Mutex<HashMap<FlowId, VecDeque<ScriptStep>>>,
    fallback: Mutex<Option<IoRequest>>,
    resumes: Mutex<Vec<(FlowId, ResumePayload)>>,
    in_flight: Mutex<HashSet<FlowId>>,
    #[cfg(any(test, feature = "testing"))]
    panic_on: Mutex<HashSet<FlowId>>,
    fail_create: Mutex<HashMap<FlowId, FiberError>>,
    step_delay: Mutex<Option<Duration>>,
    created: AtomicUsize,
    released: AtomicUsize,
    overlaps: AtomicUsize,
}

/// Runner determinista para pruebas.
///
/// Cada flow sigue un guion de pasos (`ScriptStep`); agotado el guion se
/// devuelve la petición de respaldo (por defecto `Complete(null)`). Registra
/// cada payload de reanudación, cuenta fibers creados/liberados y detecta
/// llamadas solapadas sobre un mismo flow.
#[derive(Clone, Default)]
pub struct ScriptedFiberRunner {
    state: Arc<ScriptState>,
}

impl ScriptedFiberRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Añade pasos al guion del flow.
    pub fn script(&self, flow_id: impl Into<FlowId>, steps: Vec<ScriptStep>) {
        let mut scripts = self.state.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts.entry(flow_id.into()).or_default().extend(steps);
    }

    /// Petición devuelta cuando el guion de un flow está vacío.
    pub fn set_fallback(&self, request: IoRequest) {
        *self.state.fallback.lock().unwrap_or_else(|e| e.into_inner()) = Some(request);
    }

    /// Retardo artificial dentro de cada `run_until_suspend` (inyección de
    /// carreras).
    pub fn set_step_delay(&self, delay: Duration) {
        *self.state.step_delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    /// El próximo `run_until_suspend` de este flow entra en pánico. Sólo
    /// con la feature `testing`.
    #[cfg(any(test, feature = "testing"))]
    pub fn panic_on(&self, flow_id: impl Into<FlowId>) {
        self.state.panic_on.lock().unwrap_or_else(|e| e.into_inner()).insert(flow_id.into());
    }

    /// La próxima creación de fiber para este flow falla.
    pub fn fail_create(&self, flow_id: impl Into<FlowId>, err: FiberError) {
        self.state.fail_create.lock().unwrap_or_else(|e| e.into_inner()).insert(flow_id.into(), err);
    }

    /// Todos los payloads de reanudación recibidos, en orden.
    pub fn resumes(&self) -> Vec<(FlowId, ResumePayload)> {
        self.state.resumes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn resumes_for(&self, flow_id: &FlowId) -> Vec<ResumePayload> {
        self.resumes()
            .into_iter()
            .filter(|(id, _)| id == flow_id)
            .map(|(_, resume)| resume)
            .collect()
    }

    pub fn created_count(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.state.released.load(Ordering::SeqCst)
    }

    /// Fibers creados y aún no liberados.
    pub fn live_count(&self) -> usize {
        self.created_count().saturating_sub(self.released_count())
    }

    /// Veces que dos llamadas para el mismo flow se solaparon.
    pub fn overlap_count(&self) -> usize {
        self.state.overlaps.load(Ordering::SeqCst)
    }
}

impl FiberRunner for ScriptedFiberRunner {
    fn create_fiber(&self, checkpoint: &Checkpoint) -> std::result::Result<Box<dyn FlowFiber>, FiberError> {
        let failure = self.state
                          .fail_create
                          .lock()
                          .unwrap_or_else(|e| e.into_inner())
                          .remove(&checkpoint.flow_id);
        if let Some(err) = failure {
            return Err(err);
        }
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedFiber { flow_id: checkpoint.flow_id.clone(),
                                    state: self.state.clone(),
                                    released: false }))
    }
}

struct ScriptedFiber {
    flow_id: FlowId,
    state: Arc<ScriptState>,
    released: bool,
}

impl ScriptedFiber {
    /// El estado del fiber es un contador de pasos big-endian.
    fn next_state(current: &FiberState) -> FiberState {
        let step = match current {
            FiberState::NotStarted => 0,
            FiberState::Suspended(bytes) => {
                let mut raw = [0u8; 8];
                let n = bytes.len().min(8);
                raw[8 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
                u64::from_be_bytes(raw)
            }
        };
        FiberState::Suspended((step + 1).to_be_bytes().to_vec())
    }

    fn next_step(&self) -> ScriptStep {
        let popped = self.state
                         .scripts
                         .lock()
                         .unwrap_or_else(|e| e.into_inner())
                         .get_mut(&self.flow_id)
                         .and_then(|steps| steps.pop_front());
        match popped {
            Some(step) => step,
            None => {
                let fallback = self.state.fallback.lock().unwrap_or_else(|e| e.into_inner()).clone();
                Ok(fallback.unwrap_or(IoRequest::Complete { result: JsonValue::Null }))
            }
        }
    }
}

impl FlowFiber for ScriptedFiber {
    fn run_until_suspend(&mut self,
                         fiber_state: &FiberState,
                         resume: ResumePayload)
                         -> std::result::Result<FiberSuspension, FiberError> {
        #[cfg(any(test, feature = "testing"))]
        {
            let should_panic = self.state
                                   .panic_on
                                   .lock()
                                   .unwrap_or_else(|e| e.into_inner())
                                   .remove(&self.flow_id);
            if should_panic {
                panic!("scripted panic for flow {}", self.flow_id);
            }
        }

        let overlapped = !self.state
                              .in_flight
                              .lock()
                              .unwrap_or_else(|e| e.into_inner())
                              .insert(self.flow_id.clone());
        if overlapped {
            self.state.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let delay = *self.state.step_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        self.state
            .resumes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((self.flow_id.clone(), resume));
        let step = self.next_step();

        if !overlapped {
            self.state.in_flight.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.flow_id);
        }

        step.map(|request| FiberSuspension { request,
                                             fiber_state: Self::next_state(fiber_state) })
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.state.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}
