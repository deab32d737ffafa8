//! Crate `flow`: plano de control para ejecutar flows con checkpoint
//!
//! Este crate define los tipos de dominio (`Checkpoint`, `SessionState`,
//! `FlowEvent`, `IoRequest`), el protocolo de sesión, los handlers de
//! eventos, el resolver de espera, el dispatcher que conduce al Fiber
//! Runner externo y el `FlowPipeline` que orquesta todo para un evento.
//!
//! Diseño resumido:
//! - Pipeline puro: `(checkpoint, evento, contexto) -> (checkpoint nuevo,
//!   registros salientes)`. El reloj y la configuración se inyectan.
//! - El Fiber Runner es una caja negra con protocolo explícito
//!   petición/respuesta (`IoRequest` / `ResumePayload`).
//! - Entrega FIFO por sesión aunque el transporte desordene: los huecos se
//!   aparcan y los duplicados se descartan sin mutar estado.
//!
//! Ejemplo rápido:
//! ```rust
//! use flow::{DirectFiberSource, FlowConfig, FlowEvent, FlowId, FlowPipeline, HoldingIdentity, PipelineContext,
//!            ScriptedFiberRunner, StartFlow};
//! use std::sync::Arc;
//! let runner = Arc::new(ScriptedFiberRunner::new());
//! let pipeline = FlowPipeline::new(Arc::new(DirectFiberSource::new(runner)));
//! let start = StartFlow { holding_identity: HoldingIdentity::new("O=Alice", "g1"),
//!                         package_id: "demo".into(),
//!                         request_id: "r1".into(),
//!                         args: serde_json::json!({}) };
//! let ctx = PipelineContext::new(FlowConfig::default(), chrono::Utc::now());
//! let result = pipeline.process(None, &FlowEvent::start(FlowId::from("f1"), start), &ctx);
//! assert!(result.updated_checkpoint.is_some());
//! ```
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod fiber;
pub mod handlers;
pub mod pipeline;
pub mod post_processor;
pub mod repository;
pub mod session;
pub mod stubs;
pub mod waiting_for;

pub use config::*;
pub use dispatcher::*;
pub use domain::*;
pub use errors::*;
pub use fiber::*;
pub use handlers::*;
pub use pipeline::*;
pub use post_processor::*;
pub use repository::*;
pub use stubs::*;
pub use waiting_for::*;
