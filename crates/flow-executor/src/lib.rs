//! Crate `flow-executor`: runtime que conecta el pipeline de `flow` con
//! un log de eventos particionado
//!
//! Piezas:
//! - `FlowExecutor`: un worker tokio por partición asignada; procesa cada
//!   evento en orden de log y confirma `(checkpoint, registros, offset)`
//!   como un único lote.
//! - `FlowFiberCache`: caché acotada de fibers vivos compartida por los
//!   workers, con get-or-create atómico.
//! - `FlowRebalanceListener`: expulsa fibers al perder una partición y
//!   re-siembra temporizadores al ganarla.
//! - `WakeupScheduler`: publica `Wakeup` y `ScheduleCleanup` a su hora.
//! - `EventLog` / `InMemoryEventLog`: contrato de transporte y una
//!   implementación en memoria con fencing de commits.
//!
//! Ejemplo:
//! ```rust
//! use flow::{FlowEvent, FlowId, HoldingIdentity, ScriptedFiberRunner, StartFlow};
//! use flow_executor::{ExecutorConfig, FlowExecutor, InMemoryEventLog, PartitionId};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = ExecutorConfig { partition_count: 2, ..ExecutorConfig::default() };
//! let log = Arc::new(InMemoryEventLog::new(config.partition_count));
//! let executor = FlowExecutor::new(config, log.clone(), Arc::new(ScriptedFiberRunner::new())).unwrap();
//! executor.on_partitions_assigned(&[PartitionId(0), PartitionId(1)]).await.unwrap();
//!
//! let start = StartFlow { holding_identity: HoldingIdentity::new("O=Alice", "g1"),
//!                         package_id: "demo".into(),
//!                         request_id: "r1".into(),
//!                         args: serde_json::json!({}) };
//! let flow_id = FlowId::from("f1");
//! log.send(FlowEvent::start(flow_id.clone(), start)).await.unwrap();
//! assert!(log.wait_until(Duration::from_secs(5), |l| !l.statuses_for(&flow_id).is_empty()).await);
//! executor.stop().await.unwrap();
//! # });
//! ```

pub mod config;
pub mod errors;
pub mod executor;
pub mod fiber_cache;
pub mod in_memory;
pub mod partition;
pub mod rebalance;
pub mod scheduler;
pub mod transport;

pub use config::*;
pub use errors::*;
pub use executor::*;
pub use fiber_cache::*;
pub use in_memory::*;
pub use partition::*;
pub use rebalance::*;
pub use scheduler::*;
pub use transport::*;
