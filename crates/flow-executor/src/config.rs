// Archivo: config.rs
// Propósito: configuración del executor (`ExecutorConfig`), cargada desde el
// entorno con los mismos defaults que usa la demo.
use crate::errors::{ExecutorError, Result};
use flow::FlowConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Particiones del log; una por worker.
    pub partition_count: u32,
    /// Fibers vivos como máximo en la caché (LRU).
    pub fiber_cache_capacity: usize,
    /// Plazo para que un worker termine su evento en vuelo al parar o
    /// perder la partición.
    pub drain_timeout_ms: u64,
    /// Espera tras un fallo de transporte o commit antes de reintentar.
    pub error_backoff_ms: u64,
    pub flow: FlowConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig { partition_count: 8,
                         fiber_cache_capacity: 1_024,
                         drain_timeout_ms: 30_000,
                         error_backoff_ms: 200,
                         flow: FlowConfig::default() }
    }
}

impl ExecutorConfig {
    /// Carga desde el entorno (`.env` incluido). Variables:
    /// `FLOW_EXECUTOR_PARTITIONS`, `FLOW_EXECUTOR_FIBER_CACHE_CAPACITY`,
    /// `FLOW_EXECUTOR_DRAIN_TIMEOUT_MS`, `FLOW_EXECUTOR_ERROR_BACKOFF_MS`,
    /// más las `FLOW_*` de `FlowConfig::from_env`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let d = ExecutorConfig::default();
        let cfg = ExecutorConfig { partition_count: env_or("FLOW_EXECUTOR_PARTITIONS", d.partition_count)?,
                                   fiber_cache_capacity: env_or("FLOW_EXECUTOR_FIBER_CACHE_CAPACITY",
                                                                d.fiber_cache_capacity)?,
                                   drain_timeout_ms: env_or("FLOW_EXECUTOR_DRAIN_TIMEOUT_MS", d.drain_timeout_ms)?,
                                   error_backoff_ms: env_or("FLOW_EXECUTOR_ERROR_BACKOFF_MS", d.error_backoff_ms)?,
                                   flow: FlowConfig::from_env().map_err(|e| ExecutorError::Config(e.to_string()))? };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.partition_count == 0 {
            return Err(ExecutorError::Config("partition_count debe ser >= 1".into()));
        }
        if self.fiber_cache_capacity == 0 {
            return Err(ExecutorError::Config("fiber_cache_capacity debe ser >= 1".into()));
        }
        self.flow
            .validate()
            .map_err(|e| ExecutorError::Config(e.to_string()))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    flow::env_or(key, default).map_err(|e| ExecutorError::Config(e.to_string()))
}
