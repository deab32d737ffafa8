// Archivo: config.rs
// Propósito: configuración del pipeline (`FlowConfig`) y contexto inyectado
// por invocación (`PipelineContext`: configuración + reloj).
use crate::errors::{FlowError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Parámetros del plano de control.
///
/// El tope de reintentos y el backoff son configuración: el backoff es
/// exponencial, `retry_backoff_base_ms * 2^(intento-1)` acotado por
/// `retry_backoff_max_ms`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Máximo de llamadas al runner por invocación del pipeline.
    pub max_loop_iterations: u32,
    /// Reintentos transitorios permitidos antes de escalar a `FAILED`.
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,
    /// Retención de un checkpoint terminal antes del tombstone.
    pub cleanup_retention_ms: u64,
    /// Regresiones de secuencia más allá de esta ventana se reportan como
    /// violación de protocolo (se descartan igual que un duplicado).
    pub session_replay_window: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig { max_loop_iterations: 50,
                     max_retries: 5,
                     retry_backoff_base_ms: 1_000,
                     retry_backoff_max_ms: 60_000,
                     cleanup_retention_ms: 600_000,
                     session_replay_window: 1_000 }
    }
}

impl FlowConfig {
    /// Carga la configuración desde el entorno (`.env` incluido). Las
    /// variables ausentes toman el valor por defecto.
    ///
    /// Variables: `FLOW_MAX_LOOP_ITERATIONS`, `FLOW_MAX_RETRIES`,
    /// `FLOW_RETRY_BACKOFF_BASE_MS`, `FLOW_RETRY_BACKOFF_MAX_MS`,
    /// `FLOW_CLEANUP_RETENTION_MS`, `FLOW_SESSION_REPLAY_WINDOW`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let d = FlowConfig::default();
        let cfg = FlowConfig { max_loop_iterations: env_or("FLOW_MAX_LOOP_ITERATIONS", d.max_loop_iterations)?,
                               max_retries: env_or("FLOW_MAX_RETRIES", d.max_retries)?,
                               retry_backoff_base_ms: env_or("FLOW_RETRY_BACKOFF_BASE_MS", d.retry_backoff_base_ms)?,
                               retry_backoff_max_ms: env_or("FLOW_RETRY_BACKOFF_MAX_MS", d.retry_backoff_max_ms)?,
                               cleanup_retention_ms: env_or("FLOW_CLEANUP_RETENTION_MS", d.cleanup_retention_ms)?,
                               session_replay_window: env_or("FLOW_SESSION_REPLAY_WINDOW", d.session_replay_window)? };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_loop_iterations == 0 {
            return Err(FlowError::Config("max_loop_iterations debe ser >= 1".into()));
        }
        if self.retry_backoff_base_ms > self.retry_backoff_max_ms {
            return Err(FlowError::Config(format!("retry_backoff_base_ms ({}) > retry_backoff_max_ms ({})",
                                                 self.retry_backoff_base_ms, self.retry_backoff_max_ms)));
        }
        Ok(())
    }

    /// Espera antes del reintento número `attempt` (1-based).
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let ms = self.retry_backoff_base_ms
                     .saturating_mul(1u64 << shift)
                     .min(self.retry_backoff_max_ms);
        Duration::milliseconds(ms as i64)
    }

    pub fn cleanup_retention(&self) -> Duration {
        Duration::milliseconds(self.cleanup_retention_ms as i64)
    }
}

/// Lee una variable de entorno y la parsea; ausente => `default`.
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.trim()
                      .parse::<T>()
                      .map_err(|_| FlowError::Config(format!("valor inválido para {}: {:?}", key, raw))),
        Err(_) => Ok(default),
    }
}

/// Entradas inyectadas en cada invocación del pipeline. No hay reloj
/// global: `now` lo fija quien invoca.
#[derive(Clone, Debug)]
pub struct PipelineContext {
    pub config: FlowConfig,
    pub now: DateTime<Utc>,
}

impl PipelineContext {
    pub fn new(config: FlowConfig, now: DateTime<Utc>) -> Self {
        Self { config, now }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let cfg = FlowConfig { retry_backoff_base_ms: 100,
                               retry_backoff_max_ms: 1_000,
                               ..FlowConfig::default() };
        assert_eq!(cfg.retry_backoff(1), Duration::milliseconds(100));
        assert_eq!(cfg.retry_backoff(2), Duration::milliseconds(200));
        assert_eq!(cfg.retry_backoff(4), Duration::milliseconds(800));
        assert_eq!(cfg.retry_backoff(5), Duration::milliseconds(1_000));
        assert_eq!(cfg.retry_backoff(60), Duration::milliseconds(1_000));
    }

    #[test]
    fn zero_iterations_is_rejected() {
        let cfg = FlowConfig { max_loop_iterations: 0,
                               ..FlowConfig::default() };
        assert!(matches!(cfg.validate(), Err(FlowError::Config(_))));
    }
}
