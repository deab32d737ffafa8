// Archivo: domain/records.rs
// Propósito: registros salientes y resultado del pipeline.
use super::checkpoint::Checkpoint;
use super::ids::{FlowId, HoldingIdentity};
use super::session::SessionEvent;
use super::status::FlowStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registro que el executor publica junto al commit del checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundRecord {
    /// Evento de sesión dirigido al flow par.
    Peer { source: HoldingIdentity, counterparty: HoldingIdentity, event: SessionEvent },
    Status(FlowStatus),
    /// `Wakeup` auto-dirigido, a entregar cuando venza `due_at`.
    Wakeup { flow_id: FlowId, due_at: DateTime<Utc> },
    /// `ScheduleCleanup` auto-dirigido tras la retención configurada.
    ScheduleCleanup { flow_id: FlowId, due_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Llamadas a `run_until_suspend` en esta invocación.
    pub fiber_iterations: u32,
}

/// `(checkpoint nuevo, registros salientes)`; `updated_checkpoint == None`
/// significa que no hay estado que guardar (tombstone).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub updated_checkpoint: Option<Checkpoint>,
    pub outbound_records: Vec<OutboundRecord>,
    pub stats: PipelineStats,
}

impl PipelineResult {
    pub fn status_records(&self) -> impl Iterator<Item = &FlowStatus> {
        self.outbound_records.iter().filter_map(|r| match r {
                                        OutboundRecord::Status(s) => Some(s),
                                        _ => None,
                                    })
    }

    pub fn wakeup_records(&self) -> impl Iterator<Item = (&FlowId, &DateTime<Utc>)> {
        self.outbound_records.iter().filter_map(|r| match r {
                                        OutboundRecord::Wakeup { flow_id, due_at } => Some((flow_id, due_at)),
                                        _ => None,
                                    })
    }

    pub fn peer_events(&self) -> impl Iterator<Item = &SessionEvent> {
        self.outbound_records.iter().filter_map(|r| match r {
                                        OutboundRecord::Peer { event, .. } => Some(event),
                                        _ => None,
                                    })
    }
}
