// Archivo: domain/session.rs
// Propósito: tipos de sesión (estado por sesión y eventos de sesión). La
// lógica de secuenciación vive en `crate::session`.
use super::ids::{HoldingIdentity, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Confirmed,
    Closing,
    Closed,
    Error,
}

impl SessionStatus {
    /// Se pueden enviar datos sólo antes de cualquier cierre o error.
    pub fn can_send(self) -> bool {
        matches!(self, SessionStatus::Created | SessionStatus::Confirmed)
    }
}

/// Contenido de un evento de sesión.
///
/// `Init`, `Data` y `Close` llevan número de secuencia; `Error` y `Ack`
/// no (`sequence_num == None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionPayload {
    Init { counterparty: HoldingIdentity },
    Data { payload: JsonValue },
    Close,
    Error { message: String },
    Ack,
}

impl SessionPayload {
    pub fn is_sequenced(&self) -> bool {
        matches!(self, SessionPayload::Init { .. } | SessionPayload::Data { .. } | SessionPayload::Close)
    }
}

/// Evento de sesión tal como viaja por el transporte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub direction: SessionDirection,
    pub timestamp: DateTime<Utc>,
    /// `None` hasta que se asigna (mensajes no secuenciados lo dejan así).
    pub sequence_num: Option<u64>,
    /// Ack del par: mayor número contiguo recibido por el otro lado.
    pub received_sequence_num: u64,
    pub out_of_order_sequence_nums: Vec<u64>,
    pub payload: SessionPayload,
}

impl SessionEvent {
    /// Construye un evento entrante; útil para el transporte y pruebas.
    pub fn inbound(session_id: impl Into<SessionId>, sequence_num: Option<u64>, payload: SessionPayload) -> Self {
        Self { session_id: session_id.into(),
               direction: SessionDirection::Inbound,
               timestamp: Utc::now(),
               sequence_num,
               received_sequence_num: 0,
               out_of_order_sequence_nums: Vec::new(),
               payload }
    }

    /// Mensaje de datos entrante con número de secuencia.
    pub fn data(session_id: impl Into<SessionId>, sequence_num: u64, payload: JsonValue) -> Self {
        Self::inbound(session_id, Some(sequence_num), SessionPayload::Data { payload })
    }
}

/// Estado de una sesión dentro del checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub counterparty: HoldingIdentity,
    pub direction: SessionDirection,
    /// Último número estampado en un mensaje saliente (0 = ninguno); el
    /// próximo mensaje lleva `send_sequence_number + 1`.
    pub send_sequence_number: u64,
    /// Mayor número contiguo recibido y reconocido.
    pub received_sequence_number: u64,
    /// Números recibidos por encima de `received_sequence_number` que aún
    /// no se integran por un hueco.
    pub out_of_order_sequence_numbers: BTreeSet<u64>,
    /// Mensajes recibidos pendientes de entrega a la lógica del flow.
    pub received_messages: BTreeMap<u64, SessionPayload>,
    /// Números enviados aún no reconocidos por el par.
    pub unacknowledged_sequence_numbers: BTreeSet<u64>,
    pub status: SessionStatus,
    pub error_message: Option<String>,
    /// El par ya envió `Close` (integrado en orden).
    pub close_received: bool,
    /// Hay que enviar un ack explícito al terminar el pipeline.
    pub ack_pending: bool,
    pub last_received_at: Option<DateTime<Utc>>,
    /// Abierta por un `Data`/`Close` que llegó antes del `Init` del par. La
    /// contraparte aún no se conoce: no se envía nada hasta el `Init`.
    #[serde(default)]
    pub awaiting_init: bool,
}

impl SessionState {
    pub fn new(session_id: SessionId, counterparty: HoldingIdentity, direction: SessionDirection) -> Self {
        Self { session_id,
               counterparty,
               direction,
               send_sequence_number: 0,
               received_sequence_number: 0,
               out_of_order_sequence_numbers: BTreeSet::new(),
               received_messages: BTreeMap::new(),
               unacknowledged_sequence_numbers: BTreeSet::new(),
               status: SessionStatus::Created,
               error_message: None,
               close_received: false,
               ack_pending: false,
               last_received_at: None,
               awaiting_init: false }
    }

    /// Sesión entrante abierta por un mensaje secuenciado adelantado al
    /// `Init`. Se completa con `accept_init`.
    pub fn pending_init(session_id: SessionId) -> Self {
        let mut session = Self::new(session_id, HoldingIdentity::new("", ""), SessionDirection::Inbound);
        session.awaiting_init = true;
        session
    }

    /// Integra el `Init` del par sobre una sesión abierta antes de tiempo.
    pub fn accept_init(&mut self, counterparty: HoldingIdentity) {
        self.counterparty = counterparty;
        self.awaiting_init = false;
        if self.status == SessionStatus::Created {
            self.status = SessionStatus::Confirmed;
        }
    }
}
