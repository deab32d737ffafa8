// Archivo: session.rs
// Propósito: protocolo de sesión. Secuenciación, acks, buffer fuera de
// orden y entrega FIFO a la lógica del flow. Opera sólo sobre
// `SessionState`; no conoce el checkpoint ni el transporte.
use crate::domain::{ResumePayload, SessionDirection, SessionEvent, SessionPayload, SessionState, SessionStatus};
use crate::errors::{FlowError, Result};
use chrono::{DateTime, Utc};

/// Efecto de aplicar un evento entrante sobre la secuencia de la sesión.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// `received_sequence_number` avanzó de `from` a `to`.
    Advanced { from: u64, to: u64 },
    /// Llegó por encima de un hueco; quedó en `out_of_order_sequence_numbers`.
    Buffered,
    /// Repetido o ya integrado; la sesión no cambió.
    Duplicate,
    /// Evento sin número de secuencia (`Ack`, `Error`).
    Unsequenced,
}

/// Aplica un evento entrante.
///
/// 1. `seq == received + 1`: avanza e integra los números contiguos ya
///    presentes en el buffer fuera de orden.
/// 2. `seq <= received` (o ya en el buffer): duplicado, se descarta sin
///    mutar la sesión.
/// 3. `seq > received + 1`: se guarda en el buffer, sin avanzar.
///
/// El ack del par (`received_sequence_num`) sólo poda el estado local de
/// envíos no reconocidos.
pub fn apply_session_event(session: &mut SessionState, incoming: &SessionEvent, replay_window: u64) -> SequenceOutcome {
    let seq = match incoming.sequence_num {
        Some(seq) => seq,
        None => {
            note_peer_activity(session, incoming);
            if let SessionPayload::Error { message } = &incoming.payload {
                session.status = SessionStatus::Error;
                session.error_message = Some(message.clone());
            }
            return SequenceOutcome::Unsequenced;
        }
    };

    if seq <= session.received_sequence_number || session.out_of_order_sequence_numbers.contains(&seq) {
        let regression = session.received_sequence_number.saturating_sub(seq);
        if regression > replay_window {
            log::warn!("session_protocol_violation session_id={} seq={} received={} window={}",
                       session.session_id, seq, session.received_sequence_number, replay_window);
        } else {
            log::debug!("session_duplicate session_id={} seq={} received={}",
                        session.session_id, seq, session.received_sequence_number);
        }
        return SequenceOutcome::Duplicate;
    }

    note_peer_activity(session, incoming);
    if matches!(incoming.payload, SessionPayload::Data { .. } | SessionPayload::Close) {
        session.received_messages.insert(seq, incoming.payload.clone());
    }
    session.ack_pending = true;

    if seq == session.received_sequence_number + 1 {
        let from = session.received_sequence_number;
        fold_contiguous(session, seq);
        while session.out_of_order_sequence_numbers.remove(&(session.received_sequence_number + 1)) {
            let next = session.received_sequence_number + 1;
            fold_contiguous(session, next);
        }
        SequenceOutcome::Advanced { from,
                                    to: session.received_sequence_number }
    } else {
        session.out_of_order_sequence_numbers.insert(seq);
        SequenceOutcome::Buffered
    }
}

fn note_peer_activity(session: &mut SessionState, incoming: &SessionEvent) {
    prune_acknowledged(session, incoming.received_sequence_num, &incoming.out_of_order_sequence_nums);
    if session.status == SessionStatus::Created && !session.awaiting_init {
        session.status = SessionStatus::Confirmed;
    }
    session.last_received_at = Some(incoming.timestamp);
}

fn fold_contiguous(session: &mut SessionState, seq: u64) {
    session.received_sequence_number = seq;
    if matches!(session.received_messages.get(&seq), Some(SessionPayload::Close)) {
        session.close_received = true;
        apply_close(session);
    }
}

fn apply_close(session: &mut SessionState) {
    session.status = match session.status {
        SessionStatus::Created | SessionStatus::Confirmed => SessionStatus::Closing,
        SessionStatus::Closing => SessionStatus::Closed,
        other => other,
    };
}

/// Poda los números enviados que el par ya reconoció, ya sea por debajo de
/// su marca contigua o dentro de su buffer fuera de orden.
pub fn prune_acknowledged(session: &mut SessionState, peer_received: u64, peer_out_of_order: &[u64]) {
    session.unacknowledged_sequence_numbers
           .retain(|n| *n > peer_received && !peer_out_of_order.contains(n));
}

/// Estampa un evento saliente. Los payloads secuenciados consumen el
/// siguiente número (`send_sequence_number + 1`); todos llevan el ack local
/// a cuestas, por lo que limpian `ack_pending`.
pub fn stamp_outbound(session: &mut SessionState, payload: SessionPayload, now: DateTime<Utc>) -> Result<SessionEvent> {
    if session.awaiting_init {
        return Err(FlowError::Session { session_id: session.session_id.clone(),
                                        reason: "el par aún no envió init".into() });
    }
    match &payload {
        SessionPayload::Init { .. } if session.send_sequence_number != 0 => {
            return Err(FlowError::Session { session_id: session.session_id.clone(),
                                            reason: "init sólo puede ser el primer mensaje".into() });
        }
        SessionPayload::Init { .. } | SessionPayload::Data { .. } if !session.status.can_send() => {
            return Err(FlowError::Session { session_id: session.session_id.clone(),
                                            reason: format!("no se puede enviar en estado {:?}", session.status) });
        }
        SessionPayload::Close if matches!(session.status, SessionStatus::Closed | SessionStatus::Error) => {
            return Err(FlowError::Session { session_id: session.session_id.clone(),
                                            reason: format!("no se puede cerrar en estado {:?}", session.status) });
        }
        _ => {}
    }

    let sequence_num = if payload.is_sequenced() {
        session.send_sequence_number += 1;
        session.unacknowledged_sequence_numbers.insert(session.send_sequence_number);
        Some(session.send_sequence_number)
    } else {
        None
    };

    match &payload {
        SessionPayload::Close => apply_close(session),
        SessionPayload::Error { message } => {
            session.status = SessionStatus::Error;
            session.error_message = Some(message.clone());
        }
        _ => {}
    }
    session.ack_pending = false;

    Ok(SessionEvent { session_id: session.session_id.clone(),
                      direction: SessionDirection::Outbound,
                      timestamp: now,
                      sequence_num,
                      received_sequence_num: session.received_sequence_number,
                      out_of_order_sequence_nums: session.out_of_order_sequence_numbers.iter().copied().collect(),
                      payload })
}

/// `true` si hay un mensaje contiguo pendiente de entrega.
pub fn has_deliverable(session: &SessionState) -> bool {
    session.received_messages
           .first_key_value()
           .map(|(seq, _)| *seq <= session.received_sequence_number)
           .unwrap_or(false)
}

/// `true` si un `ReceiveMessage` sobre la sesión puede reanudarse ya.
pub fn can_resume_receive(session: &SessionState) -> bool {
    has_deliverable(session) || session.status == SessionStatus::Error || session.close_received
}

/// Extrae el siguiente mensaje entregable (el de menor número contiguo). Si
/// no hay ninguno, informa error o cierre de la sesión; `None` significa que
/// el flow debe suspenderse.
pub fn take_next_delivery(session: &mut SessionState) -> Option<ResumePayload> {
    while has_deliverable(session) {
        let (seq, payload) = session.received_messages.pop_first()?;
        match payload {
            SessionPayload::Data { payload } => {
                return Some(ResumePayload::SessionMessage { session_id: session.session_id.clone(),
                                                            sequence_num: seq,
                                                            payload });
            }
            SessionPayload::Close => {
                return Some(ResumePayload::SessionClosed { session_id: session.session_id.clone() });
            }
            // Sólo Data y Close se almacenan.
            _ => continue,
        }
    }
    if session.status == SessionStatus::Error {
        return Some(ResumePayload::SessionError { session_id: session.session_id.clone(),
                                                  message: session.error_message
                                                                  .clone()
                                                                  .unwrap_or_else(|| "error de sesión".into()) });
    }
    if session.close_received {
        return Some(ResumePayload::SessionClosed { session_id: session.session_id.clone() });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HoldingIdentity, SessionId};
    use serde_json::json;

    fn session() -> SessionState {
        SessionState::new(SessionId::from("s1"), HoldingIdentity::new("O=Bob", "g"), SessionDirection::Inbound)
    }

    #[test]
    fn close_folded_late_still_closes() {
        let mut s = session();
        apply_session_event(&mut s, &SessionEvent::inbound("s1", Some(2), SessionPayload::Close), 10);
        assert_eq!(s.status, SessionStatus::Confirmed);
        apply_session_event(&mut s, &SessionEvent::data("s1", 1, json!("x")), 10);
        assert_eq!(s.status, SessionStatus::Closing);
        assert!(s.close_received);
        assert!(matches!(take_next_delivery(&mut s), Some(ResumePayload::SessionMessage { sequence_num: 1, .. })));
        assert!(matches!(take_next_delivery(&mut s), Some(ResumePayload::SessionClosed { .. })));
        // cerrada: recibir de nuevo no se queda colgado
        assert!(matches!(take_next_delivery(&mut s), Some(ResumePayload::SessionClosed { .. })));
    }

    #[test]
    fn session_opened_before_init_stays_silent_until_init() {
        let mut s = SessionState::pending_init(SessionId::from("s1"));
        apply_session_event(&mut s, &SessionEvent::data("s1", 2, json!("early")), 10);
        assert_eq!(s.status, SessionStatus::Created);
        assert!(s.ack_pending);
        assert!(matches!(stamp_outbound(&mut s, SessionPayload::Ack, Utc::now()), Err(FlowError::Session { .. })));

        s.accept_init(HoldingIdentity::new("O=Bob", "g"));
        let init = SessionEvent::inbound("s1", Some(1), SessionPayload::Init { counterparty: s.counterparty.clone() });
        assert_eq!(apply_session_event(&mut s, &init, 10), SequenceOutcome::Advanced { from: 0, to: 2 });
        assert_eq!(s.status, SessionStatus::Confirmed);
        assert!(matches!(take_next_delivery(&mut s), Some(ResumePayload::SessionMessage { sequence_num: 2, .. })));
    }

    #[test]
    fn data_after_local_close_is_rejected() {
        let mut s = session();
        stamp_outbound(&mut s, SessionPayload::Close, Utc::now()).unwrap();
        let err = stamp_outbound(&mut s, SessionPayload::Data { payload: json!(1) }, Utc::now());
        assert!(matches!(err, Err(FlowError::Session { .. })));
    }
}
