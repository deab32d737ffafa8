use chrono::Utc;
use flow::session::{apply_session_event, prune_acknowledged, stamp_outbound, take_next_delivery, SequenceOutcome};
use flow::{FlowError, HoldingIdentity, ResumePayload, SessionDirection, SessionEvent, SessionId, SessionPayload,
           SessionState, SessionStatus};
use serde_json::json;
use std::collections::BTreeSet;

const WINDOW: u64 = 1_000;

fn session() -> SessionState {
  SessionState::new(SessionId::from("s1"), HoldingIdentity::new("O=Bob", "group-1"), SessionDirection::Outbound)
}

fn permutations(items: &[u64]) -> Vec<Vec<u64>> {
  if items.len() <= 1 {
    return vec![items.to_vec()];
  }
  let mut out = Vec::new();
  for i in 0..items.len() {
    let mut rest = items.to_vec();
    let head = rest.remove(i);
    for mut tail in permutations(&rest) {
      tail.insert(0, head);
      out.push(tail);
    }
  }
  out
}

fn delivered_seq(resume: ResumePayload) -> u64 {
  match resume {
    ResumePayload::SessionMessage { sequence_num, .. } => sequence_num,
    other => panic!("unexpected delivery {:?}", other),
  }
}

#[test]
fn out_of_order_pair_is_parked_then_folded() {
  let mut s = session();
  let outcome = apply_session_event(&mut s, &SessionEvent::data("s1", 2, json!("b")), WINDOW);
  assert_eq!(outcome, SequenceOutcome::Buffered);
  assert_eq!(s.received_sequence_number, 0);
  assert_eq!(s.out_of_order_sequence_numbers, BTreeSet::from([2]));
  assert!(take_next_delivery(&mut s).is_none());

  let outcome = apply_session_event(&mut s, &SessionEvent::data("s1", 1, json!("a")), WINDOW);
  assert_eq!(outcome, SequenceOutcome::Advanced { from: 0, to: 2 });
  assert_eq!(s.received_sequence_number, 2);
  assert!(s.out_of_order_sequence_numbers.is_empty());
  assert_eq!(delivered_seq(take_next_delivery(&mut s).unwrap()), 1);
  assert_eq!(delivered_seq(take_next_delivery(&mut s).unwrap()), 2);
  assert!(take_next_delivery(&mut s).is_none());
}

#[test]
fn every_permutation_delivers_in_sequence_order() {
  let seqs = [1u64, 2, 3, 4, 5];
  for perm in permutations(&seqs) {
    let mut s = session();
    let mut delivered = Vec::new();
    for seq in &perm {
      apply_session_event(&mut s, &SessionEvent::data("s1", *seq, json!(seq)), WINDOW);
      while let Some(resume) = take_next_delivery(&mut s) {
        delivered.push(delivered_seq(resume));
      }
    }
    assert_eq!(delivered, seqs.to_vec(), "permutation {:?}", perm);
    assert_eq!(s.received_sequence_number, 5);
    assert!(s.out_of_order_sequence_numbers.is_empty());
  }
}

#[test]
fn replayed_events_never_mutate_the_session() {
  let mut s = session();
  for seq in [1, 2, 3, 5] {
    apply_session_event(&mut s, &SessionEvent::data("s1", seq, json!(seq)), WINDOW);
  }
  let before = s.clone();
  for seq in [1, 2, 3, 5] {
    let outcome = apply_session_event(&mut s, &SessionEvent::data("s1", seq, json!("replay")), WINDOW);
    assert_eq!(outcome, SequenceOutcome::Duplicate);
  }
  assert_eq!(s, before);
}

#[test]
fn regression_beyond_window_is_discarded_like_a_duplicate() {
  let mut s = session();
  for seq in 1..=20 {
    apply_session_event(&mut s, &SessionEvent::data("s1", seq, json!(seq)), 5);
  }
  let before = s.clone();
  let outcome = apply_session_event(&mut s, &SessionEvent::data("s1", 2, json!("old")), 5);
  assert_eq!(outcome, SequenceOutcome::Duplicate);
  assert_eq!(s, before);
}

#[test]
fn send_sequence_is_strictly_monotonic_and_acks_are_unsequenced() {
  let mut s = session();
  let now = Utc::now();
  let init = stamp_outbound(&mut s, SessionPayload::Init { counterparty: HoldingIdentity::new("O=Alice", "group-1") }, now).unwrap();
  let d1 = stamp_outbound(&mut s, SessionPayload::Data { payload: json!(1) }, now).unwrap();
  let ack = stamp_outbound(&mut s, SessionPayload::Ack, now).unwrap();
  let d2 = stamp_outbound(&mut s, SessionPayload::Data { payload: json!(2) }, now).unwrap();
  let close = stamp_outbound(&mut s, SessionPayload::Close, now).unwrap();

  let stamped: Vec<u64> = [&init, &d1, &d2, &close].iter().filter_map(|e| e.sequence_num).collect();
  assert_eq!(stamped, vec![1, 2, 3, 4]);
  assert_eq!(ack.sequence_num, None);
  assert_eq!(s.send_sequence_number, 4);
  assert_eq!(s.unacknowledged_sequence_numbers, BTreeSet::from([1, 2, 3, 4]));
  assert_eq!(s.status, SessionStatus::Closing);
}

#[test]
fn init_is_only_valid_as_first_message() {
  let mut s = session();
  stamp_outbound(&mut s, SessionPayload::Data { payload: json!(1) }, Utc::now()).unwrap();
  let err = stamp_outbound(&mut s, SessionPayload::Init { counterparty: HoldingIdentity::new("O=Alice", "g") }, Utc::now());
  assert!(matches!(err, Err(FlowError::Session { .. })));
}

#[test]
fn outbound_events_piggyback_the_local_ack() {
  let mut s = session();
  apply_session_event(&mut s, &SessionEvent::data("s1", 1, json!("a")), WINDOW);
  apply_session_event(&mut s, &SessionEvent::data("s1", 3, json!("c")), WINDOW);
  assert!(s.ack_pending);

  let out = stamp_outbound(&mut s, SessionPayload::Data { payload: json!("reply") }, Utc::now()).unwrap();
  assert_eq!(out.received_sequence_num, 1);
  assert_eq!(out.out_of_order_sequence_nums, vec![3]);
  assert!(!s.ack_pending);
}

#[test]
fn peer_acks_prune_unacknowledged_messages() {
  let mut s = session();
  for i in 0..4 {
    stamp_outbound(&mut s, SessionPayload::Data { payload: json!(i) }, Utc::now()).unwrap();
  }
  assert_eq!(s.unacknowledged_sequence_numbers, BTreeSet::from([1, 2, 3, 4]));

  let mut ack = SessionEvent::inbound("s1", None, SessionPayload::Ack);
  ack.received_sequence_num = 2;
  ack.out_of_order_sequence_nums = vec![4];
  assert_eq!(apply_session_event(&mut s, &ack, WINDOW), SequenceOutcome::Unsequenced);
  assert_eq!(s.unacknowledged_sequence_numbers, BTreeSet::from([3]));

  prune_acknowledged(&mut s, 3, &[]);
  assert!(s.unacknowledged_sequence_numbers.is_empty());
}

#[test]
fn session_status_follows_the_close_handshake() {
  let mut s = session();
  assert_eq!(s.status, SessionStatus::Created);
  apply_session_event(&mut s, &SessionEvent::data("s1", 1, json!("hi")), WINDOW);
  assert_eq!(s.status, SessionStatus::Confirmed);

  stamp_outbound(&mut s, SessionPayload::Close, Utc::now()).unwrap();
  assert_eq!(s.status, SessionStatus::Closing);
  apply_session_event(&mut s, &SessionEvent::inbound("s1", Some(2), SessionPayload::Close), WINDOW);
  assert_eq!(s.status, SessionStatus::Closed);
  assert!(s.close_received);
}

#[test]
fn peer_error_is_delivered_after_pending_messages() {
  let mut s = session();
  apply_session_event(&mut s, &SessionEvent::data("s1", 1, json!("last words")), WINDOW);
  let error = SessionEvent::inbound("s1", None, SessionPayload::Error { message: "counterparty crashed".into() });
  apply_session_event(&mut s, &error, WINDOW);
  assert_eq!(s.status, SessionStatus::Error);

  assert_eq!(delivered_seq(take_next_delivery(&mut s).unwrap()), 1);
  match take_next_delivery(&mut s) {
    Some(ResumePayload::SessionError { message, .. }) => assert_eq!(message, "counterparty crashed"),
    other => panic!("expected session error, got {:?}", other),
  }
}
