use chrono::{DateTime, Duration, TimeZone, Utc};
use flow::{Checkpoint, CheckpointStatus, CheckpointStore, DirectFiberSource, FailureKind, FiberError, FlowConfig,
           FlowEvent, FlowFailure, FlowId, FlowPipeline, FlowStatusKind, HoldingIdentity, InMemoryCheckpointStore,
           IoRequest, OutboundRecord, PipelineContext, PipelineResult, ResumePayload, ScriptStep, ScriptedFiberRunner,
           SessionEvent, SessionId, SessionPayload, SessionStatus, StartFlow, WaitingFor};
use serde_json::json;
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn alice() -> HoldingIdentity {
  HoldingIdentity::new("O=Alice, L=London", "group-1")
}

fn bob() -> HoldingIdentity {
  HoldingIdentity::new("O=Bob, L=Paris", "group-1")
}

fn s1() -> SessionId {
  SessionId::from("s1")
}

fn start_flow() -> StartFlow {
  StartFlow { holding_identity: alice(),
              package_id: "trade-pkg".into(),
              request_id: "req-1".into(),
              args: json!({"amount": 10}) }
}

fn initiate(session: &str) -> ScriptStep {
  Ok(IoRequest::InitiateSession { session_id: SessionId::from(session),
                                  counterparty: bob() })
}

fn receive(session: &str) -> ScriptStep {
  Ok(IoRequest::ReceiveMessage { session_id: SessionId::from(session) })
}

fn complete(result: serde_json::Value) -> ScriptStep {
  Ok(IoRequest::Complete { result })
}

/// Drives one flow through the pipeline, persisting checkpoints in an
/// in-memory store the way the executor does.
struct Harness {
  runner: Arc<ScriptedFiberRunner>,
  pipeline: FlowPipeline,
  store: InMemoryCheckpointStore,
  config: FlowConfig,
  flow_id: FlowId,
}

impl Harness {
  fn new(script: Vec<ScriptStep>) -> Self {
    Self::with_config(FlowConfig::default(), script)
  }

  fn with_config(config: FlowConfig, script: Vec<ScriptStep>) -> Self {
    let runner = Arc::new(ScriptedFiberRunner::new());
    let flow_id = FlowId::from("f1");
    runner.script(flow_id.clone(), script);
    let pipeline = FlowPipeline::new(Arc::new(DirectFiberSource::new(runner.clone())));
    Self { runner,
           pipeline,
           store: InMemoryCheckpointStore::new(),
           config,
           flow_id }
  }

  fn deliver(&self, event: FlowEvent, now: DateTime<Utc>) -> PipelineResult {
    let current = self.store.get(&event.flow_id).unwrap();
    let ctx = PipelineContext::new(self.config.clone(), now);
    let result = self.pipeline.process(current, &event, &ctx);
    match &result.updated_checkpoint {
      Some(cp) => self.store.put(cp.clone()).unwrap(),
      None => self.store.remove(&event.flow_id).unwrap(),
    }
    result
  }

  fn start(&self) -> PipelineResult {
    self.deliver(FlowEvent::start(self.flow_id.clone(), start_flow()), t0())
  }

  fn data(&self, seq: u64, now: DateTime<Utc>) -> PipelineResult {
    self.deliver(FlowEvent::session(self.flow_id.clone(), SessionEvent::data("s1", seq, json!({"seq": seq}))), now)
  }

  fn wakeup(&self, now: DateTime<Utc>) -> PipelineResult {
    self.deliver(FlowEvent::wakeup(self.flow_id.clone()), now)
  }

  fn checkpoint(&self) -> Checkpoint {
    self.store.get(&self.flow_id).unwrap().expect("checkpoint stored")
  }

  fn resumes(&self) -> Vec<ResumePayload> {
    self.runner.resumes_for(&self.flow_id)
  }
}

fn statuses(result: &PipelineResult) -> Vec<FlowStatusKind> {
  result.status_records().map(|s| s.status).collect()
}

#[test]
fn start_then_receive_suspends_on_the_session() {
  let h = Harness::new(vec![receive("s1")]);
  let result = h.start();

  let cp = result.updated_checkpoint.clone().unwrap();
  assert_eq!(cp.status, CheckpointStatus::Suspended);
  assert_eq!(cp.waiting_for, WaitingFor::SessionMessage { session_id: s1() });
  assert_eq!(statuses(&result), vec![FlowStatusKind::Running]);
  assert_eq!(h.resumes(), vec![ResumePayload::Start { args: json!({"amount": 10}) }]);
  assert_eq!(result.stats.fiber_iterations, 1);
}

#[test]
fn out_of_order_messages_are_absorbed_until_contiguous() {
  let h = Harness::new(vec![initiate("s1"), receive("s1"), receive("s1"), complete(json!("done"))]);
  let started = h.start();
  let init: Vec<_> = started.peer_events().collect();
  assert_eq!(init.len(), 1);
  assert_eq!(init[0].sequence_num, Some(1));
  assert!(matches!(init[0].payload, SessionPayload::Init { .. }));

  // seq 2 first: parked, flow stays suspended, runner untouched
  let parked = h.data(2, t0() + Duration::seconds(1));
  let cp = h.checkpoint();
  let session = &cp.sessions[&s1()];
  assert_eq!(session.received_sequence_number, 0);
  assert_eq!(session.out_of_order_sequence_numbers.iter().copied().collect::<Vec<_>>(), vec![2]);
  assert_eq!(cp.status, CheckpointStatus::Suspended);
  assert_eq!(parked.stats.fiber_iterations, 0);
  assert!(statuses(&parked).is_empty());
  // the buffered message is acknowledged explicitly
  let ack = parked.peer_events().next().expect("explicit ack");
  assert_eq!(ack.payload, SessionPayload::Ack);
  assert_eq!(ack.received_sequence_num, 0);
  assert_eq!(ack.out_of_order_sequence_nums, vec![2]);

  // seq 1 closes the gap: both messages are delivered in order
  let resumed = h.data(1, t0() + Duration::seconds(2));
  let cp = resumed.updated_checkpoint.clone().unwrap();
  assert_eq!(cp.status, CheckpointStatus::Completed);
  assert_eq!(cp.sessions[&s1()].received_sequence_number, 2);
  assert!(cp.sessions[&s1()].out_of_order_sequence_numbers.is_empty());
  let delivered: Vec<u64> = h.resumes()
                             .into_iter()
                             .filter_map(|r| match r {
                               ResumePayload::SessionMessage { sequence_num, .. } => Some(sequence_num),
                               _ => None,
                             })
                             .collect();
  assert_eq!(delivered, vec![1, 2]);
  assert_eq!(statuses(&resumed), vec![FlowStatusKind::Completed]);
}

#[test]
fn transient_failures_retry_then_fail_at_the_cap() {
  let config = FlowConfig { max_retries: 3,
                            retry_backoff_base_ms: 1_000,
                            retry_backoff_max_ms: 10_000,
                            ..FlowConfig::default() };
  let failures = (0..3).map(|i| Err(FiberError::Transient(format!("sandbox busy {}", i)))).collect();
  let h = Harness::with_config(config, failures);

  let mut wakeups = Vec::new();
  let mut all_statuses = Vec::new();
  let mut result = h.start();
  loop {
    all_statuses.extend(statuses(&result));
    let due: Vec<DateTime<Utc>> = result.wakeup_records().map(|(_, due)| *due).collect();
    wakeups.extend(due.iter().copied());
    if h.checkpoint().status != CheckpointStatus::Retrying {
      break;
    }
    assert_eq!(due.len(), 1);
    result = h.wakeup(due[0]);
  }

  let cp = h.checkpoint();
  assert_eq!(cp.status, CheckpointStatus::Failed);
  assert_eq!(cp.retry_count, 3);
  assert_eq!(wakeups.len(), 3);
  // exponential backoff between attempts
  assert_eq!(wakeups[0], t0() + Duration::seconds(1));
  assert_eq!(wakeups[1] - wakeups[0], Duration::seconds(2));
  assert_eq!(wakeups[2] - wakeups[1], Duration::seconds(4));
  let failed: Vec<_> = all_statuses.iter().filter(|s| **s == FlowStatusKind::Failed).collect();
  assert_eq!(failed.len(), 1);
  assert_eq!(all_statuses.first(), Some(&FlowStatusKind::Retrying));
  // every retry replays the interrupted start
  let resumes = h.resumes();
  assert_eq!(resumes.len(), 3);
  assert!(resumes.iter().all(|r| matches!(r, ResumePayload::Start { .. })));
  assert_eq!(cp.last_error.unwrap().kind, FailureKind::Fatal);

  // the wakeup recorded by the last failure reaches a terminal flow
  let late = h.wakeup(wakeups[2]);
  assert_eq!(late.stats.fiber_iterations, 0);
  assert!(statuses(&late).is_empty());
  assert_eq!(h.checkpoint().status, CheckpointStatus::Failed);
  assert_eq!(h.resumes().len(), 3);
}

#[test]
fn premature_wakeup_during_retry_is_absorbed() {
  let h = Harness::new(vec![Err(FiberError::Transient("db down".into())), complete(json!(1))]);
  h.start();
  let early = h.wakeup(t0() + Duration::milliseconds(10));
  assert_eq!(early.stats.fiber_iterations, 0);
  assert_eq!(h.checkpoint().status, CheckpointStatus::Retrying);

  let on_time = h.wakeup(t0() + Duration::seconds(1));
  assert_eq!(on_time.updated_checkpoint.as_ref().unwrap().status, CheckpointStatus::Completed);
  assert_eq!(h.checkpoint().retry_count, 0);
  assert_eq!(statuses(&on_time), vec![FlowStatusKind::Completed]);
}

#[test]
fn sleep_ignores_early_wakeups() {
  let until = t0() + Duration::seconds(10);
  let h = Harness::new(vec![Ok(IoRequest::Sleep { until }), complete(json!("rested"))]);
  let started = h.start();
  assert_eq!(started.wakeup_records().map(|(_, due)| *due).collect::<Vec<_>>(), vec![until]);
  assert_eq!(h.checkpoint().waiting_for, WaitingFor::Wakeup { at: until });

  let early = h.wakeup(t0() + Duration::seconds(5));
  assert_eq!(early.stats.fiber_iterations, 0);
  assert_eq!(h.checkpoint().status, CheckpointStatus::Suspended);

  let late = h.wakeup(until);
  assert_eq!(late.updated_checkpoint.unwrap().result, Some(json!("rested")));
  assert_eq!(h.resumes().last(), Some(&ResumePayload::Wakeup));
}

#[test]
fn iteration_cap_pauses_and_self_wakes() {
  let config = FlowConfig { max_loop_iterations: 3,
                            ..FlowConfig::default() };
  let h = Harness::with_config(config,
                               vec![Ok(IoRequest::SubFlowSpawn { name: "a".into() }),
                                    Ok(IoRequest::SubFlowSpawn { name: "b".into() }),
                                    Ok(IoRequest::SubFlowFinished),
                                    Ok(IoRequest::SubFlowFinished),
                                    complete(json!("ok"))]);
  let first = h.start();
  assert_eq!(first.stats.fiber_iterations, 3);
  let cp = h.checkpoint();
  assert_eq!(cp.status, CheckpointStatus::Suspended);
  assert_eq!(cp.waiting_for, WaitingFor::Wakeup { at: t0() });
  assert_eq!(cp.pending_resume, Some(ResumePayload::Continue));
  assert_eq!(cp.flow_stack.len(), 1);
  assert_eq!(first.wakeup_records().count(), 1);

  let second = h.wakeup(t0());
  assert_eq!(second.stats.fiber_iterations, 2);
  let cp = h.checkpoint();
  assert_eq!(cp.status, CheckpointStatus::Completed);
  assert!(cp.flow_stack.is_empty());
  assert!(cp.pending_resume.is_none());
}

#[test]
fn force_checkpoint_commits_before_continuing() {
  let h = Harness::new(vec![Ok(IoRequest::ForceCheckpoint), complete(json!(42))]);
  let paused = h.start();
  assert_eq!(statuses(&paused), vec![FlowStatusKind::Running]);
  assert_eq!(paused.wakeup_records().map(|(_, due)| *due).collect::<Vec<_>>(), vec![t0()]);
  assert_eq!(h.checkpoint().status, CheckpointStatus::Suspended);

  let done = h.wakeup(t0());
  assert_eq!(done.updated_checkpoint.unwrap().result, Some(json!(42)));
  assert_eq!(h.resumes().last(), Some(&ResumePayload::Continue));
}

#[test]
fn business_failure_is_tagged_in_the_status_record() {
  let h = Harness::new(vec![Ok(IoRequest::Fail { failure: FlowFailure::business("insufficient funds") })]);
  let result = h.start();
  let status = result.status_records().last().cloned().unwrap();
  assert_eq!(status.status, FlowStatusKind::Failed);
  assert_eq!(status.holding_identity, Some(alice()));
  assert_eq!(status.error.unwrap().kind, FailureKind::Business);
  assert_eq!(result.wakeup_records().count(), 0);
  let cleanup: Vec<_> = result.outbound_records
                              .iter()
                              .filter_map(|r| match r {
                                OutboundRecord::ScheduleCleanup { due_at, .. } => Some(*due_at),
                                _ => None,
                              })
                              .collect();
  assert_eq!(cleanup, vec![t0() + FlowConfig::default().cleanup_retention()]);
}

#[test]
fn fatal_fiber_error_fails_without_retry() {
  let h = Harness::new(vec![Err(FiberError::Fatal("class not found".into()))]);
  let result = h.start();
  let cp = result.updated_checkpoint.as_ref().unwrap();
  assert_eq!(cp.status, CheckpointStatus::Failed);
  assert_eq!(cp.retry_count, 0);
  assert_eq!(result.wakeup_records().count(), 0);
  assert_eq!(h.runner.live_count(), 0);
}

#[test]
fn kill_errors_open_sessions_and_is_final() {
  let h = Harness::new(vec![initiate("s1"), receive("s1")]);
  h.start();
  let killed = h.deliver(FlowEvent::kill(h.flow_id.clone(), "operator request"), t0() + Duration::seconds(3));
  let cp = killed.updated_checkpoint.clone().unwrap();
  assert_eq!(cp.status, CheckpointStatus::Killed);
  assert_eq!(cp.sessions[&s1()].status, SessionStatus::Error);
  let status = killed.status_records().next().cloned().unwrap();
  assert_eq!(status.status, FlowStatusKind::Killed);
  assert_eq!(status.error.unwrap().kind, FailureKind::Killed);
  let errors: Vec<_> = killed.outbound_records
                             .iter()
                             .filter_map(|r| match r {
                               OutboundRecord::Peer { counterparty, event, .. } => Some((counterparty.clone(), event.payload.clone())),
                               _ => None,
                             })
                             .collect();
  assert_eq!(errors.len(), 1);
  assert_eq!(errors[0].0, bob());
  assert!(matches!(errors[0].1, SessionPayload::Error { .. }));

  let again = h.deliver(FlowEvent::kill(h.flow_id.clone(), "twice"), t0() + Duration::seconds(4));
  assert!(again.outbound_records.is_empty());
  assert_eq!(h.checkpoint().status, CheckpointStatus::Killed);

  // terminal flows ignore late session traffic
  let late = h.data(1, t0() + Duration::seconds(5));
  assert!(late.outbound_records.is_empty());
  assert_eq!(late.stats.fiber_iterations, 0);
}

#[test]
fn cleanup_tombstones_terminal_flows_only() {
  let h = Harness::new(vec![receive("s1"), complete(json!("x"))]);
  h.start();

  // not terminal yet: absorbed
  let early = h.deliver(FlowEvent::cleanup(h.flow_id.clone()), t0() + Duration::seconds(1));
  assert!(early.updated_checkpoint.is_some());
  assert_eq!(h.checkpoint().status, CheckpointStatus::Suspended);

  h.deliver(FlowEvent::kill(h.flow_id.clone(), "stop"), t0() + Duration::seconds(2));
  let tomb = h.deliver(FlowEvent::cleanup(h.flow_id.clone()), t0() + Duration::minutes(11));
  assert!(tomb.updated_checkpoint.is_none());
  assert!(h.store.get(&h.flow_id).unwrap().is_none());

  // already tombstoned: no-op
  let replay = h.deliver(FlowEvent::cleanup(h.flow_id.clone()), t0() + Duration::minutes(12));
  assert!(replay.updated_checkpoint.is_none());
  assert!(replay.outbound_records.is_empty());
}

#[test]
fn duplicate_start_is_absorbed() {
  let h = Harness::new(vec![receive("s1")]);
  h.start();
  let before = h.checkpoint();
  let dup = h.start();
  assert_eq!(dup.stats.fiber_iterations, 0);
  assert!(statuses(&dup).is_empty());
  let after = h.checkpoint();
  assert_eq!(after.status, before.status);
  assert_eq!(after.fiber_state, before.fiber_state);
  assert_eq!(h.resumes().len(), 1);
}

#[test]
fn event_without_checkpoint_is_fatal_and_not_retried() {
  let h = Harness::new(vec![]);
  let result = h.wakeup(t0());
  assert!(result.updated_checkpoint.is_none());
  let status: Vec<_> = result.status_records().cloned().collect();
  assert_eq!(status.len(), 1);
  assert_eq!(status[0].status, FlowStatusKind::Failed);
  assert_eq!(status[0].holding_identity, None);
  assert_eq!(status[0].error.as_ref().unwrap().kind, FailureKind::Fatal);
  assert_eq!(result.wakeup_records().count(), 0);
  assert_eq!(h.runner.created_count(), 0);
}

#[test]
fn send_on_unknown_session_fails_the_flow() {
  let h = Harness::new(vec![Ok(IoRequest::SendMessage { session_id: SessionId::from("ghost"),
                                                        payload: json!(1) })]);
  let result = h.start();
  let cp = result.updated_checkpoint.clone().unwrap();
  assert_eq!(cp.status, CheckpointStatus::Failed);
  assert_eq!(cp.last_error.unwrap().kind, FailureKind::Fatal);
  assert_eq!(statuses(&result), vec![FlowStatusKind::Failed]);
  assert_eq!(h.runner.live_count(), 0);
}

#[test]
fn sent_sequence_numbers_increase_across_invocations() {
  let h = Harness::new(vec![initiate("s1"),
                            Ok(IoRequest::SendMessage { session_id: s1(), payload: json!("a") }),
                            receive("s1"),
                            Ok(IoRequest::SendMessage { session_id: s1(), payload: json!("b") }),
                            Ok(IoRequest::CloseSession { session_id: s1() }),
                            complete(json!(null))]);
  let first = h.start();
  let second = h.data(1, t0() + Duration::seconds(1));
  let seqs: Vec<u64> = first.peer_events()
                            .chain(second.peer_events())
                            .filter_map(|e| e.sequence_num)
                            .collect();
  assert_eq!(seqs, vec![1, 2, 3, 4]);
  // the reply piggybacks the ack, so no explicit ack is sent
  assert!(second.peer_events().all(|e| e.payload != SessionPayload::Ack));
}

#[test]
fn replayed_session_event_does_not_resume() {
  let h = Harness::new(vec![initiate("s1"), receive("s1"), receive("s1")]);
  h.start();
  h.data(1, t0() + Duration::seconds(1));
  let session_before = h.checkpoint().sessions[&s1()].clone();
  let calls_before = h.resumes().len();

  let replay = h.data(1, t0() + Duration::seconds(2));
  assert_eq!(replay.stats.fiber_iterations, 0);
  assert_eq!(h.checkpoint().sessions[&s1()], session_before);
  assert_eq!(h.resumes().len(), calls_before);
}

#[test]
fn every_arrival_order_unblocks_in_sequence() {
  let orders = [[1u64, 2, 3, 4], [4, 3, 2, 1], [2, 1, 4, 3], [3, 1, 4, 2], [1, 3, 2, 4], [4, 1, 2, 3]];
  for order in orders {
    let h = Harness::new(vec![initiate("s1"),
                              receive("s1"),
                              receive("s1"),
                              receive("s1"),
                              receive("s1"),
                              complete(json!("all"))]);
    h.start();
    for (i, seq) in order.iter().enumerate() {
      h.data(*seq, t0() + Duration::seconds(i as i64 + 1));
    }
    let delivered: Vec<u64> = h.resumes()
                               .into_iter()
                               .filter_map(|r| match r {
                                 ResumePayload::SessionMessage { sequence_num, .. } => Some(sequence_num),
                                 _ => None,
                               })
                               .collect();
    assert_eq!(delivered, vec![1, 2, 3, 4], "order {:?}", order);
    assert_eq!(h.checkpoint().status, CheckpointStatus::Completed);
  }
}

#[test]
fn inbound_init_opens_a_session_for_a_waiting_flow() {
  let h = Harness::new(vec![receive("s9"), complete(json!("got it"))]);
  h.start();
  let init = SessionEvent::inbound("s9", Some(1), SessionPayload::Init { counterparty: bob() });
  let opened = h.deliver(FlowEvent::session(h.flow_id.clone(), init), t0() + Duration::seconds(1));
  assert_eq!(opened.stats.fiber_iterations, 0);
  let cp = h.checkpoint();
  assert_eq!(cp.sessions[&SessionId::from("s9")].status, SessionStatus::Confirmed);
  assert_eq!(cp.status, CheckpointStatus::Suspended);
  assert_eq!(opened.peer_events().map(|e| e.payload.clone()).collect::<Vec<_>>(), vec![SessionPayload::Ack]);

  let data = SessionEvent::data("s9", 2, json!("hello"));
  let done = h.deliver(FlowEvent::session(h.flow_id.clone(), data), t0() + Duration::seconds(2));
  assert_eq!(done.updated_checkpoint.unwrap().status, CheckpointStatus::Completed);
  assert!(matches!(h.resumes().last(), Some(ResumePayload::SessionMessage { sequence_num: 2, .. })));
}

#[test]
fn data_ahead_of_init_is_kept_until_the_session_opens() {
  let h = Harness::new(vec![receive("s9"), complete(json!("got it"))]);
  h.start();

  // the transport hands over seq 2 before the peer's Init
  let early = h.deliver(FlowEvent::session(h.flow_id.clone(), SessionEvent::data("s9", 2, json!("hello"))),
                        t0() + Duration::seconds(1));
  assert_eq!(early.stats.fiber_iterations, 0);
  assert!(early.outbound_records.is_empty());
  let cp = h.checkpoint();
  let session = &cp.sessions[&SessionId::from("s9")];
  assert!(session.awaiting_init);
  assert_eq!(session.status, SessionStatus::Created);
  assert_eq!(session.received_sequence_number, 0);
  assert_eq!(session.out_of_order_sequence_numbers.iter().copied().collect::<Vec<_>>(), vec![2]);
  assert!(session.received_messages.contains_key(&2));
  assert_eq!(cp.status, CheckpointStatus::Suspended);

  let init = SessionEvent::inbound("s9", Some(1), SessionPayload::Init { counterparty: bob() });
  let done = h.deliver(FlowEvent::session(h.flow_id.clone(), init), t0() + Duration::seconds(2));
  let cp = done.updated_checkpoint.clone().unwrap();
  assert_eq!(cp.status, CheckpointStatus::Completed);
  let session = &cp.sessions[&SessionId::from("s9")];
  assert!(!session.awaiting_init);
  assert_eq!(session.counterparty, bob());
  assert_eq!(session.received_sequence_number, 2);
  assert!(session.out_of_order_sequence_numbers.is_empty());
  assert!(matches!(h.resumes().last(), Some(ResumePayload::SessionMessage { sequence_num: 2, .. })));
}

#[test]
fn unsequenced_traffic_on_unknown_session_is_discarded() {
  let h = Harness::new(vec![receive("s1")]);
  h.start();
  let ack = SessionEvent::inbound("other", None, SessionPayload::Ack);
  let stray = h.deliver(FlowEvent::session(h.flow_id.clone(), ack), t0() + Duration::seconds(1));
  assert_eq!(stray.stats.fiber_iterations, 0);
  assert!(stray.outbound_records.is_empty());

  let error = SessionEvent::inbound("other", None, SessionPayload::Error { message: "who?".into() });
  h.deliver(FlowEvent::session(h.flow_id.clone(), error), t0() + Duration::seconds(2));
  assert!(h.checkpoint().sessions.is_empty());
}

#[test]
fn peer_close_and_error_resume_a_receive() {
  let h = Harness::new(vec![initiate("s1"), receive("s1"), receive("s1")]);
  h.start();
  h.deliver(FlowEvent::session(h.flow_id.clone(), SessionEvent::inbound("s1", Some(1), SessionPayload::Close)),
            t0() + Duration::seconds(1));
  assert_eq!(h.resumes().last(), Some(&ResumePayload::SessionClosed { session_id: s1() }));

  let h = Harness::new(vec![initiate("s1"), receive("s1"), receive("s1")]);
  h.start();
  let error = SessionEvent::inbound("s1", None, SessionPayload::Error { message: "peer failed".into() });
  h.deliver(FlowEvent::session(h.flow_id.clone(), error), t0() + Duration::seconds(1));
  assert_eq!(h.resumes().last(),
             Some(&ResumePayload::SessionError { session_id: s1(),
                                                 message: "peer failed".into() }));
}
