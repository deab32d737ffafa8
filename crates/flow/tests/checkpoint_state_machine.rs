use chrono::{Duration, TimeZone, Utc};
use flow::{Checkpoint, CheckpointStatus, DirectFiberSource, FiberError, FlowConfig, FlowError, FlowEvent, FlowFailure,
           FlowId, FlowPipeline, HoldingIdentity, IoRequest, PipelineContext, ScriptedFiberRunner, SessionEvent,
           SessionId, StartFlow, WaitingFor};
use serde_json::json;
use std::sync::Arc;

use CheckpointStatus::*;

fn start() -> StartFlow {
  StartFlow { holding_identity: HoldingIdentity::new("O=Alice", "group-1"),
              package_id: "pkg".into(),
              request_id: "req-1".into(),
              args: json!({"n": 1}) }
}

fn checkpoint_in(status: CheckpointStatus) -> Checkpoint {
  let mut cp = Checkpoint::new(FlowId::from("f1"), &start(), Utc::now());
  cp.status = status;
  cp
}

#[test]
fn transition_table_is_exhaustive() {
  let allowed = [(Created, Running),
                 (Running, Suspended),
                 (Suspended, Running),
                 (Running, Retrying),
                 (Retrying, Running),
                 (Running, Completed),
                 (Running, Failed),
                 (Running, Killed),
                 (Suspended, Completed),
                 (Suspended, Failed),
                 (Suspended, Killed),
                 (Retrying, Completed),
                 (Retrying, Failed),
                 (Retrying, Killed)];

  for from in CheckpointStatus::ALL {
    for to in CheckpointStatus::ALL {
      let expected = allowed.contains(&(from, to));
      assert_eq!(from.can_transition_to(to), expected, "{:?} -> {:?}", from, to);
    }
  }
}

#[test]
fn terminal_states_are_final() {
  for terminal in [Completed, Failed, Killed] {
    assert!(terminal.is_terminal());
    for to in CheckpointStatus::ALL {
      if to == terminal {
        continue;
      }
      let mut cp = checkpoint_in(terminal);
      let res = cp.transition_to(to);
      assert!(matches!(res, Err(FlowError::InvalidTransition { .. })), "{:?} -> {:?}", terminal, to);
      assert_eq!(cp.status, terminal);
    }
  }
}

#[test]
fn invalid_transition_leaves_status_untouched() {
  let mut cp = checkpoint_in(Created);
  assert!(cp.transition_to(Suspended).is_err());
  assert_eq!(cp.status, Created);
  cp.transition_to(Running).unwrap();
  // same state is a no-op
  cp.transition_to(Running).unwrap();
  assert_eq!(cp.status, Running);
}

#[test]
fn suspend_sets_waiting_for_and_running_clears_it() {
  let mut cp = checkpoint_in(Running);
  cp.suspend(WaitingFor::SessionMessage { session_id: SessionId::from("s1") }).unwrap();
  assert_eq!(cp.status, Suspended);
  assert_eq!(cp.waiting_for, WaitingFor::SessionMessage { session_id: SessionId::from("s1") });
  cp.transition_to(Running).unwrap();
  assert_eq!(cp.waiting_for, WaitingFor::None);
}

#[test]
fn fail_from_created_goes_through_running() {
  let mut cp = checkpoint_in(Created);
  cp.fail(FlowFailure::fatal("boom"));
  assert_eq!(cp.status, Failed);
  assert_eq!(cp.last_error.as_ref().map(|f| f.message.as_str()), Some("boom"));

  // a terminal checkpoint keeps its first failure
  cp.fail(FlowFailure::business("second"));
  assert_eq!(cp.last_error.unwrap().message, "boom");
}

/// Fixed-seed linear congruential generator.
struct Lcg(u64);

impl Lcg {
  fn next(&mut self) -> u64 {
    self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    self.0 >> 33
  }

  fn below(&mut self, n: u64) -> u64 {
    self.next() % n
  }
}

fn random_request(rng: &mut Lcg, now: chrono::DateTime<Utc>) -> Result<IoRequest, FiberError> {
  let s1 = SessionId::from("s1");
  match rng.below(10) {
    0 | 1 => Ok(IoRequest::SendMessage { session_id: s1, payload: json!(rng.below(100)) }),
    2 | 3 | 4 => Ok(IoRequest::ReceiveMessage { session_id: s1 }),
    5 => Ok(IoRequest::Sleep { until: now + Duration::seconds(rng.below(30) as i64) }),
    6 => Ok(IoRequest::ForceCheckpoint),
    7 => Err(FiberError::Transient("flaky".into())),
    8 => Ok(IoRequest::SubFlowSpawn { name: "child".into() }),
    _ => Ok(IoRequest::Complete { result: json!("ok") }),
  }
}

fn reachable(from: CheckpointStatus, to: CheckpointStatus) -> bool {
  // one invocation may pass through RUNNING before settling
  from == to || from.can_transition_to(to) || (from.can_transition_to(Running) && Running.can_transition_to(to))
}

#[test]
fn random_event_sequences_only_take_legal_transitions() {
  let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
  for seed in 1..=25u64 {
    let mut rng = Lcg(seed);
    let runner = Arc::new(ScriptedFiberRunner::new());
    let flow_id = FlowId::from(format!("flow-{}", seed));
    let mut script = vec![Ok(IoRequest::InitiateSession { session_id: SessionId::from("s1"),
                                                          counterparty: HoldingIdentity::new("O=Bob", "group-1") })];
    for _ in 0..40 {
      script.push(random_request(&mut rng, t0));
    }
    runner.script(flow_id.clone(), script);
    let pipeline = FlowPipeline::new(Arc::new(DirectFiberSource::new(runner.clone())));
    let config = FlowConfig { max_loop_iterations: 5,
                              max_retries: 2,
                              ..FlowConfig::default() };

    let mut checkpoint: Option<Checkpoint> = None;
    let mut now = t0;
    for step in 0..60 {
      now = now + Duration::seconds(rng.below(5) as i64);
      let event = match (step, rng.below(7)) {
        (0, _) => FlowEvent::start(flow_id.clone(), start()),
        (_, 0) | (_, 1) | (_, 2) => FlowEvent::session(flow_id.clone(),
                                                       SessionEvent::data("s1", 1 + rng.below(8), json!(step))),
        (_, 3) | (_, 4) => FlowEvent::wakeup(flow_id.clone()),
        (_, 5) => FlowEvent::start(flow_id.clone(), start()),
        _ if rng.below(10) == 0 => FlowEvent::kill(flow_id.clone(), "operator"),
        _ => FlowEvent::wakeup(flow_id.clone()),
      };
      let before = checkpoint.as_ref().map(|c| c.status);
      let ctx = PipelineContext::new(config.clone(), now);
      let result = pipeline.process(checkpoint.take(), &event, &ctx);
      checkpoint = result.updated_checkpoint;

      if let (Some(before), Some(after)) = (before, checkpoint.as_ref().map(|c| c.status)) {
        assert!(reachable(before, after), "seed {} step {}: {:?} -> {:?}", seed, step, before, after);
        if before.is_terminal() {
          assert_eq!(before, after, "seed {} step {}: left terminal state", seed, step);
        }
      }
      if let Some(cp) = checkpoint.as_ref() {
        if cp.status == Suspended {
          assert_ne!(cp.waiting_for, WaitingFor::None, "seed {} step {}: suspended without waiting_for", seed, step);
        }
      }
    }
    assert_eq!(runner.overlap_count(), 0);
    assert_eq!(runner.live_count(), 0, "seed {}: fibers leaked", seed);
  }
}
