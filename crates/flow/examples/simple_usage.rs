use chrono::{Duration, Utc};
use flow::errors::FlowError;
use flow::stubs::InMemoryCheckpointStore;
use flow::{CheckpointStore, DirectFiberSource, FlowConfig, FlowEvent, FlowId, FlowPipeline, HoldingIdentity, IoRequest,
           PipelineContext, ScriptedFiberRunner, SessionEvent, SessionId, StartFlow};
use serde_json::json;
use std::sync::Arc;

fn main() -> Result<(), FlowError> {
    // Runner guionizado y store en memoria
    let runner = Arc::new(ScriptedFiberRunner::new());
    let pipeline = FlowPipeline::new(Arc::new(DirectFiberSource::new(runner.clone())));
    let store = InMemoryCheckpointStore::new();
    let config = FlowConfig::default();

    let flow_id = FlowId::from("example");
    let session = SessionId::from("s1");
    runner.script(flow_id.clone(),
                  vec![Ok(IoRequest::InitiateSession { session_id: session.clone(),
                                                       counterparty: HoldingIdentity::new("O=Bob", "g1") }),
                       Ok(IoRequest::SendMessage { session_id: session.clone(),
                                                   payload: json!({"ping": 1}) }),
                       Ok(IoRequest::ReceiveMessage { session_id: session.clone() }),
                       Ok(IoRequest::Complete { result: json!("pong received") })]);

    let start = StartFlow { holding_identity: HoldingIdentity::new("O=Alice", "g1"),
                            package_id: "ping-pong".into(),
                            request_id: "req-1".into(),
                            args: json!({}) };
    // El par responde fuera de orden: primero el 2, después el 1
    let events = vec![FlowEvent::start(flow_id.clone(), start),
                      FlowEvent::session(flow_id.clone(), SessionEvent::data(session.clone(), 2, json!("late"))),
                      FlowEvent::session(flow_id.clone(), SessionEvent::data(session.clone(), 1, json!({"pong": 1})))];

    let mut now = Utc::now();
    for event in events {
        let ctx = PipelineContext::new(config.clone(), now);
        let result = pipeline.process(store.get(&flow_id)?, &event, &ctx);
        println!("event {:?} -> {} records, {} iterations",
                 event.payload.kind(),
                 result.outbound_records.len(),
                 result.stats.fiber_iterations);
        for status in result.status_records() {
            println!("  status {:?}", status.status);
        }
        match result.updated_checkpoint {
            Some(checkpoint) => {
                println!("  checkpoint {:?} waiting_for {:?}", checkpoint.status, checkpoint.waiting_for);
                store.put(checkpoint)?;
            }
            None => store.remove(&flow_id)?,
        }
        now += Duration::seconds(1);
    }

    if let Some(checkpoint) = store.get(&flow_id)? {
        println!("\nresult: {:?}", checkpoint.result);
    }
    Ok(())
}
