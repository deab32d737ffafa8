// Archivo: main.rs
// Propósito: worker de demostración. Levanta un `FlowExecutor` sobre el log
// en memoria con un runner guionizado, arranca tres flows (intercambio de
// sesión, sleep y fallo transitorio) y espera a que terminen.
use anyhow::{anyhow, Context};
use chrono::Utc;
use flow::{FiberError, FlowEvent, FlowId, FlowStatusKind, HoldingIdentity, IoRequest, ScriptedFiberRunner, SessionEvent,
           SessionId, StartFlow};
use flow_executor::{ExecutorConfig, FlowExecutor, InMemoryEventLog, PartitionId};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn start_for(holder: &HoldingIdentity, package_id: &str, args: serde_json::Value) -> StartFlow {
    StartFlow { holding_identity: holder.clone(),
                package_id: package_id.to_string(),
                request_id: Uuid::new_v4().to_string(),
                args }
}

fn is_terminal(kind: FlowStatusKind) -> bool {
    matches!(kind, FlowStatusKind::Completed | FlowStatusKind::Failed | FlowStatusKind::Killed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ExecutorConfig::from_env().context("configuración del executor")?;
    let log = Arc::new(InMemoryEventLog::new(config.partition_count));
    let runner = Arc::new(ScriptedFiberRunner::new());
    let partitions: Vec<PartitionId> = (0..config.partition_count).map(PartitionId).collect();

    let alice = HoldingIdentity::new("O=Alice, L=London", "demo-group");
    let bob = HoldingIdentity::new("O=Bob, L=Paris", "demo-group");
    let session = SessionId::from(format!("session-{}", Uuid::new_v4()));

    let trade = FlowId::random();
    runner.script(trade.clone(),
                  vec![Ok(IoRequest::InitiateSession { session_id: session.clone(),
                                                       counterparty: bob.clone() }),
                       Ok(IoRequest::SendMessage { session_id: session.clone(),
                                                   payload: json!({"offer": 100}) }),
                       Ok(IoRequest::ReceiveMessage { session_id: session.clone() }),
                       Ok(IoRequest::CloseSession { session_id: session.clone() }),
                       Ok(IoRequest::Complete { result: json!({"agreed": true}) })]);

    let sleeper = FlowId::random();
    runner.script(sleeper.clone(),
                  vec![Ok(IoRequest::Sleep { until: Utc::now() + chrono::Duration::milliseconds(250) }),
                       Ok(IoRequest::Complete { result: json!("rested") })]);

    let flaky = FlowId::random();
    runner.script(flaky.clone(),
                  vec![Err(FiberError::Transient("servicio externo no disponible".into())),
                       Ok(IoRequest::Complete { result: json!(42) })]);

    let executor = FlowExecutor::new(config, log.clone(), runner.clone())?;
    executor.on_partitions_assigned(&partitions).await?;

    log.send(FlowEvent::start(trade.clone(), start_for(&alice, "trade", json!({"amount": 100})))).await?;
    log.send(FlowEvent::start(sleeper.clone(), start_for(&alice, "sleep", json!({})))).await?;
    log.send(FlowEvent::start(flaky.clone(), start_for(&alice, "flaky", json!({})))).await?;

    // la contraparte responde por la misma sesión
    log.send(FlowEvent::session(trade.clone(), SessionEvent::data(session.clone(), 1, json!({"accept": true}))))
       .await?;

    let flows = [trade, sleeper, flaky];
    let finished = log.wait_until(Duration::from_secs(10), |l| {
                          flows.iter().all(|id| l.statuses_for(id).iter().any(|s| is_terminal(s.status)))
                      })
                      .await;

    for id in &flows {
        for status in log.statuses_for(id) {
            println!("{}", serde_json::to_string(&status)?);
        }
    }
    log::info!("demo_outbound_records total={}", log.published().len());

    executor.stop().await?;
    if !finished {
        return Err(anyhow!("los flows no terminaron a tiempo"));
    }
    Ok(())
}
