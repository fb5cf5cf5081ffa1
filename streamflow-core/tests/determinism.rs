mod common;

use common::*;
use serde_json::json;
use std::time::Duration;
use streamflow_core::record::*;
use streamflow_core::state::ProcessingState;
use streamflow_core::{EngineConfig, EngineHarness};

const ORDER: &str = r#"
kind: process
id: order
nodes:
  - type: start_event
    id: start
  - type: service_task
    id: check
    job_type: check
    multi_instance:
      input_collection: =items
      input_element: item
  - type: intermediate_message_catch
    id: paid
    message:
      name: paid
      correlation_key: =orderId
  - type: end_event
    id: end
flows:
  - from: start
    to: check
  - from: check
    to: paid
  - from: paid
    to: end
"#;

/// Runs a fixed command sequence on a fresh three partition cluster and
/// returns every log and the final state of every partition.
async fn run() -> (Vec<Vec<Record>>, Vec<ProcessingState>) {
    let mut harness = EngineHarness::new(EngineConfig {
        partition_count: 3,
        ..Default::default()
    })
    .await
    .unwrap();
    expect_event(
        harness
            .deploy(
                "<default>",
                &[("order.yaml", ORDER), ("timeout.yaml", BOUNDARY_TIMER), ("p.yaml", SERVICE_TASK)],
            )
            .await,
    );
    for n in 0..4 {
        let variables = vars(&[("items", json!([1, 2])), ("orderId", json!(format!("o-{n}")))]);
        expect_event(harness.create_instance("order", "<default>", variables).await);
    }
    expect_event(harness.create_instance("timeout", "<default>", Variables::new()).await);
    expect_event(harness.create_instance("P", "<default>", Variables::new()).await);

    for _ in 0..3 {
        let batch = expect_event(harness.activate_jobs("check", 3, 30_000, &[]).await);
        for job_key in job_keys(&batch) {
            expect_event(harness.complete_job(job_key, Variables::new()).await);
        }
    }
    for n in 0..4 {
        expect_event(
            harness
                .publish_message("paid", &format!("o-{n}"), Duration::from_secs(5), Variables::new())
                .await,
        );
    }
    expect_event(harness.activate_jobs("test", 1, 10_000, &[]).await);
    harness.advance_time(Duration::from_secs(61)).await.unwrap();

    let mut logs = Vec::new();
    let mut states = Vec::new();
    for partition_id in harness.config().partition_ids() {
        logs.push(harness.records(partition_id).await.unwrap());
        states.push(harness.state(partition_id).unwrap().clone());
    }
    (logs, states)
}

#[tokio::test]
async fn same_commands_produce_the_same_records() {
    let (first_logs, first_states) = run().await;
    let (second_logs, second_states) = run().await;

    assert!(first_logs.iter().all(|log| !log.is_empty()));
    for (partition, (first, second)) in first_logs.iter().zip(&second_logs).enumerate() {
        assert_eq!(first.len(), second.len(), "partition {}", partition + 1);
        for (a, b) in first.iter().zip(second) {
            assert_eq!(a, b, "partition {} position {}", partition + 1, a.position);
        }
    }
    assert_eq!(first_states, second_states);
}
