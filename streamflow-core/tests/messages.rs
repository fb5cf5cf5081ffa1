mod common;

use common::*;
use serde_json::json;
use std::time::Duration;
use streamflow_core::config::EngineConfig;
use streamflow_core::record::*;
use streamflow_core::types::{decode_partition_id, subscription_partition};
use streamflow_core::EngineHarness;

const PAYMENT: &str = r#"
kind: process
id: payment
nodes:
  - type: start_event
    id: start
  - type: intermediate_message_catch
    id: wait
    message:
      name: paid
      correlation_key: =orderId
  - type: end_event
    id: end
flows:
  - from: start
    to: wait
  - from: wait
    to: end
"#;

const CANCELABLE: &str = r#"
kind: process
id: shipping
nodes:
  - type: start_event
    id: start
  - type: service_task
    id: ship
    job_type: ship
  - type: boundary_event
    id: canceled
    attached_to: ship
    message:
      name: cancel
      correlation_key: =orderId
  - type: boundary_event
    id: reminded
    attached_to: ship
    cancel_activity: false
    message:
      name: remind
      correlation_key: =orderId
  - type: end_event
    id: shipped
  - type: end_event
    id: aborted
  - type: end_event
    id: noted
flows:
  - from: start
    to: ship
  - from: ship
    to: shipped
  - from: canceled
    to: aborted
  - from: reminded
    to: noted
"#;

const MESSAGE_START: &str = r#"
kind: process
id: fulfillment
nodes:
  - type: start_event
    id: placed
    message:
      name: order-placed
  - type: service_task
    id: pack
    job_type: pack
  - type: end_event
    id: end
flows:
  - from: placed
    to: pack
  - from: pack
    to: end
"#;

fn order(id: &str) -> Variables {
    vars(&[("orderId", json!(id))])
}

async fn payment_harness() -> EngineHarness {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("<default>", &[("payment.yaml", PAYMENT)]).await);
    harness
}

#[tokio::test]
async fn published_message_completes_the_waiting_catch_event() {
    let mut harness = payment_harness().await;
    expect_event(harness.create_instance("payment", "<default>", order("o-1")).await);

    let published = expect_event(
        harness
            .publish_message("paid", "o-1", Duration::ZERO, vars(&[("amount", json!(10))]))
            .await,
    );
    assert_eq!(published.intent, Intent::Message(MessageIntent::Published));

    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"wait".to_string()), "completed: {completed:?}");
    assert!(completed.contains(&"payment".to_string()), "completed: {completed:?}");
    assert_eq!(variable_values(&harness, 1, "amount").await, vec![json!(10)]);

    let state = harness.state(1).unwrap();
    assert!(state.messages.is_empty(), "a message without time to live is not buffered");
    assert!(state.message_subscriptions.is_empty());
}

#[tokio::test]
async fn buffered_message_correlates_once_per_process() {
    let mut harness = payment_harness().await;
    expect_event(
        harness
            .publish_message("paid", "o-1", Duration::from_secs(60), Variables::new())
            .await,
    );

    expect_event(harness.create_instance("payment", "<default>", order("o-1")).await);
    expect_event(harness.create_instance("payment", "<default>", order("o-1")).await);

    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert_eq!(completed.iter().filter(|id| *id == "wait").count(), 1, "completed: {completed:?}");
    assert_eq!(harness.state(1).unwrap().message_subscriptions.len(), 1);

    expect_event(harness.publish_message("paid", "o-1", Duration::ZERO, Variables::new()).await);
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert_eq!(completed.iter().filter(|id| *id == "wait").count(), 2, "completed: {completed:?}");
}

#[tokio::test]
async fn message_expires_after_its_time_to_live() {
    let mut harness = payment_harness().await;
    expect_event(
        harness
            .publish_message("paid", "o-9", Duration::from_secs(10), Variables::new())
            .await,
    );
    assert_eq!(harness.state(1).unwrap().messages.len(), 1);

    harness.advance_time(Duration::from_secs(10)).await.unwrap();
    let expired = Intent::Message(MessageIntent::Expired);
    assert_eq!(count_of(&harness, 1, expired, RecordType::Event).await, 1);
    assert!(harness.state(1).unwrap().messages.is_empty());

    expect_event(harness.create_instance("payment", "<default>", order("o-9")).await);
    let correlated = Intent::MessageSubscription(MessageSubscriptionIntent::Correlated);
    assert_eq!(count_of(&harness, 1, correlated, RecordType::Event).await, 0);
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(!completed.contains(&"wait".to_string()));
}

#[tokio::test]
async fn message_ids_are_unique_while_buffered() {
    let mut harness = payment_harness().await;
    let message = MessageRecord {
        name: "paid".to_string(),
        correlation_key: "o-1".to_string(),
        time_to_live: 60_000,
        message_id: "m-1".to_string(),
        ..Default::default()
    };
    expect_event(harness.execute(Record::command(MessageIntent::Publish, message.clone())).await);
    expect_rejection(
        harness.execute(Record::command(MessageIntent::Publish, message)).await,
        RejectionType::AlreadyExists,
    );
}

#[tokio::test]
async fn correlation_key_must_be_a_string_or_number() {
    let mut harness = payment_harness().await;
    expect_event(
        harness
            .create_instance("payment", "<default>", vars(&[("orderId", json!({"id": 1}))]))
            .await,
    );
    let created = Intent::Incident(IncidentIntent::Created);
    assert_eq!(count_of(&harness, 1, created, RecordType::Event).await, 1);
}

#[tokio::test]
async fn interrupting_boundary_message_terminates_its_host() {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("<default>", &[("shipping.yaml", CANCELABLE)]).await);
    let created = expect_event(harness.create_instance("shipping", "<default>", order("o-1")).await);
    let pik = process_instance_key(&created);
    assert_eq!(
        harness.state(1).unwrap().process_message_subscriptions.of_process_instance(pik).len(),
        2
    );

    expect_event(harness.publish_message("cancel", "o-1", Duration::ZERO, Variables::new()).await);

    let terminated = elements_with(&harness, 1, ProcessInstanceIntent::ElementTerminated).await;
    assert_eq!(terminated, vec!["ship".to_string()]);
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"aborted".to_string()), "completed: {completed:?}");
    let state = harness.state(1).unwrap();
    assert!(state.process_message_subscriptions.of_process_instance(pik).is_empty());
    assert!(state.message_subscriptions.is_empty());
    assert!(state.jobs.is_empty());
}

#[tokio::test]
async fn non_interrupting_boundary_message_keeps_its_host_waiting() {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("<default>", &[("shipping.yaml", CANCELABLE)]).await);
    expect_event(harness.create_instance("shipping", "<default>", order("o-1")).await);

    for _ in 0..2 {
        expect_event(harness.publish_message("remind", "o-1", Duration::ZERO, Variables::new()).await);
    }
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert_eq!(completed.iter().filter(|id| *id == "noted").count(), 2, "completed: {completed:?}");
    assert!(elements_with(&harness, 1, ProcessInstanceIntent::ElementTerminated).await.is_empty());

    let batch = expect_event(harness.activate_jobs("ship", 1, 60_000, &["<default>"]).await);
    expect_event(harness.complete_job(job_keys(&batch)[0], Variables::new()).await);
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"shipping".to_string()), "completed: {completed:?}");
    assert!(harness.state(1).unwrap().message_subscriptions.is_empty());
}

#[tokio::test]
async fn message_start_event_waits_for_the_running_instance_of_its_correlation_key() {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("<default>", &[("fulfillment.yaml", MESSAGE_START)]).await);
    let subscriptions = &harness.state(1).unwrap().message_start_subscriptions;
    assert_eq!(subscriptions.subscriptions("<default>", "order-placed").len(), 1);

    let ttl = Duration::from_secs(60);
    expect_event(harness.publish_message("order-placed", "o-1", ttl, vars(&[("n", json!(1))])).await);
    expect_event(harness.publish_message("order-placed", "o-1", ttl, vars(&[("n", json!(2))])).await);
    expect_event(harness.publish_message("order-placed", "o-2", ttl, vars(&[("n", json!(3))])).await);

    let started = |activated: Vec<String>| activated.iter().filter(|id| *id == "fulfillment").count();
    let activated = elements_with(&harness, 1, ProcessInstanceIntent::ElementActivated).await;
    assert_eq!(started(activated), 2, "one instance per correlation key");
    assert_eq!(variable_values(&harness, 1, "n").await, vec![json!(1), json!(3)]);

    let batch = expect_event(harness.activate_jobs("pack", 2, 60_000, &["<default>"]).await);
    for job_key in job_keys(&batch) {
        expect_event(harness.complete_job(job_key, Variables::new()).await);
    }

    let activated = elements_with(&harness, 1, ProcessInstanceIntent::ElementActivated).await;
    assert_eq!(started(activated), 3, "the buffered message starts the next instance");
    assert_eq!(variable_values(&harness, 1, "n").await, vec![json!(1), json!(3), json!(2)]);
}

#[tokio::test]
async fn message_reaches_an_instance_on_another_partition() {
    let config = EngineConfig {
        partition_count: 3,
        ..Default::default()
    };
    let mut harness = EngineHarness::new(config).await.unwrap();
    expect_event(harness.deploy("<default>", &[("payment.yaml", PAYMENT)]).await);

    let correlation_key = (0..32)
        .map(|n| format!("o-{n}"))
        .find(|key| subscription_partition(key, 3) != 1)
        .unwrap();
    let message_partition = subscription_partition(&correlation_key, 3);
    let creation = ProcessInstanceCreationRecord {
        bpmn_process_id: "payment".to_string(),
        variables: order(&correlation_key),
        tenant_id: "<default>".to_string(),
        ..Default::default()
    };
    let created = expect_event(
        harness
            .execute_on(1, Record::command(ProcessInstanceCreationIntent::Create, creation))
            .await,
    );
    assert_eq!(decode_partition_id(process_instance_key(&created)), 1);

    let opened = Intent::MessageSubscription(MessageSubscriptionIntent::Created);
    assert_eq!(count_of(&harness, message_partition, opened, RecordType::Event).await, 1);

    expect_event(
        harness
            .publish_message("paid", &correlation_key, Duration::ZERO, Variables::new())
            .await,
    );
    let correlated = Intent::ProcessMessageSubscription(ProcessMessageSubscriptionIntent::Correlated);
    assert_eq!(count_of(&harness, 1, correlated, RecordType::Event).await, 1);
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"payment".to_string()), "completed: {completed:?}");
}
