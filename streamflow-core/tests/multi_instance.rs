mod common;

use common::*;
use serde_json::json;
use streamflow_core::record::*;
use streamflow_core::EngineHarness;

fn review_process(sequential: bool, completion_condition: Option<&str>) -> String {
    let condition = completion_condition
        .map(|condition| format!("      completion_condition: \"{condition}\"\n"))
        .unwrap_or_default();
    format!(
        r#"
kind: process
id: review
nodes:
  - type: start_event
    id: start
  - type: service_task
    id: check
    job_type: check
    multi_instance:
      sequential: {sequential}
      input_collection: =reviewers
      input_element: reviewer
      output_collection: verdicts
      output_element: =verdict
{condition}  - type: end_event
    id: end
flows:
  - from: start
    to: check
  - from: check
    to: end
"#
    )
}

async fn started(process: &str, reviewers: serde_json::Value) -> EngineHarness {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("<default>", &[("review.yaml", process)]).await);
    expect_event(
        harness
            .create_instance("review", "<default>", vars(&[("reviewers", reviewers)]))
            .await,
    );
    harness
}

async fn complete_with_verdict(harness: &mut EngineHarness, job_key: i64, verdict: &str) {
    expect_event(harness.complete_job(job_key, vars(&[("verdict", json!(verdict))])).await);
}

#[tokio::test]
async fn parallel_instances_collect_outputs_in_item_order() {
    let mut harness = started(&review_process(false, None), json!(["ann", "bob", "cy"])).await;

    let jobs = created_jobs(&harness, 1).await;
    assert_eq!(jobs.len(), 3, "one job per reviewer");
    assert_eq!(
        variable_values(&harness, 1, "reviewer").await,
        vec![json!("ann"), json!("bob"), json!("cy")]
    );
    assert_eq!(
        variable_values(&harness, 1, "loopCounter").await,
        vec![json!(1), json!(2), json!(3)]
    );

    for ((job_key, _), verdict) in jobs.iter().rev().zip(["no", "maybe", "yes"]) {
        complete_with_verdict(&mut harness, *job_key, verdict).await;
    }

    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert_eq!(completed.iter().filter(|id| *id == "check").count(), 4, "three inner instances and the body");
    assert!(completed.contains(&"review".to_string()), "completed: {completed:?}");
    let verdicts = variable_values(&harness, 1, "verdicts").await;
    assert_eq!(verdicts.first(), Some(&json!([null, null, null])));
    assert_eq!(verdicts.last(), Some(&json!(["yes", "maybe", "no"])));
}

#[tokio::test]
async fn sequential_instances_run_one_after_another() {
    let mut harness = started(&review_process(true, None), json!(["ann", "bob"])).await;

    let jobs = created_jobs(&harness, 1).await;
    assert_eq!(jobs.len(), 1);
    complete_with_verdict(&mut harness, jobs[0].0, "yes").await;

    let jobs = created_jobs(&harness, 1).await;
    assert_eq!(jobs.len(), 2, "the second item starts after the first completed");
    assert_eq!(variable_values(&harness, 1, "reviewer").await, vec![json!("ann"), json!("bob")]);
    complete_with_verdict(&mut harness, jobs[1].0, "no").await;

    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"review".to_string()), "completed: {completed:?}");
    assert_eq!(variable_values(&harness, 1, "verdicts").await.last(), Some(&json!(["yes", "no"])));
}

#[tokio::test]
async fn completion_condition_terminates_remaining_instances() {
    let process = review_process(false, Some("=numberOfCompletedInstances >= 2"));
    let mut harness = started(&process, json!(["ann", "bob", "cy"])).await;
    let jobs = created_jobs(&harness, 1).await;

    complete_with_verdict(&mut harness, jobs[0].0, "yes").await;
    assert!(elements_with(&harness, 1, ProcessInstanceIntent::ElementTerminated).await.is_empty());
    complete_with_verdict(&mut harness, jobs[1].0, "yes").await;

    let terminated = elements_with(&harness, 1, ProcessInstanceIntent::ElementTerminated).await;
    assert_eq!(terminated, vec!["check".to_string()]);
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"review".to_string()), "completed: {completed:?}");
    assert!(harness.state(1).unwrap().jobs.is_empty());
}

#[tokio::test]
async fn empty_collection_completes_the_body_at_once() {
    let harness = started(&review_process(false, None), json!([])).await;

    assert!(created_jobs(&harness, 1).await.is_empty());
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"review".to_string()), "completed: {completed:?}");
    assert_eq!(variable_values(&harness, 1, "verdicts").await.last(), Some(&json!([])));
}

#[tokio::test]
async fn input_collection_must_be_an_array() {
    let harness = started(&review_process(false, None), json!("ann")).await;

    let records = harness.records(1).await.unwrap();
    let incident = records
        .iter()
        .filter(|record| record.is_event() && record.intent == Intent::Incident(IncidentIntent::Created))
        .find_map(|record| record.value_as::<IncidentRecord>())
        .expect("incident raised");
    assert_eq!(incident.error_type, ErrorType::ExtractValueError);
    assert_eq!(incident.element_id, "check");
    assert!(created_jobs(&harness, 1).await.is_empty());
}
