mod common;

use common::*;
use serde_json::json;
use streamflow_core::bpmn::USER_TASK_JOB_TYPE;
use streamflow_core::record::*;
use streamflow_core::types::Key;
use streamflow_core::{CommandResponse, EngineHarness};

const APPROVAL: &str = r#"
kind: process
id: approval
nodes:
  - type: start_event
    id: start
  - type: user_task
    id: approve
    task_listeners:
      - event_type: creating
        job_type: prepare
      - event_type: completing
        job_type: audit
        retries: "1"
  - type: end_event
    id: end
flows:
  - from: start
    to: approve
  - from: approve
    to: end
"#;

async fn started() -> EngineHarness {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("<default>", &[("approval.yaml", APPROVAL)]).await);
    expect_event(harness.create_instance("approval", "<default>", Variables::new()).await);
    harness
}

async fn jobs_of_type(harness: &EngineHarness, job_type: &str) -> Vec<(Key, JobRecord)> {
    created_jobs(harness, 1)
        .await
        .into_iter()
        .filter(|(_, job)| job.job_type == job_type)
        .collect()
}

async fn last_job_of_type(harness: &EngineHarness, job_type: &str) -> Key {
    jobs_of_type(harness, job_type).await.last().map(|(key, _)| *key).expect("job created")
}

async fn deny(harness: &mut EngineHarness, job_key: Key) -> CommandResponse {
    let job = JobRecord {
        result: JobResult {
            denied: true,
            denied_reason: "missing signature".to_string(),
        },
        ..Default::default()
    };
    harness.execute(Record::command(JobIntent::Complete, job).with_key(job_key)).await
}

#[tokio::test]
async fn listeners_surround_the_user_task_job() {
    let mut harness = started().await;

    let created = created_jobs(&harness, 1).await;
    assert_eq!(created.len(), 1, "the creating listener runs first");
    let (prepare, job) = &created[0];
    assert_eq!(job.job_kind, JobKind::TaskListener);
    assert_eq!(job.listener_event_type, JobListenerEventType::Creating);
    expect_event(harness.complete_job(*prepare, Variables::new()).await);

    let task_job = last_job_of_type(&harness, USER_TASK_JOB_TYPE).await;
    expect_event(harness.complete_job(task_job, vars(&[("approved", json!(true))])).await);

    let audits = jobs_of_type(&harness, "audit").await;
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].1.listener_event_type, JobListenerEventType::Completing);
    assert!(
        variable_values(&harness, 1, "approved").await.is_empty(),
        "variables wait for the completing listeners"
    );

    expect_event(harness.complete_job(audits[0].0, Variables::new()).await);
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"approval".to_string()), "completed: {completed:?}");
    assert_eq!(variable_values(&harness, 1, "approved").await, vec![json!(true)]);
}

#[tokio::test]
async fn denied_completion_reopens_the_user_task() {
    let mut harness = started().await;
    let prepare = last_job_of_type(&harness, "prepare").await;
    expect_event(harness.complete_job(prepare, Variables::new()).await);
    let task_job = last_job_of_type(&harness, USER_TASK_JOB_TYPE).await;
    expect_event(harness.complete_job(task_job, vars(&[("approved", json!(true))])).await);

    let audit = last_job_of_type(&harness, "audit").await;
    expect_event(deny(&mut harness, audit).await);

    assert_eq!(jobs_of_type(&harness, USER_TASK_JOB_TYPE).await.len(), 2, "a new job for the task");
    assert_eq!(jobs_of_type(&harness, "prepare").await.len(), 1, "creating listeners do not run again");
    assert!(variable_values(&harness, 1, "approved").await.is_empty());
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(!completed.contains(&"approve".to_string()));

    let task_job = last_job_of_type(&harness, USER_TASK_JOB_TYPE).await;
    expect_event(harness.complete_job(task_job, vars(&[("approved", json!(false))])).await);
    let audit = last_job_of_type(&harness, "audit").await;
    expect_event(harness.complete_job(audit, Variables::new()).await);

    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"approval".to_string()), "completed: {completed:?}");
    assert_eq!(variable_values(&harness, 1, "approved").await, vec![json!(false)]);
}

#[tokio::test]
async fn listener_jobs_cannot_carry_variables() {
    let mut harness = started().await;
    let prepare = last_job_of_type(&harness, "prepare").await;

    let rejection = expect_rejection(
        harness.complete_job(prepare, vars(&[("x", json!(1))])).await,
        RejectionType::InvalidArgument,
    );
    assert!(
        rejection
            .rejection_reason
            .contains("Task Listener job completion with variables payload provided is not yet supported"),
        "{}",
        rejection.rejection_reason
    );
}

#[tokio::test]
async fn only_completing_listeners_may_deny() {
    let mut harness = started().await;
    let prepare = last_job_of_type(&harness, "prepare").await;
    expect_rejection(deny(&mut harness, prepare).await, RejectionType::InvalidArgument);

    expect_event(harness.complete_job(prepare, Variables::new()).await);
    let task_job = last_job_of_type(&harness, USER_TASK_JOB_TYPE).await;
    expect_rejection(deny(&mut harness, task_job).await, RejectionType::InvalidArgument);
}

#[tokio::test]
async fn failing_listener_without_retries_raises_a_task_listener_incident() {
    let mut harness = started().await;
    let prepare = last_job_of_type(&harness, "prepare").await;
    let failed = JobRecord {
        retries: 0,
        error_message: "no printer".to_string(),
        ..Default::default()
    };
    expect_event(harness.execute(Record::command(JobIntent::Fail, failed).with_key(prepare)).await);

    let records = harness.records(1).await.unwrap();
    let incident = records
        .iter()
        .filter(|record| record.is_event() && record.intent == Intent::Incident(IncidentIntent::Created))
        .find_map(|record| record.value_as::<IncidentRecord>())
        .expect("incident raised");
    assert_eq!(incident.error_type, ErrorType::TaskListenerNoRetries);
    assert_eq!(incident.job_key, prepare);
    assert_eq!(incident.error_message, "no printer");
}
