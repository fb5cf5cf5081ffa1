mod common;

use common::*;
use std::time::Duration;
use streamflow_core::job::lifecycle::JobState;
use streamflow_core::record::*;
use streamflow_core::EngineHarness;

async fn one_job() -> EngineHarness {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("<default>", &[("p.yaml", SERVICE_TASK)]).await);
    expect_event(harness.create_instance("P", "<default>", Variables::new()).await);
    harness
}

#[tokio::test]
async fn an_activated_job_is_held_by_one_worker_until_its_deadline() {
    let mut harness = one_job().await;

    let first = expect_event(harness.activate_jobs("test", 5, 60_000, &[]).await);
    let keys = job_keys(&first);
    assert_eq!(keys.len(), 1);
    let job_key = keys[0];
    let batch = first.value_as::<JobBatchRecord>().unwrap();
    assert_eq!(batch.jobs[0].deadline, harness.now() + 60_000);
    assert!(!batch.truncated);

    let second = expect_event(harness.activate_jobs("test", 5, 60_000, &[]).await);
    assert!(job_keys(&second).is_empty());

    harness.advance_time(Duration::from_secs(60)).await.unwrap();
    let job = harness.state(1).unwrap().jobs.get(job_key).unwrap();
    assert_eq!(job.state, JobState::Activatable);
    assert_eq!(
        count_of(&harness, 1, Intent::Job(JobIntent::TimedOut), RecordType::Event).await,
        1
    );

    let third = expect_event(harness.activate_jobs("test", 5, 60_000, &[]).await);
    assert_eq!(job_keys(&third), vec![job_key]);
}

#[tokio::test]
async fn failed_job_without_retries_raises_an_incident() {
    let mut harness = one_job().await;
    let batch = expect_event(harness.activate_jobs("test", 1, 60_000, &[]).await);
    let job_key = job_keys(&batch)[0];

    let fail = Record::command(
        JobIntent::Fail,
        JobRecord {
            retries: 0,
            error_message: "boom".to_string(),
            ..Default::default()
        },
    )
    .with_key(job_key);
    expect_event(harness.execute(fail).await);

    let records = harness.records(1).await.unwrap();
    let incident = records
        .iter()
        .filter(|record| record.intent == Intent::Incident(IncidentIntent::Created))
        .find_map(|record| record.value_as::<IncidentRecord>())
        .expect("incident created");
    assert_eq!(incident.error_type, ErrorType::JobNoRetries);
    assert_eq!(incident.error_message, "boom");
    assert_eq!(incident.job_key, job_key);
}

#[tokio::test]
async fn failed_job_is_retried_after_its_backoff() {
    let mut harness = one_job().await;
    let batch = expect_event(harness.activate_jobs("test", 1, 60_000, &[]).await);
    let job_key = job_keys(&batch)[0];

    let fail = Record::command(
        JobIntent::Fail,
        JobRecord {
            retries: 2,
            retry_backoff: 5_000,
            ..Default::default()
        },
    )
    .with_key(job_key);
    expect_event(harness.execute(fail).await);
    let waiting = expect_event(harness.activate_jobs("test", 1, 60_000, &[]).await);
    assert!(job_keys(&waiting).is_empty());

    harness.advance_time(Duration::from_secs(5)).await.unwrap();
    let again = expect_event(harness.activate_jobs("test", 1, 60_000, &[]).await);
    assert_eq!(job_keys(&again), vec![job_key]);
    assert_eq!(again.value_as::<JobBatchRecord>().unwrap().jobs[0].retries, 2);
}

fn complete_as(worker: &str, job_key: i64) -> Record {
    Record::command(
        JobIntent::Complete,
        JobRecord {
            worker: worker.to_string(),
            ..Default::default()
        },
    )
    .with_key(job_key)
}

#[tokio::test]
async fn only_the_assigned_worker_acts_on_an_activated_job() {
    let mut harness = one_job().await;
    let batch = expect_event(harness.activate_jobs("test", 1, 60_000, &[]).await);
    let job_key = job_keys(&batch)[0];

    let rejection = expect_rejection(
        harness.execute(complete_as("intruder", job_key)).await,
        RejectionType::InvalidState,
    );
    assert_eq!(
        rejection.rejection_reason,
        format!("Expected to complete job with key '{job_key}' as worker 'intruder', but it is activated by worker 'harness'")
    );
    let fail = Record::command(
        JobIntent::Fail,
        JobRecord {
            worker: "intruder".to_string(),
            retries: 0,
            ..Default::default()
        },
    )
    .with_key(job_key);
    expect_rejection(harness.execute(fail).await, RejectionType::InvalidState);
    assert_eq!(harness.state(1).unwrap().jobs.get(job_key).unwrap().state, JobState::Activated);

    expect_event(harness.execute(complete_as("harness", job_key)).await);
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"P".to_string()), "completed: {completed:?}");
}

#[tokio::test]
async fn any_worker_may_complete_once_the_deadline_passed_unclaimed() {
    let mut harness = one_job().await;
    let batch = expect_event(harness.activate_jobs("test", 1, 60_000, &[]).await);
    let job_key = job_keys(&batch)[0];

    harness.advance_time(Duration::from_secs(60)).await.unwrap();
    expect_event(harness.execute(complete_as("latecomer", job_key)).await);
}
