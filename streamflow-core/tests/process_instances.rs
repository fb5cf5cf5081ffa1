mod common;

use common::*;
use streamflow_core::record::*;
use streamflow_core::types::Key;
use streamflow_core::EngineHarness;

const RENAMED_TASK: &str = r#"
kind: process
id: P
nodes:
  - type: start_event
    id: start
  - type: service_task
    id: review
    job_type: test
  - type: end_event
    id: end
flows:
  - from: start
    to: review
  - from: review
    to: end
"#;

async fn caller_harness() -> (EngineHarness, Key, Key) {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(
        harness
            .deploy("<default>", &[("p.yaml", SERVICE_TASK), ("caller.yaml", CALLER)])
            .await,
    );
    let created = expect_event(harness.create_instance("caller", "<default>", Variables::new()).await);
    let child = element_key(&harness, 1, "P", ProcessInstanceIntent::ElementActivated).await;
    (harness, process_instance_key(&created), child)
}

#[tokio::test]
async fn canceling_the_caller_terminates_the_called_instance() {
    let (mut harness, caller, child) = caller_harness().await;
    assert_eq!(created_jobs(&harness, 1).await.len(), 1);

    expect_event(harness.execute(cancel(caller)).await);

    let terminated = elements_with(&harness, 1, ProcessInstanceIntent::ElementTerminated).await;
    for id in ["task", "P", "call", "caller"] {
        assert!(terminated.contains(&id.to_string()), "terminated: {terminated:?}");
    }
    let state = harness.state(1).unwrap();
    assert!(state.elements.get(child).is_none());
    assert!(state.elements.get(caller).is_none());
    assert!(state.jobs.is_empty());
    let canceled = Intent::Job(JobIntent::Canceled);
    assert_eq!(count_of(&harness, 1, canceled, RecordType::Event).await, 1);
}

#[tokio::test]
async fn called_instances_are_canceled_through_their_root() {
    let (mut harness, caller, child) = caller_harness().await;

    let rejected = expect_rejection(harness.execute(cancel(child)).await, RejectionType::InvalidState);
    assert_eq!(
        rejected.rejection_reason,
        format!(
            "Expected to cancel a process instance with key '{child}', but it is created by a parent process instance. Cancel the root process instance '{caller}' instead."
        )
    );
    assert!(elements_with(&harness, 1, ProcessInstanceIntent::ElementTerminated).await.is_empty());
}

#[tokio::test]
async fn completed_called_instance_continues_the_caller() {
    let (mut harness, _, _) = caller_harness().await;

    let batch = expect_event(harness.activate_jobs("test", 1, 60_000, &["<default>"]).await);
    expect_event(harness.complete_job(job_keys(&batch)[0], Variables::new()).await);

    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    for id in ["P", "call", "caller"] {
        assert!(completed.contains(&id.to_string()), "completed: {completed:?}");
    }
    assert!(harness.state(1).unwrap().elements.is_empty());
}

#[tokio::test]
async fn migrated_instance_continues_on_the_target_definition() {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("<default>", &[("p.yaml", SERVICE_TASK)]).await);
    let created = expect_event(harness.create_instance("P", "<default>", Variables::new()).await);
    let pik = process_instance_key(&created);
    let target = deployed_process_key(&expect_event(harness.deploy("<default>", &[("p.yaml", RENAMED_TASK)]).await));

    let migrated = expect_event(harness.execute(migrate(pik, target, &[("task", "review")])).await);
    assert_eq!(migrated.intent, Intent::ProcessInstanceMigration(ProcessInstanceMigrationIntent::Migrated));

    let records = harness.records(1).await.unwrap();
    let job = records
        .iter()
        .filter(|record| record.intent == Intent::Job(JobIntent::Migrated))
        .find_map(|record| record.value_as::<JobRecord>())
        .expect("job migrated");
    assert_eq!(job.element_id, "review");
    assert_eq!(job.process_definition_key, target);
    assert_eq!(job.process_definition_version, 2);

    let batch = expect_event(harness.activate_jobs("test", 1, 60_000, &["<default>"]).await);
    expect_event(harness.complete_job(job_keys(&batch)[0], Variables::new()).await);
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"review".to_string()), "completed: {completed:?}");
    assert!(!completed.contains(&"task".to_string()), "completed: {completed:?}");
    assert!(completed.contains(&"P".to_string()), "completed: {completed:?}");
}

#[tokio::test]
async fn active_elements_need_a_mapping() {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("<default>", &[("p.yaml", SERVICE_TASK)]).await);
    let created = expect_event(harness.create_instance("P", "<default>", Variables::new()).await);
    let pik = process_instance_key(&created);
    let target = deployed_process_key(&expect_event(harness.deploy("<default>", &[("p.yaml", RENAMED_TASK)]).await));

    let rejected = expect_rejection(harness.execute(migrate(pik, target, &[])).await, RejectionType::InvalidState);
    assert_eq!(
        rejected.rejection_reason,
        format!(
            "Expected to migrate process instance '{pik}' but no mapping instruction defined for active element with id 'task'. Elements cannot be migrated without a mapping."
        )
    );
}
