mod common;

use common::*;
use streamflow_core::auth::{AuthorizationContext, Principal};
use streamflow_core::record::*;
use streamflow_core::types::Key;
use streamflow_core::{EngineConfig, EngineHarness};

fn multi_tenant() -> EngineConfig {
    EngineConfig {
        multi_tenancy_enabled: true,
        ..Default::default()
    }
}

fn user(tenants: &[&str]) -> AuthorizationContext {
    AuthorizationContext {
        principal: Principal::User("demo".to_string()),
        authorized_tenant_ids: tenants.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn instances_start_only_for_the_deploying_tenant() {
    let mut harness = EngineHarness::new(multi_tenant()).await.unwrap();
    harness.act_as(user(&["foo", "bar"]));
    expect_event(harness.deploy("foo", &[("p.yaml", SERVICE_TASK)]).await);

    let created = expect_event(harness.create_instance("P", "foo", Variables::new()).await);
    assert!(process_instance_key(&created) > 0);
    let activated = elements_with(&harness, 1, ProcessInstanceIntent::ElementActivated).await;
    assert!(activated.contains(&"task".to_string()), "activated: {activated:?}");

    let rejected = expect_rejection(
        harness.create_instance("P", "bar", Variables::new()).await,
        RejectionType::NotFound,
    );
    assert_eq!(
        rejected.rejection_reason,
        "Expected to find process definition with process ID 'P', but none found"
    );
}

#[tokio::test]
async fn job_batch_for_foreign_tenants_lists_both_tenant_sets() {
    let mut harness = EngineHarness::new(multi_tenant()).await.unwrap();
    harness.act_as(user(&["tenantId"]));

    let rejected = expect_rejection(
        harness
            .activate_jobs("test", 10, 60_000, &["custom-tenant", "another-tenant"])
            .await,
        RejectionType::Unauthorized,
    );
    assert_eq!(
        rejected.rejection_reason,
        "Expected to activate job batch for tenants '[custom-tenant, another-tenant]', but user is not authorized. Authorized tenants are '[tenantId]'"
    );
}

#[tokio::test]
async fn jobs_of_other_tenants_look_missing() {
    let mut harness = EngineHarness::new(multi_tenant()).await.unwrap();
    harness.act_as(user(&["foo"]));
    expect_event(harness.deploy("foo", &[("p.yaml", SERVICE_TASK)]).await);
    expect_event(harness.create_instance("P", "foo", Variables::new()).await);
    let batch = expect_event(harness.activate_jobs("test", 1, 60_000, &["foo"]).await);
    let job_key = job_keys(&batch)[0];

    harness.act_as(user(&["bar"]));
    let rejected = expect_rejection(
        harness.complete_job(job_key, Variables::new()).await,
        RejectionType::NotFound,
    );
    assert_eq!(
        rejected.rejection_reason,
        format!("Expected to complete job with key '{job_key}', but no such job was found")
    );

    harness.act_as(user(&["foo"]));
    expect_event(harness.complete_job(job_key, Variables::new()).await);
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"P".to_string()), "completed: {completed:?}");
}

async fn foo_instance(harness: &mut EngineHarness) -> Key {
    harness.act_as(user(&["foo"]));
    expect_event(harness.deploy("foo", &[("p.yaml", SERVICE_TASK)]).await);
    let created = expect_event(harness.create_instance("P", "foo", Variables::new()).await);
    harness.act_as(user(&["bar"]));
    process_instance_key(&created)
}

#[tokio::test]
async fn instances_of_other_tenants_cannot_be_canceled() {
    let mut harness = EngineHarness::new(multi_tenant()).await.unwrap();
    let pik = foo_instance(&mut harness).await;

    let rejected = expect_rejection(harness.execute(cancel(pik)).await, RejectionType::NotFound);
    assert_eq!(
        rejected.rejection_reason,
        format!("Expected to cancel a process instance with key '{pik}', but no such process instance was found")
    );
    assert!(elements_with(&harness, 1, ProcessInstanceIntent::ElementTerminated).await.is_empty());
}

#[tokio::test]
async fn called_instances_of_other_tenants_look_missing() {
    let mut harness = EngineHarness::new(multi_tenant()).await.unwrap();
    harness.act_as(user(&["foo"]));
    expect_event(
        harness
            .deploy("foo", &[("p.yaml", SERVICE_TASK), ("caller.yaml", CALLER)])
            .await,
    );
    expect_event(harness.create_instance("caller", "foo", Variables::new()).await);
    let child = element_key(&harness, 1, "P", ProcessInstanceIntent::ElementActivated).await;

    harness.act_as(user(&["bar"]));
    let rejected = expect_rejection(harness.execute(cancel(child)).await, RejectionType::NotFound);
    assert_eq!(
        rejected.rejection_reason,
        format!("Expected to cancel a process instance with key '{child}', but no such process instance was found")
    );
}

#[tokio::test]
async fn instances_of_other_tenants_cannot_be_modified() {
    let mut harness = EngineHarness::new(multi_tenant()).await.unwrap();
    let pik = foo_instance(&mut harness).await;
    let task = element_key(&harness, 1, "task", ProcessInstanceIntent::ElementActivated).await;

    let modification = ProcessInstanceModificationRecord {
        process_instance_key: pik,
        terminate_instructions: vec![TerminateInstruction { element_instance_key: task }],
        ..Default::default()
    };
    let rejected = expect_rejection(
        harness
            .execute(Record::command(ProcessInstanceModificationIntent::Modify, modification).with_key(pik))
            .await,
        RejectionType::NotFound,
    );
    assert_eq!(
        rejected.rejection_reason,
        format!("Expected to modify process instance but no process instance found with key '{pik}'")
    );
    assert!(harness.state(1).unwrap().elements.get(task).is_some());
}

#[tokio::test]
async fn instances_of_other_tenants_cannot_be_migrated() {
    let mut harness = EngineHarness::new(multi_tenant()).await.unwrap();
    let pik = foo_instance(&mut harness).await;
    harness.act_as(user(&["foo", "bar"]));
    let target = expect_event(harness.deploy("bar", &[("p.yaml", SERVICE_TASK)]).await);
    harness.act_as(user(&["bar"]));

    let rejected = expect_rejection(
        harness
            .execute(migrate(pik, deployed_process_key(&target), &[("task", "task")]))
            .await,
        RejectionType::NotFound,
    );
    assert_eq!(
        rejected.rejection_reason,
        format!("Expected to migrate process instance but no process instance found with key '{pik}'")
    );
}

#[tokio::test]
async fn clients_cannot_issue_element_commands() {
    let mut harness = EngineHarness::new(multi_tenant()).await.unwrap();
    let pik = foo_instance(&mut harness).await;
    let task = element_key(&harness, 1, "task", ProcessInstanceIntent::ElementActivated).await;

    for tenants in [&["bar"][..], &["foo"][..]] {
        harness.act_as(user(tenants));
        let element = harness.state(1).unwrap().elements.get(task).map(|instance| instance.value.clone());
        let command = Record::command(ProcessInstanceIntent::CompleteElement, element.expect("task active")).with_key(task);
        let rejected = expect_rejection(harness.execute(command).await, RejectionType::Unauthorized);
        assert_eq!(
            rejected.rejection_reason,
            format!("Expected to process command 'PROCESS_INSTANCE:COMPLETE_ELEMENT' with key '{task}', but it can only be issued by the engine")
        );
    }
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(!completed.contains(&"task".to_string()), "completed: {completed:?}");
    assert!(harness.state(1).unwrap().elements.get(pik).is_some());
}
