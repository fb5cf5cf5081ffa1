mod common;

use common::*;
use streamflow_core::record::*;
use streamflow_core::types::Key;
use streamflow_core::EngineHarness;

async fn waiting_instance() -> (EngineHarness, Key, Key) {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("<default>", &[("p.yaml", SERVICE_TASK)]).await);
    let created = expect_event(harness.create_instance("P", "<default>", Variables::new()).await);
    let task_key = harness
        .records(1)
        .await
        .unwrap()
        .iter()
        .filter(|record| record.is_event() && record.intent == Intent::ProcessInstance(ProcessInstanceIntent::ElementActivated))
        .find(|record| record.value_as::<ProcessInstanceRecord>().is_some_and(|value| value.element_id == "task"))
        .map(|record| record.key)
        .expect("task activated");
    (harness, process_instance_key(&created), task_key)
}

fn modify(process_instance_key: Key, activate: &[&str], terminate: &[Key]) -> Record {
    Record::command(
        ProcessInstanceModificationIntent::Modify,
        ProcessInstanceModificationRecord {
            process_instance_key,
            activate_instructions: activate
                .iter()
                .map(|element_id| ActivateInstruction {
                    element_id: element_id.to_string(),
                    ..Default::default()
                })
                .collect(),
            terminate_instructions: terminate
                .iter()
                .map(|key| TerminateInstruction { element_instance_key: *key })
                .collect(),
            ..Default::default()
        },
    )
    .with_key(process_instance_key)
}

#[tokio::test]
async fn one_invalid_instruction_rejects_the_whole_modification() {
    let (mut harness, instance, task) = waiting_instance().await;
    let before = harness.state(1).unwrap().clone();

    let rejected = expect_rejection(
        harness.execute(modify(instance, &["nope"], &[task])).await,
        RejectionType::InvalidArgument,
    );
    assert_eq!(
        rejected.rejection_reason,
        "Expected to modify instance of process 'P' but it contains one or more activate instructions with an element that could not be found: [nope]"
    );
    assert_eq!(harness.state(1).unwrap().elements, before.elements);
    assert!(elements_with(&harness, 1, ProcessInstanceIntent::ElementTerminated).await.is_empty());
}

#[tokio::test]
async fn a_terminated_task_can_be_replaced_by_a_fresh_one() {
    let (mut harness, instance, task) = waiting_instance().await;

    let modified = expect_event(harness.execute(modify(instance, &["task"], &[task])).await);
    assert_eq!(
        modified.intent,
        Intent::ProcessInstanceModification(ProcessInstanceModificationIntent::Modified)
    );
    let activated = modified
        .value_as::<ProcessInstanceModificationRecord>()
        .unwrap()
        .activated_element_instance_keys
        .clone();
    assert_eq!(activated.len(), 1);
    assert_ne!(activated[0], task);

    assert_eq!(elements_with(&harness, 1, ProcessInstanceIntent::ElementTerminated).await, vec!["task".to_string()]);
    let state = harness.state(1).unwrap();
    assert_eq!(state.elements.active_instances_of(instance, "task").len(), 1);
    assert!(state.elements.get(instance).is_some_and(|root| root.is_active()));
}

#[tokio::test]
async fn unknown_instance_is_not_found() {
    let (mut harness, _, task) = waiting_instance().await;
    let rejected = expect_rejection(
        harness.execute(modify(task, &[], &[task])).await,
        RejectionType::NotFound,
    );
    assert_eq!(
        rejected.rejection_reason,
        format!("Expected to modify process instance but no process instance found with key '{task}'")
    );
}
