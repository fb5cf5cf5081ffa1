mod common;

use common::*;
use streamflow_core::record::*;
use streamflow_core::{EngineConfig, EngineHarness};

fn tenant_variable(tenant: &str) -> Record {
    Record::command(
        ClusterVariableIntent::Create,
        ClusterVariableRecord {
            name: "V".to_string(),
            value: serde_json::json!({ "limit": 10 }),
            scope: ClusterVariableScope::Tenant,
            tenant_id: tenant.to_string(),
        },
    )
}

#[tokio::test]
async fn tenant_scoped_names_are_unique_per_tenant() {
    let mut harness = EngineHarness::new(EngineConfig {
        partition_count: 2,
        multi_tenancy_enabled: true,
        ..Default::default()
    })
    .await
    .unwrap();

    expect_event(harness.execute(tenant_variable("A")).await);
    let rejected = expect_rejection(harness.execute(tenant_variable("A")).await, RejectionType::AlreadyExists);
    assert_eq!(
        rejected.rejection_reason,
        "Expected to create cluster variable with name 'V' in scope 'TENANT', but a variable with this name already exists"
    );
    expect_event(harness.execute(tenant_variable("B")).await);

    for partition_id in [1, 2] {
        let state = harness.state(partition_id).unwrap();
        assert_eq!(state.cluster_variables.len(), 2, "partition {partition_id}");
    }
}

#[tokio::test]
async fn distributed_variables_survive_a_restart() {
    let mut harness = EngineHarness::new(EngineConfig {
        partition_count: 2,
        ..Default::default()
    })
    .await
    .unwrap();
    expect_event(harness.execute(tenant_variable("A")).await);
    let before = harness.state(2).unwrap().clone();

    harness.restart().await.unwrap();
    assert_eq!(harness.state(2).unwrap().cluster_variables, before.cluster_variables);
    assert_eq!(
        count_of(
            &harness,
            2,
            Intent::ClusterVariable(ClusterVariableIntent::Created),
            RecordType::Event
        )
        .await,
        1
    );
}
