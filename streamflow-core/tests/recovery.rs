mod common;

use common::*;
use std::time::Duration;
use streamflow_core::record::*;
use streamflow_core::types::decode_partition_id;
use streamflow_core::{EngineConfig, EngineHarness};

#[tokio::test]
async fn replaying_the_log_rebuilds_the_same_state() {
    let mut harness = EngineHarness::new(EngineConfig {
        partition_count: 2,
        ..Default::default()
    })
    .await
    .unwrap();
    expect_event(harness.deploy("<default>", &[("p.yaml", SERVICE_TASK), ("timeout.yaml", BOUNDARY_TIMER)]).await);
    let first = expect_event(harness.create_instance("P", "<default>", Variables::new()).await);
    expect_event(harness.create_instance("timeout", "<default>", Variables::new()).await);
    expect_event(harness.activate_jobs("test", 1, 30_000, &[]).await);
    harness.advance_time(Duration::from_secs(45)).await.unwrap();

    let before = [harness.state(1).unwrap().clone(), harness.state(2).unwrap().clone()];
    let logged = [
        harness.records(1).await.unwrap().len(),
        harness.records(2).await.unwrap().len(),
    ];

    harness.restart().await.unwrap();
    for (index, pid) in [1, 2].into_iter().enumerate() {
        let (after, before) = (harness.state(pid).unwrap(), &before[index]);
        assert_eq!(after, before, "partition {pid}");
        assert_eq!(harness.records(pid).await.unwrap().len(), logged[index], "partition {pid}");
    }

    let second = expect_event(harness.create_instance("P", "<default>", Variables::new()).await);
    let second_key = process_instance_key(&second);
    assert_ne!(second_key, process_instance_key(&first));
    let pid = decode_partition_id(second_key);
    let issued_before = harness.records(pid).await.unwrap()[..logged[pid as usize - 1]]
        .iter()
        .map(|record| record.key)
        .filter(|key| decode_partition_id(*key) == pid)
        .max()
        .unwrap_or(0);
    assert!(second_key > issued_before, "replay must not hand out a used key");
}

#[tokio::test]
async fn pending_timers_fire_after_a_restart() {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("<default>", &[("timeout.yaml", BOUNDARY_TIMER)]).await);
    expect_event(harness.create_instance("timeout", "<default>", Variables::new()).await);
    harness.advance_time(Duration::from_secs(30)).await.unwrap();

    harness.restart().await.unwrap();
    harness.advance_time(Duration::from_secs(30)).await.unwrap();
    assert_eq!(
        count_of(&harness, 1, Intent::Timer(TimerIntent::Triggered), RecordType::Event).await,
        1
    );
    let completed = elements_with(&harness, 1, ProcessInstanceIntent::ElementCompleted).await;
    assert!(completed.contains(&"timeout".to_string()), "completed: {completed:?}");
}
