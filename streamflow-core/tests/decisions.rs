mod common;

use common::*;
use streamflow_core::record::*;
use streamflow_core::EngineHarness;

const DISCOUNT: &str = r#"
kind: decision
id: discount
inputs: ["=tier"]
output: discount
rules:
  - when: ["gold"]
    then: 0.2
"#;

fn evaluate(decision_id: &str, tenant_id: &str, variables: Variables) -> Record {
    Record::command(
        DecisionEvaluationIntent::Evaluate,
        DecisionEvaluationRecord {
            decision_id: decision_id.to_string(),
            variables,
            tenant_id: tenant_id.to_string(),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn unknown_decision_id_is_not_found() {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("foo", &[("discount.yaml", DISCOUNT)]).await);

    let rejected = expect_rejection(
        harness.execute(evaluate("X", "foo", Variables::new())).await,
        RejectionType::NotFound,
    );
    assert_eq!(
        rejected.rejection_reason,
        "Expected to evaluate decision 'X', but no decision found for id 'X'"
    );

    // Deployed, but for another tenant.
    expect_rejection(
        harness.execute(evaluate("discount", "bar", Variables::new())).await,
        RejectionType::NotFound,
    );
}

#[tokio::test]
async fn latest_decision_of_the_tenant_is_evaluated() {
    let mut harness = EngineHarness::single().await.unwrap();
    expect_event(harness.deploy("foo", &[("discount.yaml", DISCOUNT)]).await);

    let mut variables = Variables::new();
    variables.insert("tier".to_string(), serde_json::json!("gold"));
    let evaluated = expect_event(harness.execute(evaluate("discount", "foo", variables)).await);
    assert_eq!(evaluated.intent, Intent::DecisionEvaluation(DecisionEvaluationIntent::Evaluated));
    let result = evaluated.value_as::<DecisionEvaluationRecord>().unwrap();
    assert_eq!(result.decision_version, 1);
    assert_eq!(result.decision_output, serde_json::json!({ "discount": 0.2 }));
}
