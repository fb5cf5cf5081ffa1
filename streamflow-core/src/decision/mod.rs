//! Standalone decision evaluation.

use crate::auth::{AuthorizationRequest, PermissionType, ResourceType};
use crate::engine::{CommandProcessor, ProcessingContext, ProcessorRegistry};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;
use crate::state::DeployedDecision;
use std::sync::Arc;
use tracing::debug;

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry.register(&[DecisionEvaluationIntent::Evaluate], Arc::new(EvaluateDecisionProcessor));
}

/// `DECISION_EVALUATION:EVALUATE` by decision key, or by id for the latest
/// version of the tenant. The command's variables are the only inputs. A
/// failing evaluation is an event too, answered to the caller.
struct EvaluateDecisionProcessor;

impl CommandProcessor for EvaluateDecisionProcessor {
    fn process(&self, _command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let request = ctx.value::<DecisionEvaluationRecord>()?;
        if !ctx.is_visible(&request.tenant_id) {
            return Err(Rejection::unauthorized(format!(
                "Expected to evaluate decision with tenant identifier '{}', but user is not authorized for this tenant",
                request.tenant_id
            ))
            .into());
        }
        let decision = find_decision(ctx, request)?;
        ctx.authorize(
            &AuthorizationRequest::new(ResourceType::DecisionDefinition, PermissionType::CreateDecisionInstance)
                .tenant(decision.tenant_id.clone())
                .resource_id(decision.decision_id.clone()),
        )?;

        let mut evaluation = DecisionEvaluationRecord {
            decision_id: decision.decision_id.clone(),
            decision_key: decision.key,
            decision_version: decision.version,
            decision_name: decision.decision_name.clone(),
            variables: request.variables.clone(),
            tenant_id: decision.tenant_id.clone(),
            ..Default::default()
        };
        let key = ctx.next_key();
        match decision.model.evaluate(ctx.expressions(), &request.variables) {
            Ok(result) => {
                debug!(decision = %decision.decision_id, rule = ?result.matched_rule, "decision evaluated");
                evaluation.decision_output = result.output;
                ctx.append_event(key, DecisionEvaluationIntent::Evaluated, evaluation)?;
            }
            Err(message) => {
                evaluation.failed_decision_id = decision.decision_id.clone();
                evaluation.evaluation_failure_message = message;
                ctx.append_event(key, DecisionEvaluationIntent::Failed, evaluation)?;
            }
        }
        Ok(())
    }
}

fn find_decision(
    ctx: &ProcessingContext<'_>,
    request: &DecisionEvaluationRecord,
) -> Result<DeployedDecision, Rejection> {
    if request.decision_key > 0 {
        return ctx
            .state
            .deployments
            .decision(request.decision_key)
            .filter(|decision| !decision.deleted && ctx.is_visible(&decision.tenant_id))
            .cloned()
            .ok_or_else(|| {
                Rejection::not_found(format!(
                    "Expected to evaluate decision with key '{}', but no such decision found",
                    request.decision_key
                ))
            });
    }
    if request.decision_id.is_empty() {
        return Err(Rejection::invalid_argument(
            "Expected either a decision id or a valid decision key, but none provided",
        ));
    }
    let decision_id = &request.decision_id;
    ctx.state
        .deployments
        .latest_decision(&request.tenant_id, decision_id)
        .cloned()
        .ok_or_else(|| {
            Rejection::not_found(format!(
                "Expected to evaluate decision '{decision_id}', but no decision found for id '{decision_id}'"
            ))
        })
}
