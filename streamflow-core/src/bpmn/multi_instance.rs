//! Multi-instance activities. The body instance evaluates the input
//! collection and runs one inner instance of the activity per item, either
//! one after another or all at once.

use super::behavior::{
    begin_activation, child_record, complete_element, propagate_variables, raise_incident,
    set_variable, terminate_element, write_activated, ElementRef, Outcome,
};
use super::lifecycle::ElementState;
use crate::engine::ProcessingContext;
use crate::error::{Failure, ProcessingError};
use crate::model::expression::type_name;
use crate::model::{Layered, MultiInstanceDefinition};
use crate::record::*;
use crate::state::ElementInstance;
use crate::types::Key;
use serde_json::Value;
use tracing::debug;

/// Local variable of an inner instance: its 1-based position in the input
/// collection.
pub const LOOP_COUNTER: &str = "loopCounter";

fn definition<'m>(el: &ElementRef<'m>) -> Result<&'m MultiInstanceDefinition, ProcessingError> {
    el.element.multi_instance.as_ref().ok_or_else(|| {
        ProcessingError::unexpected(format!(
            "Expected element '{}' to be a multi-instance activity, but it has no loop characteristics",
            el.element.id
        ))
    })
}

fn input_items(ctx: &ProcessingContext<'_>, scope_key: Key, definition: &MultiInstanceDefinition) -> Result<Vec<Value>, Failure> {
    let scope = ctx.state.scope(scope_key);
    match ctx.expressions().evaluate(&definition.input_collection, &scope) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(Failure::new(
            ErrorType::ExtractValueError,
            format!(
                "Expected result of the expression '{}' to be 'ARRAY', but was '{}'.",
                definition.input_collection,
                type_name(&other)
            ),
        )),
        Err(err) => Err(Failure::new(ErrorType::ExtractValueError, err.to_string())),
    }
}

/// Activates the body: the output collection starts as one `null` per item,
/// then the first item (sequential) or every item (parallel) gets an inner
/// instance. An empty collection completes the body right away.
pub(super) fn activate_body(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    let definition = definition(el)?;
    let items = input_items(ctx, el.key, definition)?;
    write_activated(ctx, el, Vec::new())?;
    if let Some(name) = &definition.output_collection {
        set_variable(ctx, el.key, name, Value::Array(vec![Value::Null; items.len()]))?;
    }
    debug!(key = el.key, element_id = %el.element.id, items = items.len(), "activate multi-instance body");

    if items.is_empty() {
        return complete_element(ctx, el.key, None);
    }
    if definition.sequential {
        return activate_inner(ctx, el, definition, &items[0], 1);
    }
    for (index, item) in items.iter().enumerate() {
        activate_inner(ctx, el, definition, item, index + 1)?;
    }
    Ok(())
}

fn activate_inner(
    ctx: &mut ProcessingContext<'_>,
    body: &ElementRef<'_>,
    definition: &MultiInstanceDefinition,
    item: &Value,
    loop_counter: usize,
) -> Outcome {
    let key = ctx.next_key();
    let value = child_record(&body.value, body.key, key, body.element);
    let mut variables = Variables::new();
    variables.insert(LOOP_COUNTER.to_string(), Value::from(loop_counter));
    if let Some(name) = &definition.input_element {
        variables.insert(name.clone(), item.clone());
    }
    begin_activation(ctx, key, value, &variables)
}

/// Called whenever an inner instance completed or terminated. The body
/// completes once its completion condition holds, terminating the inner
/// instances still running, or once every item is done.
pub(crate) fn check_body(ctx: &mut ProcessingContext<'_>, body: &ElementRef<'_>) -> Outcome {
    match evaluate_body(ctx, body) {
        Err(ProcessingError::Incident(failure)) => raise_incident(ctx, body.key, failure),
        other => other,
    }
}

fn evaluate_body(ctx: &mut ProcessingContext<'_>, body: &ElementRef<'_>) -> Outcome {
    let definition = definition(body)?;
    let children: Vec<ElementInstance> = ctx.state.elements.children(body.key).cloned().collect();
    let active: Vec<Key> = children.iter().filter(|c| c.is_active()).map(|c| c.key).collect();

    if let Some(condition) = &definition.completion_condition {
        let completed = children.iter().filter(|c| c.state == ElementState::Completed).count();
        let mut counters = Variables::new();
        counters.insert("numberOfInstances".to_string(), Value::from(children.len()));
        counters.insert("numberOfActiveInstances".to_string(), Value::from(active.len()));
        counters.insert("numberOfCompletedInstances".to_string(), Value::from(completed));
        let satisfied = {
            let scope = ctx.state.scope(body.key);
            let layered = Layered {
                top: &counters,
                below: &scope,
            };
            ctx.expressions()
                .evaluate_boolean(condition, &layered)
                .map_err(|err| Failure::new(ErrorType::ConditionError, err.to_string()))?
        };
        if satisfied {
            for key in active {
                terminate_element(ctx, key, false)?;
            }
            return complete_element(ctx, body.key, None);
        }
    }

    if !active.is_empty() {
        return Ok(());
    }
    if definition.sequential {
        let items = input_items(ctx, body.key, definition)?;
        if let Some(item) = items.get(children.len()) {
            return activate_inner(ctx, body, definition, item, children.len() + 1);
        }
    }
    complete_element(ctx, body.key, None)
}

/// Stores the output element of a completing inner instance at its slot of
/// the body's output collection. Variables the instance was completed with
/// are visible to the expression.
pub(super) fn collect_output(ctx: &mut ProcessingContext<'_>, inner: &ElementRef<'_>) -> Outcome {
    let definition = definition(inner)?;
    let (Some(collection_name), Some(output_element)) = (&definition.output_collection, &definition.output_element) else {
        return Ok(());
    };
    let body_key = inner.scope_key();
    let completed_with = ctx
        .state
        .triggers
        .peek(inner.key)
        .map(|trigger| trigger.variables.clone())
        .unwrap_or_default();
    let value = {
        let scope = ctx.state.scope(inner.key);
        let layered = Layered {
            top: &completed_with,
            below: &scope,
        };
        ctx.expressions()
            .evaluate(output_element, &layered)
            .map_err(|err| Failure::new(ErrorType::ExtractValueError, err.to_string()))?
    };
    let slot = ctx
        .state
        .variables
        .get(inner.key, LOOP_COUNTER)
        .and_then(|counter| counter.value.as_u64())
        .ok_or_else(|| {
            ProcessingError::unexpected(format!(
                "Expected inner instance '{}' to have a loop counter, but none found",
                inner.key
            ))
        })?
        .saturating_sub(1) as usize;

    let mut collection = match ctx.state.variables.get(body_key, collection_name) {
        Some(stored) => match &stored.value {
            Value::Array(items) => items.clone(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    };
    if collection.len() <= slot {
        collection.resize(slot + 1, Value::Null);
    }
    collection[slot] = value;
    set_variable(ctx, body_key, collection_name, Value::Array(collection))
}

/// The output collection leaves the body like an output mapping would.
pub(super) fn on_body_completing(ctx: &mut ProcessingContext<'_>, body: &ElementRef<'_>) -> Outcome {
    let definition = definition(body)?;
    let Some(name) = &definition.output_collection else {
        return Ok(());
    };
    let Some(collection) = ctx.state.variables.get(body.key, name).map(|stored| stored.value.clone()) else {
        return Ok(());
    };
    let mut outputs = Variables::new();
    outputs.insert(name.clone(), collection);
    propagate_variables(ctx, body.scope_key(), &outputs)
}
