//! BPMN execution: element lifecycle, token flow and the process instance
//! command processors.

pub(crate) mod behavior;
pub(crate) mod adhoc;
mod creation;
pub(crate) mod events;
mod hooks;
pub mod lifecycle;
mod migration;
mod modification;
pub(crate) mod multi_instance;
mod processor;
mod signal;
pub(crate) mod task_listener;
mod variables;

use crate::engine::ProcessorRegistry;
use crate::record::{
    AdHocSubProcessInstructionIntent, ProcessInstanceCreationIntent, ProcessInstanceIntent,
    ProcessInstanceMigrationIntent, ProcessInstanceModificationIntent, SignalIntent,
    VariableDocumentIntent,
};
use std::sync::Arc;

/// Job type of user task jobs.
pub const USER_TASK_JOB_TYPE: &str = "io.camunda.zeebe:userTask";
/// Custom header carrying the key of a user task's linked form.
pub const FORM_KEY_HEADER: &str = "io.camunda.zeebe:formKey";

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    let lifecycle = Arc::new(processor::ProcessInstanceProcessor);
    registry.register_internal(
        &[
            ProcessInstanceIntent::ActivateElement,
            ProcessInstanceIntent::CompleteElement,
            ProcessInstanceIntent::TerminateElement,
            ProcessInstanceIntent::CompleteExecutionListener,
        ],
        lifecycle.clone(),
    );
    registry.register(&[ProcessInstanceIntent::Cancel], lifecycle);
    registry.register(
        &[ProcessInstanceCreationIntent::Create],
        Arc::new(creation::CreateProcessInstanceProcessor),
    );
    registry.register(
        &[ProcessInstanceModificationIntent::Modify],
        Arc::new(modification::ModifyProcessInstanceProcessor),
    );
    registry.register(
        &[ProcessInstanceMigrationIntent::Migrate],
        Arc::new(migration::MigrateProcessInstanceProcessor),
    );
    registry.register(
        &[VariableDocumentIntent::Update],
        Arc::new(variables::UpdateVariableDocumentProcessor),
    );
    registry.register(
        &[
            AdHocSubProcessInstructionIntent::Activate,
            AdHocSubProcessInstructionIntent::Complete,
        ],
        Arc::new(adhoc::AdHocInstructionProcessor),
    );
    registry.register(&[SignalIntent::Broadcast], Arc::new(signal::BroadcastSignalProcessor));
}
