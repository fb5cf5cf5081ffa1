//! Per-partition command processing.
//!
//! The engine owns the partition state and turns one command at a time into
//! a batch of records. Processing is staged against a copy of the state; the
//! caller appends the batch to the log and only then commits the staged
//! state, so a failed append leaves the engine untouched.

mod context;
mod registry;

pub use context::{ProcessingContext, ProcessingEnv, ProcessingOutput};
pub use registry::{CommandProcessor, ProcessorRegistry};

use crate::auth::Principal;
use crate::config::EngineConfig;
use crate::error::{EngineError, ProcessingError, Rejection};
use crate::model::{ExpressionLanguage, SimpleExpressionLanguage};
use crate::record::codec::encoded_len;
use crate::record::{JobIntent, MessageIntent, Record, RejectionType, TimerIntent};
use crate::state::ProcessingState;
use crate::types::{PartitionId, Timestamp};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Outcome of processing one command.
#[derive(Debug)]
pub struct Processed {
    /// Staged state to commit once the records are stored; `None` when the
    /// command was rejected and the state is unchanged.
    pub state: Option<ProcessingState>,
    pub output: ProcessingOutput,
}

#[derive(Debug)]
pub struct Engine {
    env: ProcessingEnv,
    state: ProcessingState,
    registry: ProcessorRegistry,
}

impl Engine {
    pub fn new(partition_id: PartitionId, config: EngineConfig) -> Self {
        Self::with_expressions(partition_id, config, Arc::new(SimpleExpressionLanguage))
    }

    pub fn with_expressions(
        partition_id: PartitionId,
        config: EngineConfig,
        expressions: Arc<dyn ExpressionLanguage>,
    ) -> Self {
        let mut registry = ProcessorRegistry::new();
        crate::bpmn::register(&mut registry);
        crate::job::register(&mut registry);
        crate::timer::register(&mut registry);
        crate::message::register(&mut registry);
        crate::incident::register(&mut registry);
        crate::deployment::register(&mut registry);
        crate::decision::register(&mut registry);
        crate::cluster_variable::register(&mut registry);
        crate::identity::register(&mut registry);
        Self {
            env: ProcessingEnv::new(partition_id, config, expressions),
            state: ProcessingState::new(partition_id),
            registry,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.env.partition_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.env.config
    }

    pub fn state(&self) -> &ProcessingState {
        &self.state
    }

    /// Rebuilds state from a stored record. Only events change state; every
    /// record advances the key generator past its key.
    pub fn replay(&mut self, record: &Record) -> Result<(), EngineError> {
        self.state.keys.observe(record.key);
        if record.is_event() {
            self.env.appliers.apply(&mut self.state, record)?;
        }
        Ok(())
    }

    /// Installs the staged state of a stored batch. Finished process
    /// instances are dropped here, between commands, so that processing and
    /// replay observe the same rows.
    pub fn commit(&mut self, mut state: ProcessingState) {
        let evicted = state.elements.evict_finished();
        if evicted > 0 {
            debug!(partition = self.env.partition_id, evicted, "evicted finished element instances");
        }
        self.state = state;
    }

    /// Called once the whole log is replayed.
    pub fn finish_replay(&mut self) {
        self.state.elements.evict_finished();
    }

    /// Processes `command` against a copy of the state.
    ///
    /// Rejections and processor bugs roll back and yield a single rejection
    /// record. Only missing processors and applier inconsistencies detected
    /// outside of a processor are fatal.
    pub fn process(&self, command: &Record) -> Result<Processed, EngineError> {
        let processor = self
            .registry
            .get(command.value_type, command.intent)
            .ok_or(EngineError::NoProcessor {
                value_type: command.value_type,
                intent: command.intent,
            })?;
        if command.authorization.principal != Principal::Internal
            && self.registry.is_internal(command.value_type, command.intent)
        {
            return Ok(self.reject(
                command,
                Rejection::unauthorized(format!(
                    "Expected to process command '{}:{}' with key '{}', but it can only be issued by the engine",
                    command.value_type, command.intent, command.key
                )),
            ));
        }

        let mut staged = self.state.clone();
        let mut ctx = ProcessingContext::new(&mut staged, &self.env, command);
        let result = processor.process(command, &mut ctx);
        let output = ctx.finish();

        match result {
            Ok(()) => {
                let mut size = 0;
                for record in &output.records {
                    size += encoded_len(record)?;
                }
                let limit = self.env.config.max_batch_size_bytes;
                if size > limit {
                    return Ok(self.reject(
                        command,
                        Rejection::new(
                            RejectionType::ExceededBatchRecordSize,
                            format!(
                                "Expected to process command '{}:{}' with key '{}', but the resulting records of {size} bytes exceed the maximum batch size of {limit} bytes",
                                command.value_type, command.intent, command.key
                            ),
                        ),
                    ));
                }
                debug!(
                    partition = self.env.partition_id,
                    position = command.position,
                    value_type = %command.value_type,
                    intent = %command.intent,
                    records = output.records.len(),
                    "processed command"
                );
                Ok(Processed {
                    state: Some(staged),
                    output,
                })
            }
            Err(ProcessingError::Rejected(rejection)) => Ok(self.reject(command, rejection)),
            Err(ProcessingError::Fatal(err)) => Err(err),
            Err(ProcessingError::Incident(failure)) => {
                error!(
                    partition = self.env.partition_id,
                    position = command.position,
                    error_type = ?failure.error_type,
                    "incident escaped element processing: {}",
                    failure.message
                );
                Ok(self.reject(
                    command,
                    Rejection::new(RejectionType::ProcessingError, failure.message),
                ))
            }
            Err(ProcessingError::Unexpected(message)) => {
                error!(
                    partition = self.env.partition_id,
                    position = command.position,
                    value_type = %command.value_type,
                    intent = %command.intent,
                    "unexpected failure while processing command: {message}"
                );
                Ok(self.reject(
                    command,
                    Rejection::new(
                        RejectionType::ProcessingError,
                        format!(
                            "Expected to process command '{}:{}' with key '{}' without errors, but an unexpected error occurred: {message}",
                            command.value_type, command.intent, command.key
                        ),
                    ),
                ))
            }
        }
    }

    fn reject(&self, command: &Record, rejection: Rejection) -> Processed {
        if command.authorization.principal == Principal::Internal && !command.distributed {
            warn!(
                partition = self.env.partition_id,
                position = command.position,
                value_type = %command.value_type,
                intent = %command.intent,
                rejection_type = ?rejection.rejection_type,
                "internal command rejected: {}",
                rejection.reason
            );
        } else {
            debug!(
                partition = self.env.partition_id,
                position = command.position,
                rejection_type = ?rejection.rejection_type,
                "command rejected: {}",
                rejection.reason
            );
        }
        let mut record = Record::rejection_of(command, rejection.rejection_type, rejection.reason);
        record.partition_id = self.env.partition_id;
        Processed {
            state: None,
            output: ProcessingOutput {
                records: vec![record],
                response: Some(0),
                distributions: Vec::new(),
            },
        }
    }

    /// Commands for work that became due at `now`: timers to trigger, job
    /// deadlines that passed and job backoffs that elapsed.
    pub fn due_commands(&self, now: Timestamp) -> Vec<Record> {
        let mut commands = Vec::new();
        for key in self.state.timers.due_until(now) {
            if let Some(timer) = self.state.timers.get(key) {
                commands.push(Record::command(TimerIntent::Trigger, timer.clone()).with_key(key));
            }
        }
        for key in self.state.jobs.deadlines_until(now) {
            if let Some(job) = self.state.jobs.get(key) {
                commands.push(Record::command(JobIntent::TimeOut, job.record.clone()).with_key(key));
            }
        }
        for key in self.state.jobs.backoffs_until(now) {
            if let Some(job) = self.state.jobs.get(key) {
                commands.push(
                    Record::command(JobIntent::RecurAfterBackoff, job.record.clone()).with_key(key),
                );
            }
        }
        for key in self.state.messages.expired_until(now) {
            if let Some(message) = self.state.messages.get(key) {
                commands.push(Record::command(MessageIntent::Expire, message.clone()).with_key(key));
            }
        }
        commands
    }

    /// Earliest instant at which [`Engine::due_commands`] returns something.
    pub fn next_due(&self) -> Option<Timestamp> {
        [
            self.state.timers.next_due(),
            self.state.jobs.next_deadline(),
            self.state.jobs.next_backoff(),
            self.state.messages.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }
}
