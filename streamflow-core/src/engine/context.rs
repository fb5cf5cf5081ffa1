use crate::auth::{AuthorizationCheck, AuthorizationRequest, AuthorizedTenants};
use crate::config::EngineConfig;
use crate::error::{ProcessingError, Rejection};
use crate::model::ExpressionLanguage;
use crate::record::{Intent, Record, RecordValue, ValueVariant};
use crate::state::{EventAppliers, ProcessingState};
use crate::types::{Key, PartitionId, Timestamp};
use std::sync::Arc;

/// Collaborators shared by every command of a partition.
#[derive(Debug)]
pub struct ProcessingEnv {
    pub partition_id: PartitionId,
    pub config: EngineConfig,
    pub authorization: AuthorizationCheck,
    pub expressions: Arc<dyn ExpressionLanguage>,
    pub appliers: EventAppliers,
}

impl ProcessingEnv {
    pub fn new(partition_id: PartitionId, config: EngineConfig, expressions: Arc<dyn ExpressionLanguage>) -> Self {
        Self {
            partition_id,
            authorization: AuthorizationCheck::new(
                config.multi_tenancy_enabled,
                config.authorizations_enabled,
            ),
            appliers: EventAppliers::new(expressions.clone()),
            expressions,
            config,
        }
    }
}

/// Mutable view of one command's processing.
///
/// Events are applied to the staged state as soon as they are appended, so
/// later steps of the same command observe them.
pub struct ProcessingContext<'a> {
    pub state: &'a mut ProcessingState,
    env: &'a ProcessingEnv,
    command: &'a Record,
    records: Vec<Record>,
    response: Option<usize>,
    distributions: Vec<(PartitionId, Record)>,
}

impl<'a> ProcessingContext<'a> {
    pub fn new(state: &'a mut ProcessingState, env: &'a ProcessingEnv, command: &'a Record) -> Self {
        Self {
            state,
            env,
            command,
            records: Vec::new(),
            response: None,
            distributions: Vec::new(),
        }
    }

    pub fn command(&self) -> &'a Record {
        self.command
    }

    /// Typed payload of the command.
    pub fn value<T: ValueVariant>(&self) -> Result<&'a T, ProcessingError> {
        let command: &'a Record = self.command;
        command.value_as::<T>().ok_or_else(|| {
            Rejection::invalid_argument(format!(
                "Expected command '{}:{}' to carry a {} value, but it carried a {} value",
                command.value_type,
                command.intent,
                command.value_type,
                command.value.value_type()
            ))
            .into()
        })
    }

    pub fn config(&self) -> &'a EngineConfig {
        &self.env.config
    }

    pub fn expressions(&self) -> &'a dyn ExpressionLanguage {
        self.env.expressions.as_ref()
    }

    pub fn partition_id(&self) -> PartitionId {
        self.env.partition_id
    }

    pub fn is_deployment_partition(&self) -> bool {
        self.env.partition_id == self.env.config.deployment_partition
    }

    /// Processing time: the timestamp of the command, never the wall clock.
    pub fn now(&self) -> Timestamp {
        self.command.timestamp
    }

    pub fn next_key(&mut self) -> Key {
        self.state.keys.next_key()
    }

    fn stamp(&self, mut record: Record) -> Record {
        record.timestamp = self.command.timestamp;
        record.partition_id = self.env.partition_id;
        record.source_record_position = self.command.position;
        record
    }

    /// Appends an event and applies it to the staged state.
    pub fn append_event(
        &mut self,
        key: Key,
        intent: impl Into<Intent>,
        value: impl Into<RecordValue>,
    ) -> Result<(), ProcessingError> {
        let record = self.stamp(Record::event(key, intent, value));
        self.env
            .appliers
            .apply(self.state, &record)
            .map_err(|err| ProcessingError::unexpected(err.to_string()))?;
        self.records.push(record);
        Ok(())
    }

    /// Appends a follow-up command processed after the current one. Follow-up
    /// commands are issued by the engine and bypass authorization.
    pub fn append_command(&mut self, key: Key, intent: impl Into<Intent>, value: impl Into<RecordValue>) {
        let record = self.stamp(Record::command(intent, value).with_key(key));
        self.records.push(record);
    }

    /// Makes the last written record the response; by default the first
    /// written record answers the request.
    pub fn respond_with_last(&mut self) {
        self.response = self.records.len().checked_sub(1);
    }

    /// Sends a command to another partition once this batch is committed.
    pub fn distribute(&mut self, partition_id: PartitionId, mut record: Record) {
        record.distributed = true;
        record.timestamp = self.command.timestamp;
        self.distributions.push((partition_id, record));
    }

    pub fn other_partitions(&self) -> Vec<PartitionId> {
        self.env
            .config
            .partition_ids()
            .filter(|id| *id != self.env.partition_id)
            .collect()
    }

    // ── Authorization ──

    pub fn authorize(&self, request: &AuthorizationRequest) -> Result<(), Rejection> {
        self.env
            .authorization
            .check(&self.state.identity, &self.command.authorization, request)
    }

    pub fn is_authorized(&self, request: &AuthorizationRequest) -> bool {
        self.env
            .authorization
            .is_authorized(&self.state.identity, &self.command.authorization, request)
    }

    pub fn authorized_tenants(&self) -> AuthorizedTenants {
        self.env
            .authorization
            .authorized_tenants(&self.state.identity, &self.command.authorization)
    }

    /// Entities of tenants the principal may not see are reported exactly
    /// like missing ones.
    pub fn is_visible(&self, tenant_id: &str) -> bool {
        self.authorized_tenants().contains(tenant_id)
    }

    pub(crate) fn finish(self) -> ProcessingOutput {
        let response = self.response.or(if self.records.is_empty() { None } else { Some(0) });
        ProcessingOutput {
            records: self.records,
            response,
            distributions: self.distributions,
        }
    }
}

/// Records produced by one command before they are committed.
#[derive(Debug, Default)]
pub struct ProcessingOutput {
    pub records: Vec<Record>,
    /// Index into `records` of the record answering the request.
    pub response: Option<usize>,
    pub distributions: Vec<(PartitionId, Record)>,
}
