//! Deterministic in-process driver for tests and simulations.
//!
//! All partitions run on the caller's task over in-memory logs. Time only
//! moves through [`EngineHarness::advance_time`], and distributed commands
//! are delivered in the order they were produced until every partition is
//! idle.

use crate::auth::AuthorizationContext;
use crate::clock::{Clock, ControlledClock};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::log::{MemoryLog, PartitionLog};
use crate::partition::{route, CommandResponse};
use crate::record::*;
use crate::state::ProcessingState;
use crate::stream::{ProcessedCommand, StreamProcessor};
use crate::types::{Key, PartitionId, Position, Timestamp};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Fixed start of the harness clock: 2024-01-01T00:00:00Z.
pub const HARNESS_EPOCH: Timestamp = 1_704_067_200_000;

pub struct EngineHarness {
    config: EngineConfig,
    clock: Arc<ControlledClock>,
    logs: BTreeMap<PartitionId, Arc<MemoryLog>>,
    processors: BTreeMap<PartitionId, StreamProcessor>,
    round_robin: usize,
    authorization: AuthorizationContext,
}

impl EngineHarness {
    pub async fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let mut harness = Self {
            clock: Arc::new(ControlledClock::new(HARNESS_EPOCH)),
            logs: config
                .partition_ids()
                .map(|id| (id, Arc::new(MemoryLog::new(id))))
                .collect(),
            processors: BTreeMap::new(),
            round_robin: 0,
            authorization: AuthorizationContext::default(),
            config,
        };
        harness.restart().await?;
        Ok(harness)
    }

    /// One partition, default settings.
    pub async fn single() -> Result<Self, EngineError> {
        Self::new(EngineConfig::default()).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Authorization attached to every following command that carries none
    /// of its own.
    pub fn act_as(&mut self, authorization: AuthorizationContext) {
        self.authorization = authorization;
    }

    pub fn state(&self, partition_id: PartitionId) -> Option<&ProcessingState> {
        self.processors.get(&partition_id).map(StreamProcessor::state)
    }

    /// Every record written to the partition's log so far.
    pub async fn records(&self, partition_id: PartitionId) -> Result<Vec<Record>, EngineError> {
        let log = self
            .logs
            .get(&partition_id)
            .ok_or(EngineError::UnknownPartition(partition_id))?;
        Ok(log.records().await?)
    }

    /// Rebuilds every partition from its log, as after a broker restart.
    pub async fn restart(&mut self) -> Result<(), EngineError> {
        self.processors.clear();
        for (partition_id, log) in &self.logs {
            let log: Arc<dyn PartitionLog> = log.clone();
            let processor = StreamProcessor::recover(Engine::new(*partition_id, self.config.clone()), log).await?;
            self.processors.insert(*partition_id, processor);
        }
        self.settle(None).await?;
        Ok(())
    }

    /// Routes a client command like the cluster does and returns its answer
    /// once every partition is idle again.
    pub async fn execute(&mut self, command: Record) -> CommandResponse {
        let partition_id = route(&self.config, &command, self.round_robin);
        self.round_robin += 1;
        self.execute_on(partition_id, command).await
    }

    pub async fn execute_on(&mut self, partition_id: PartitionId, mut command: Record) -> CommandResponse {
        if command.authorization == AuthorizationContext::default() {
            command.authorization = self.authorization.clone();
        }
        let now = self.clock.now();
        let processor = self
            .processors
            .get_mut(&partition_id)
            .ok_or(EngineError::UnknownPartition(partition_id))?;
        let position = processor.write_command(command, now).await?;
        let processed = self.settle(Some((partition_id, position))).await?;
        Ok(processed.and_then(|processed| processed.response))
    }

    /// Moves the clock and processes everything that became due.
    pub async fn advance_time(&mut self, by: Duration) -> Result<Vec<ProcessedCommand>, EngineError> {
        let now = self.clock.advance(by);
        let mut processed = Vec::new();
        loop {
            let mut scheduled = false;
            for processor in self.processors.values_mut() {
                let due = processor.engine().due_commands(now);
                scheduled |= !due.is_empty();
                for command in due {
                    processor.write_command(command, now).await?;
                }
            }
            if !scheduled {
                break;
            }
            processed.extend(self.settle_all().await?);
        }
        Ok(processed)
    }

    async fn settle(&mut self, awaited: Option<(PartitionId, Position)>) -> Result<Option<ProcessedCommand>, EngineError> {
        let mut answer = None;
        for processed in self.settle_all().await? {
            if Some((processed.command.partition_id, processed.command.position)) == awaited {
                answer = Some(processed);
            }
        }
        Ok(answer)
    }

    /// Processes pending commands on every partition, delivering
    /// distributions, until nothing is left.
    async fn settle_all(&mut self) -> Result<Vec<ProcessedCommand>, EngineError> {
        let now = self.clock.now();
        let mut all = Vec::new();
        let mut outbox: VecDeque<(PartitionId, Record)> = VecDeque::new();
        loop {
            let mut progressed = false;
            for processor in self.processors.values_mut() {
                for processed in processor.process_available().await? {
                    progressed = true;
                    outbox.extend(processed.distributions.iter().cloned());
                    all.push(processed);
                }
            }
            while let Some((target, record)) = outbox.pop_front() {
                let processor = self
                    .processors
                    .get_mut(&target)
                    .ok_or(EngineError::UnknownPartition(target))?;
                processor.write_command(record, now).await?;
                progressed = true;
            }
            if !progressed {
                return Ok(all);
            }
        }
    }

    // ── Command shortcuts ──

    pub async fn deploy(&mut self, tenant_id: &str, resources: &[(&str, &str)]) -> CommandResponse {
        let deployment = DeploymentRecord {
            resources: resources
                .iter()
                .map(|(name, text)| DeploymentResource {
                    resource_name: name.to_string(),
                    resource: text.to_string(),
                })
                .collect(),
            tenant_id: tenant_id.to_string(),
            ..Default::default()
        };
        self.execute(Record::command(DeploymentIntent::Create, deployment)).await
    }

    pub async fn create_instance(&mut self, bpmn_process_id: &str, tenant_id: &str, variables: Variables) -> CommandResponse {
        let creation = ProcessInstanceCreationRecord {
            bpmn_process_id: bpmn_process_id.to_string(),
            variables,
            tenant_id: tenant_id.to_string(),
            ..Default::default()
        };
        self.execute(Record::command(ProcessInstanceCreationIntent::Create, creation)).await
    }

    pub async fn activate_jobs(
        &mut self,
        job_type: &str,
        max_jobs: i32,
        timeout: i64,
        tenant_ids: &[&str],
    ) -> CommandResponse {
        let batch = JobBatchRecord {
            job_type: job_type.to_string(),
            worker: "harness".to_string(),
            timeout,
            max_jobs_to_activate: max_jobs,
            tenant_ids: tenant_ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        };
        self.execute(Record::command(JobBatchIntent::Activate, batch)).await
    }

    pub async fn complete_job(&mut self, job_key: Key, variables: Variables) -> CommandResponse {
        let job = JobRecord {
            variables,
            ..Default::default()
        };
        self.execute(Record::command(JobIntent::Complete, job).with_key(job_key)).await
    }

    pub async fn publish_message(
        &mut self,
        name: &str,
        correlation_key: &str,
        time_to_live: Duration,
        variables: Variables,
    ) -> CommandResponse {
        let message = MessageRecord {
            name: name.to_string(),
            correlation_key: correlation_key.to_string(),
            time_to_live: i64::try_from(time_to_live.as_millis()).unwrap_or(i64::MAX),
            variables,
            ..Default::default()
        };
        self.execute(Record::command(MessageIntent::Publish, message)).await
    }
}
