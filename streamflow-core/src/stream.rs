//! Stream processor: the single writer of a partition.
//!
//! On start the whole log is replayed, applying events only. Afterwards
//! every command after the last processed one is processed in log order:
//! the engine stages the result against a copy of its state, the batch is
//! appended as a whole and only then the staged state is committed.

use crate::engine::Engine;
use crate::error::EngineError;
use crate::log::{LogError, LogReader, PartitionLog};
use crate::record::Record;
use crate::state::ProcessingState;
use crate::types::{PartitionId, Position, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry policy for transient storage failures.
#[derive(Debug, Clone, Copy)]
pub struct StorageRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl StorageRetry {
    const MAX_BACKOFF: Duration = Duration::from_secs(5);

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(Self::MAX_BACKOFF)
    }
}

/// Result of processing one command from the log.
#[derive(Debug, Clone)]
pub struct ProcessedCommand {
    pub command: Record,
    /// Records appended for the command, with their log positions.
    pub records: Vec<Record>,
    /// The record answering the command, if any.
    pub response: Option<Record>,
    /// Commands to forward to other partitions.
    pub distributions: Vec<(PartitionId, Record)>,
}

pub struct StreamProcessor {
    engine: Engine,
    log: Arc<dyn PartitionLog>,
    reader: LogReader,
    last_processed: Position,
    retry: StorageRetry,
}

impl std::fmt::Debug for StreamProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("partition_id", &self.engine.partition_id())
            .field("last_processed", &self.last_processed)
            .finish()
    }
}

impl StreamProcessor {
    /// Replays `log` into `engine` and positions the processor after the last
    /// command whose results are stored.
    pub async fn recover(mut engine: Engine, log: Arc<dyn PartitionLog>) -> Result<Self, EngineError> {
        let retry = StorageRetry {
            attempts: engine.config().storage_retry_attempts.max(1),
            backoff: Duration::from_millis(engine.config().storage_retry_backoff_ms),
        };
        let mut reader = LogReader::new(log.clone(), 1);
        let mut last_processed: Position = 0;
        let mut replayed = 0usize;
        while let Some(record) = reader.next().await? {
            if record.partition_id != engine.partition_id() {
                return Err(EngineError::CorruptState(format!(
                    "record at position {} belongs to partition {}",
                    record.position, record.partition_id
                )));
            }
            engine.replay(&record)?;
            last_processed = last_processed.max(record.source_record_position);
            replayed += 1;
        }
        engine.finish_replay();
        info!(
            partition = engine.partition_id(),
            replayed,
            last_processed,
            "partition recovered"
        );
        reader.seek(last_processed + 1);
        Ok(Self {
            engine,
            log,
            reader,
            last_processed,
            retry,
        })
    }

    pub fn partition_id(&self) -> PartitionId {
        self.engine.partition_id()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn state(&self) -> &ProcessingState {
        self.engine.state()
    }

    pub fn last_processed_position(&self) -> Position {
        self.last_processed
    }

    /// Appends a command written from outside the partition and returns its
    /// position. It is processed by a later [`StreamProcessor::process_next`].
    pub async fn write_command(&mut self, mut command: Record, now: Timestamp) -> Result<Position, EngineError> {
        command.timestamp = now;
        command.source_record_position = -1;
        self.append(vec![command]).await
    }

    /// Processes the next unprocessed command, skipping records that are
    /// not commands. `None` once the log is exhausted.
    pub async fn process_next(&mut self) -> Result<Option<ProcessedCommand>, EngineError> {
        loop {
            let Some(command) = self.reader.next().await? else {
                return Ok(None);
            };
            if !command.is_command() || command.position <= self.last_processed {
                continue;
            }
            return self.process(command).await.map(Some);
        }
    }

    /// Processes every command currently in the log.
    pub async fn process_available(&mut self) -> Result<Vec<ProcessedCommand>, EngineError> {
        let mut processed = Vec::new();
        while let Some(next) = self.process_next().await? {
            processed.push(next);
        }
        Ok(processed)
    }

    async fn process(&mut self, command: Record) -> Result<ProcessedCommand, EngineError> {
        let result = self.engine.process(&command)?;
        let output = result.output;
        let mut records = output.records;
        if !records.is_empty() {
            let first = self.append(records.clone()).await?;
            for (offset, record) in records.iter_mut().enumerate() {
                record.position = first + offset as Position;
                record.partition_id = self.engine.partition_id();
            }
        }
        if let Some(state) = result.state {
            self.engine.commit(state);
        }
        self.last_processed = command.position;

        let response = output.response.and_then(|index| records.get(index)).cloned().map(|mut response| {
            response.request_id = command.request_id;
            response
        });
        debug!(
            partition = self.engine.partition_id(),
            position = command.position,
            records = records.len(),
            distributions = output.distributions.len(),
            "command committed"
        );
        Ok(ProcessedCommand {
            command,
            records,
            response,
            distributions: output.distributions,
        })
    }

    async fn append(&self, records: Vec<Record>) -> Result<Position, EngineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.log.append(records.clone()).await {
                Ok(position) => return Ok(position),
                Err(err) if err.is_transient() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        partition = self.engine.partition_id(),
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "append failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err @ LogError::Storage(_)) => {
                    return Err(EngineError::StorageExhausted { attempts: attempt, source: err })
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::log::MemoryLog;
    use crate::record::{ClusterVariableIntent, ClusterVariableRecord, RecordType};

    fn config() -> EngineConfig {
        EngineConfig {
            storage_retry_attempts: 3,
            storage_retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn create_variable(name: &str) -> Record {
        Record::command(
            ClusterVariableIntent::Create,
            ClusterVariableRecord {
                name: name.to_string(),
                value: serde_json::json!(true),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn commands_are_processed_once_across_restarts() {
        let log = Arc::new(MemoryLog::new(1));
        let mut processor = StreamProcessor::recover(Engine::new(1, config()), log.clone()).await.unwrap();
        processor.write_command(create_variable("a"), 1).await.unwrap();
        let processed = processor.process_available().await.unwrap();
        assert_eq!(processed.len(), 1);
        assert_eq!(
            processed[0].response.as_ref().map(|r| r.record_type),
            Some(RecordType::Event)
        );
        processor.write_command(create_variable("b"), 2).await.unwrap();

        let mut restarted = StreamProcessor::recover(Engine::new(1, config()), log.clone()).await.unwrap();
        assert_eq!(restarted.state().cluster_variables.len(), 1);
        let processed = restarted.process_available().await.unwrap();
        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].command.position, 3);
        assert_eq!(restarted.state().cluster_variables.len(), 2);
    }

    #[tokio::test]
    async fn transient_append_failures_are_retried() {
        let log = Arc::new(MemoryLog::new(1));
        let mut processor = StreamProcessor::recover(Engine::new(1, config()), log.clone()).await.unwrap();
        processor.write_command(create_variable("a"), 1).await.unwrap();
        log.fail_next_appends(2);
        let processed = processor.process_available().await.unwrap();
        assert_eq!(processed.len(), 1);
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_the_state_untouched() {
        let log = Arc::new(MemoryLog::new(1));
        let mut processor = StreamProcessor::recover(Engine::new(1, config()), log.clone()).await.unwrap();
        processor.write_command(create_variable("a"), 1).await.unwrap();
        log.fail_next_appends(3);
        let err = processor.process_next().await.unwrap_err();
        assert!(matches!(err, EngineError::StorageExhausted { attempts: 3, .. }));
        assert_eq!(processor.state().cluster_variables.len(), 0);
    }
}
