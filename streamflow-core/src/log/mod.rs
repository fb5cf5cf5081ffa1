//! Append-only partition log.
//!
//! The stream processor is the only writer of a partition log. Records are
//! assigned consecutive positions starting at 1 and become visible to
//! readers only once the whole appended batch is stored.

mod memory;

pub use memory::MemoryLog;

use crate::record::codec::CodecError;
use crate::record::Record;
use crate::types::{PartitionId, Position};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    /// Transient storage failure; the caller may retry the append.
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("corrupt record at position {position}: {source}")]
    Codec {
        position: Position,
        #[source]
        source: CodecError,
    },
    #[error("log of partition {0} is closed")]
    Closed(PartitionId),
}

impl LogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LogError::Storage(_))
    }
}

#[async_trait]
pub trait PartitionLog: Send + Sync {
    fn partition_id(&self) -> PartitionId;

    /// Appends all records atomically and returns the position of the first.
    /// Positions and the partition id are assigned by the log.
    async fn append(&self, records: Vec<Record>) -> Result<Position, LogError>;

    /// Reads up to `max` records starting at `from` (inclusive).
    async fn read_batch(&self, from: Position, max: usize) -> Result<Vec<Record>, LogError>;

    /// Position of the last appended record, 0 for an empty log.
    async fn last_position(&self) -> Result<Position, LogError>;
}

const READ_BATCH: usize = 256;

/// Lazy ordered reader over a partition log. Restartable through [`LogReader::seek`].
pub struct LogReader {
    log: Arc<dyn PartitionLog>,
    next_position: Position,
    buffer: VecDeque<Record>,
}

impl LogReader {
    pub fn new(log: Arc<dyn PartitionLog>, from: Position) -> Self {
        Self {
            log,
            next_position: from.max(1),
            buffer: VecDeque::new(),
        }
    }

    /// Position of the record the next call to [`LogReader::next`] returns.
    pub fn position(&self) -> Position {
        self.buffer
            .front()
            .map(|record| record.position)
            .unwrap_or(self.next_position)
    }

    pub fn seek(&mut self, position: Position) {
        self.buffer.clear();
        self.next_position = position.max(1);
    }

    pub async fn next(&mut self) -> Result<Option<Record>, LogError> {
        if self.buffer.is_empty() {
            let batch = self.log.read_batch(self.next_position, READ_BATCH).await?;
            if let Some(last) = batch.last() {
                self.next_position = last.position + 1;
            }
            self.buffer.extend(batch);
        }
        Ok(self.buffer.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{TimerIntent, TimerRecord};

    fn timer(key: i64) -> Record {
        Record::command(TimerIntent::Trigger, TimerRecord::default()).with_key(key)
    }

    #[tokio::test]
    async fn reader_sees_appends_made_after_it_was_exhausted() {
        let log: Arc<dyn PartitionLog> = Arc::new(MemoryLog::new(1));
        log.append(vec![timer(1), timer(2)]).await.unwrap();

        let mut reader = LogReader::new(log.clone(), 1);
        assert_eq!(reader.next().await.unwrap().unwrap().key, 1);
        assert_eq!(reader.next().await.unwrap().unwrap().key, 2);
        assert!(reader.next().await.unwrap().is_none());

        log.append(vec![timer(3)]).await.unwrap();
        let third = reader.next().await.unwrap().unwrap();
        assert_eq!(third.key, 3);
        assert_eq!(third.position, 3);
    }

    #[tokio::test]
    async fn seek_restarts_reading() {
        let log: Arc<dyn PartitionLog> = Arc::new(MemoryLog::new(1));
        log.append(vec![timer(1), timer(2), timer(3)]).await.unwrap();

        let mut reader = LogReader::new(log, 1);
        reader.next().await.unwrap();
        reader.next().await.unwrap();
        reader.seek(2);
        assert_eq!(reader.position(), 2);
        assert_eq!(reader.next().await.unwrap().unwrap().key, 2);
    }
}
