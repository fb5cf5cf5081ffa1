//! streamflow-core: a partitioned, log-based BPMN workflow engine.
//!
//! Commands are appended to a partition log and processed one at a time by
//! that partition's stream processor, which writes the resulting events,
//! rejections and follow-up commands back to the same log. State is a pure
//! function of the log:
//! - `record` - record envelope, typed payloads and the binary codec
//! - `log` - append-only partition log
//! - `engine` / `stream` - command dispatch and the single-writer processor
//! - `bpmn`, `job`, `timer`, `message`, `incident` - process execution
//! - `deployment`, `decision`, `cluster_variable`, `identity` - resources
//!   managed on the deployment partition and distributed to the others
//! - `partition` - tokio runtime of a broker's partitions
//! - `harness` - deterministic driver for tests

pub mod auth;
pub mod bpmn;
pub mod clock;
pub mod cluster_variable;
pub mod config;
pub mod decision;
pub mod deployment;
pub mod engine;
pub mod error;
pub mod harness;
pub mod identity;
pub mod incident;
pub mod job;
pub mod log;
pub(crate) mod message;
pub mod model;
pub mod partition;
pub mod record;
pub mod state;
pub mod stream;
pub mod timer;
pub mod types;

pub use clock::{Clock, ControlledClock, SystemClock};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Rejection};
pub use harness::EngineHarness;
pub use partition::{Cluster, CommandResponse};
pub use record::{Record, RecordType, RejectionType, ValueType};
pub use stream::StreamProcessor;
