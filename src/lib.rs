pub mod batch;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod flush;

pub use crate::batch::{BatchOp, WriteBatch};
pub use crate::config::WriteGroupConfig;
pub use crate::coordinator::ticket::{Admission, PreWriteCallback, WriteOptions, WriteTicket};
pub use crate::coordinator::{BatchGroup, WriteCoordinator, WriterQueue};
pub use crate::engine::{BatchSink, EngineMetrics, MemSink, WriteEngine};
pub use crate::error::{WriteError, WriteErrorCode};
pub use crate::flush::{ColumnFamilyId, FlushHook, FlushQueue};
