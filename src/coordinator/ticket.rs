use crate::batch::WriteBatch;
use crate::error::WriteError;
use crate::flush::ColumnFamilyId;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Per-request options honored by admission and batch grouping.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Demand a durable sync before the write completes.
    pub sync: bool,
    /// Bypass the write-ahead log.
    pub disable_wal: bool,
    /// Soft deadline for admission; `None` waits forever.
    pub timeout_hint: Option<Duration>,
}

/// Pre-write predicate evaluated before the batch lands. A request carrying
/// one can fail independently of its neighbors, so it is never folded into
/// another leader's group.
pub trait PreWriteCallback: Send + Sync {
    fn check(&self) -> Result<(), WriteError>;
}

/// How a request left admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Another leader already executed this request; the status slot holds
    /// the outcome and the caller must not touch the queue.
    Completed,
    /// Promoted into a parallel cohort: execute your own batch, then run
    /// the completion handoff.
    ParallelMember,
    /// Front of the queue: build a group and drive it.
    Leader,
}

/// One write request's handle through the coordinator. Created by the
/// calling thread and shared with the queue as `Arc`; the queue drops its
/// clones before the owner observes `done`, so the owner's handle is the
/// last one standing.
pub struct WriteTicket {
    batch: Option<WriteBatch>,
    options: WriteOptions,
    callback: Option<Box<dyn PreWriteCallback>>,
    /// Column families touched so far; the cohort leader folds every
    /// member's set into its own after a parallel phase.
    pub(crate) cfd_set: Mutex<BTreeSet<ColumnFamilyId>>,
    pub(crate) done: AtomicBool,
    status: Mutex<Result<(), WriteError>>,
    pub(crate) in_batch_group: AtomicBool,
    pub(crate) parallel_execute_id: AtomicU64,
    /// Waits on the coordinator's outer mutex.
    pub(crate) cv: Condvar,
    /// Private pair for the parallel completion handoff only.
    pub(crate) self_mutex: Mutex<()>,
    pub(crate) self_cv: Condvar,
}

impl WriteTicket {
    pub fn new(batch: WriteBatch, options: WriteOptions) -> Self {
        Self::build(Some(batch), options, None)
    }

    pub fn with_callback(
        batch: WriteBatch,
        options: WriteOptions,
        callback: Box<dyn PreWriteCallback>,
    ) -> Self {
        Self::build(Some(batch), options, Some(callback))
    }

    /// A request without a batch: never folded, always runs alone.
    pub fn solo(options: WriteOptions) -> Self {
        Self::build(None, options, None)
    }

    fn build(
        batch: Option<WriteBatch>,
        options: WriteOptions,
        callback: Option<Box<dyn PreWriteCallback>>,
    ) -> Self {
        let cfds = batch
            .as_ref()
            .map(|b| b.bytes_by_family().into_keys().collect())
            .unwrap_or_default();
        Self {
            batch,
            options,
            callback,
            cfd_set: Mutex::new(cfds),
            done: AtomicBool::new(false),
            status: Mutex::new(Ok(())),
            in_batch_group: AtomicBool::new(false),
            parallel_execute_id: AtomicU64::new(0),
            cv: Condvar::new(),
            self_mutex: Mutex::new(()),
            self_cv: Condvar::new(),
        }
    }

    pub fn batch(&self) -> Option<&WriteBatch> {
        self.batch.as_ref()
    }

    pub fn options(&self) -> &WriteOptions {
        &self.options
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub fn callback(&self) -> Option<&dyn PreWriteCallback> {
        self.callback.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn is_in_batch_group(&self) -> bool {
        self.in_batch_group.load(Ordering::Acquire)
    }

    /// Positive once promoted into a parallel cohort; doubles as the first
    /// virtual sequence slot of this request's batch within the phase.
    pub fn parallel_execute_id(&self) -> u64 {
        self.parallel_execute_id.load(Ordering::Acquire)
    }

    /// Terminal status; `Ok` until some thread records a failure.
    pub fn status(&self) -> Result<(), WriteError> {
        self.status.lock().clone()
    }

    pub fn set_status(&self, status: Result<(), WriteError>) {
        *self.status.lock() = status;
    }

    /// Column families this request has touched so far.
    pub fn column_families(&self) -> BTreeSet<ColumnFamilyId> {
        self.cfd_set.lock().clone()
    }
}
