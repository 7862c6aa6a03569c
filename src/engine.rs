use crate::batch::{BatchOp, WriteBatch};
use crate::config::WriteGroupConfig;
use crate::coordinator::ticket::{Admission, PreWriteCallback, WriteOptions, WriteTicket};
use crate::coordinator::{BatchGroup, WriteCoordinator, WriterQueue};
use crate::error::WriteError;
use crate::flush::{ColumnFamilyId, FlushHook, FlushQueue};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

const DEFAULT_FLUSH_THRESHOLD_BYTES: usize = 4 << 20;

/// Destination for executed batches. `first_seq` is the first sequence
/// slot assigned to the batch; each record operation consumes one slot.
pub trait BatchSink: Send + Sync {
    fn apply(&self, batch: &WriteBatch, first_seq: u64) -> Result<(), WriteError>;

    /// Make previously applied writes durable. Invoked when a group leader
    /// carries the `sync` option.
    fn sync(&self) -> Result<(), WriteError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineMetrics {
    pub writes_total: u64,
    pub groups_led: u64,
    pub writers_folded: u64,
    pub parallel_phases: u64,
    pub admission_timeouts: u64,
}

#[derive(Debug, Default)]
struct EngineTelemetry {
    writes_total: AtomicU64,
    groups_led: AtomicU64,
    writers_folded: AtomicU64,
    parallel_phases: AtomicU64,
    admission_timeouts: AtomicU64,
}

/// Drives the full write protocol against a sink: admission, leader-built
/// batch groups, the optional parallel phase, and flush bookkeeping.
pub struct WriteEngine<S: BatchSink> {
    coordinator: WriteCoordinator,
    sink: S,
    flush: Mutex<FlushQueue>,
    last_seq: AtomicU64,
    /// First sequence slot of the running parallel phase; members add
    /// `parallel_execute_id - 1` to place their own batch.
    parallel_base_seq: AtomicU64,
    shutting_down: AtomicBool,
    telemetry: EngineTelemetry,
}

impl<S: BatchSink> WriteEngine<S> {
    pub fn new(config: WriteGroupConfig, sink: S) -> Self {
        Self::with_flush_threshold(config, sink, DEFAULT_FLUSH_THRESHOLD_BYTES)
    }

    pub fn with_flush_threshold(
        config: WriteGroupConfig,
        sink: S,
        flush_threshold_bytes: usize,
    ) -> Self {
        Self {
            coordinator: WriteCoordinator::new(config),
            sink,
            flush: Mutex::new(FlushQueue::new(flush_threshold_bytes)),
            last_seq: AtomicU64::new(0),
            parallel_base_seq: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            telemetry: EngineTelemetry::default(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn coordinator(&self) -> &WriteCoordinator {
        &self.coordinator
    }

    /// Refuse new writes. Writes already admitted run to completion.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    /// Last sequence slot handed out.
    pub fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::Acquire)
    }

    /// Next column family awaiting a background flush, if any.
    pub fn take_pending_flush(&self) -> Option<ColumnFamilyId> {
        self.flush.lock().take_pending()
    }

    pub fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            writes_total: self.telemetry.writes_total.load(Ordering::Relaxed),
            groups_led: self.telemetry.groups_led.load(Ordering::Relaxed),
            writers_folded: self.telemetry.writers_folded.load(Ordering::Relaxed),
            parallel_phases: self.telemetry.parallel_phases.load(Ordering::Relaxed),
            admission_timeouts: self.telemetry.admission_timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn write(&self, batch: WriteBatch, options: WriteOptions) -> Result<(), WriteError> {
        if batch.is_empty() {
            return Err(WriteError::EmptyBatch);
        }
        self.submit(Arc::new(WriteTicket::new(batch, options)))
    }

    pub fn write_with_callback(
        &self,
        batch: WriteBatch,
        options: WriteOptions,
        callback: Box<dyn PreWriteCallback>,
    ) -> Result<(), WriteError> {
        if batch.is_empty() {
            return Err(WriteError::EmptyBatch);
        }
        self.submit(Arc::new(WriteTicket::with_callback(batch, options, callback)))
    }

    fn submit(&self, ticket: Arc<WriteTicket>) -> Result<(), WriteError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(WriteError::ShuttingDown);
        }
        self.telemetry.writes_total.fetch_add(1, Ordering::Relaxed);
        let deadline = ticket.options().timeout_hint.map(|hint| Instant::now() + hint);

        let mut queue = self.coordinator.lock();
        let admission = match self.coordinator.enter_write_thread(&mut queue, &ticket, deadline) {
            Ok(admission) => admission,
            Err(err) => {
                self.telemetry
                    .admission_timeouts
                    .fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };
        match admission {
            Admission::Completed => {
                drop(queue);
                ticket.status()
            }
            Admission::ParallelMember => {
                drop(queue);
                self.finish_as_cohort_member(&ticket)
            }
            Admission::Leader => self.lead(queue, &ticket),
        }
    }

    fn lead(
        &self,
        mut queue: MutexGuard<'_, WriterQueue>,
        leader: &Arc<WriteTicket>,
    ) -> Result<(), WriteError> {
        self.telemetry.groups_led.fetch_add(1, Ordering::Relaxed);
        let group = self.coordinator.build_batch_group(&mut queue, leader);
        self.telemetry
            .writers_folded
            .fetch_add(group.len() as u64 - 1, Ordering::Relaxed);

        if let Some(callback) = leader.callback() {
            // The group is exactly the leader here, so failing it touches
            // no other writer.
            if let Err(err) = callback.check() {
                self.coordinator
                    .exit_write_thread(&mut queue, leader, &group.last_writer, &Err(err.clone()));
                drop(queue);
                return Err(err);
            }
        }

        let config = self.coordinator.config();
        let promote = config.parallel_enabled
            && !leader.options().sync
            && group.len() >= config.parallel_min_writers;
        if promote {
            self.lead_parallel(queue, leader, &group)
        } else {
            self.lead_serial(queue, leader, &group)
        }
    }

    fn lead_serial(
        &self,
        queue: MutexGuard<'_, WriterQueue>,
        leader: &Arc<WriteTicket>,
        group: &BatchGroup,
    ) -> Result<(), WriteError> {
        drop(queue);

        let first_seq = self.last_seq.fetch_add(group.total_ops(), Ordering::SeqCst) + 1;
        let mut seq = first_seq;
        let mut status = Ok(());
        for member in &group.members {
            let batch = member.batch().expect("grouped writer must carry a batch");
            if let Err(err) = self.sink.apply(batch, seq) {
                status = Err(err);
                break;
            }
            seq += batch.count();
        }
        if status.is_ok() && leader.options().sync {
            status = self.sink.sync();
        }
        if status.is_ok() {
            // The flush hook pass only runs after a parallel phase; serial
            // groups schedule directly here.
            let mut touched: BTreeMap<ColumnFamilyId, usize> = BTreeMap::new();
            for member in &group.members {
                let batch = member.batch().expect("grouped writer must carry a batch");
                for (cf, bytes) in batch.bytes_by_family() {
                    *touched.entry(cf).or_insert(0) += bytes;
                }
            }
            let mut flush = self.flush.lock();
            for (cf, bytes) in touched {
                flush.record_write(cf, bytes);
                if flush.should_schedule_flush(cf) {
                    flush.schedule_flush(cf);
                    flush.mark_flush_scheduled(cf);
                }
            }
        }

        let mut queue = self.coordinator.lock();
        self.coordinator
            .exit_write_thread(&mut queue, leader, &group.last_writer, &status);
        drop(queue);
        status
    }

    fn lead_parallel(
        &self,
        mut queue: MutexGuard<'_, WriterQueue>,
        leader: &Arc<WriteTicket>,
        group: &BatchGroup,
    ) -> Result<(), WriteError> {
        self.telemetry.parallel_phases.fetch_add(1, Ordering::Relaxed);
        trace!(members = group.len(), bytes = group.total_bytes, "promoting group");

        let base_seq = self.last_seq.fetch_add(group.total_ops(), Ordering::SeqCst) + 1;
        self.parallel_base_seq.store(base_seq, Ordering::Release);
        self.coordinator
            .start_parallel_run(&mut queue, leader, group.len() as u32, &group.last_writer);
        drop(queue);

        let status = self.apply_own_batch(leader);
        leader.set_status(status.clone());
        self.coordinator.report_parallel_run_finish();

        let mut queue = self.coordinator.lock();
        self.coordinator.leader_wait_end_parallel(&mut queue, leader);
        {
            let mut flush = self.flush.lock();
            self.coordinator
                .leader_end_parallel(&mut queue, leader, &group.last_writer, &mut *flush);
        }
        drop(queue);
        status
    }

    /// Executes one cohort member's own batch at its virtual sequence slot
    /// and accounts the applied bytes toward flushing.
    fn apply_own_batch(&self, w: &Arc<WriteTicket>) -> Result<(), WriteError> {
        let batch = w.batch().expect("parallel cohort member must carry a batch");
        let first_seq = self.parallel_base_seq.load(Ordering::Acquire) + w.parallel_execute_id() - 1;
        let status = self.sink.apply(batch, first_seq);
        if status.is_ok() {
            let mut flush = self.flush.lock();
            for (cf, bytes) in batch.bytes_by_family() {
                flush.record_write(cf, bytes);
            }
        }
        status
    }

    fn finish_as_cohort_member(&self, w: &Arc<WriteTicket>) -> Result<(), WriteError> {
        let status = self.apply_own_batch(w);
        w.set_status(status.clone());
        let last_finisher = self.coordinator.report_parallel_run_finish();
        self.coordinator.end_parallel_run(w, last_finisher);
        status
    }
}

/// In-memory sink for tests and benchmarks: applies records into per-family
/// ordered maps and counts activity. Not a storage engine.
#[derive(Debug, Default)]
pub struct MemSink {
    families: Mutex<HashMap<ColumnFamilyId, BTreeMap<Vec<u8>, Vec<u8>>>>,
    applies_started: AtomicU64,
    batches_applied: AtomicU64,
    ops_applied: AtomicU64,
    max_seq_seen: AtomicU64,
    syncs: AtomicU64,
    fail_writes: AtomicBool,
    apply_delay: Option<Duration>,
}

impl MemSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that sleeps inside every apply, holding its group's leader busy
    /// long enough for followers to pile up behind it.
    pub fn with_apply_delay(delay: Duration) -> Self {
        Self {
            apply_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn get(&self, cf: ColumnFamilyId, key: &[u8]) -> Option<Vec<u8>> {
        self.families.lock().get(&cf).and_then(|m| m.get(key).cloned())
    }

    /// Applies entered, including ones still sleeping or about to fail.
    pub fn applies_started(&self) -> u64 {
        self.applies_started.load(Ordering::Acquire)
    }

    pub fn batches_applied(&self) -> u64 {
        self.batches_applied.load(Ordering::Acquire)
    }

    pub fn ops_applied(&self) -> u64 {
        self.ops_applied.load(Ordering::Acquire)
    }

    pub fn max_seq_seen(&self) -> u64 {
        self.max_seq_seen.load(Ordering::Acquire)
    }

    pub fn syncs(&self) -> u64 {
        self.syncs.load(Ordering::Acquire)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }
}

impl BatchSink for MemSink {
    fn apply(&self, batch: &WriteBatch, first_seq: u64) -> Result<(), WriteError> {
        self.applies_started.fetch_add(1, Ordering::AcqRel);
        if let Some(delay) = self.apply_delay {
            std::thread::sleep(delay);
        }
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(WriteError::from(std::io::Error::other("injected sink failure")));
        }

        let mut families = self.families.lock();
        for op in batch.ops() {
            match op {
                BatchOp::Put { cf, key, value } => {
                    families.entry(*cf).or_default().insert(key.clone(), value.clone());
                }
                BatchOp::Delete { cf, key } => {
                    families.entry(*cf).or_default().remove(key);
                }
            }
        }
        drop(families);

        self.batches_applied.fetch_add(1, Ordering::AcqRel);
        self.ops_applied.fetch_add(batch.count(), Ordering::AcqRel);
        self.max_seq_seen
            .fetch_max((first_seq + batch.count()).saturating_sub(1), Ordering::AcqRel);
        Ok(())
    }

    fn sync(&self) -> Result<(), WriteError> {
        self.syncs.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
