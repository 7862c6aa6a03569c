use crate::config::WriteGroupConfig;
use crate::error::WriteError;
use crate::flush::{ColumnFamilyId, FlushHook};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use ticket::{Admission, WriteTicket};
use tracing::{debug, trace};

/// Shared write-path state guarded by the coordinator's outer mutex: the
/// FIFO admission queue (front = current leader) and the parallel cohort.
pub struct WriterQueue {
    pub(crate) writers: VecDeque<Arc<WriteTicket>>,
    pub(crate) cohort: Vec<Arc<WriteTicket>>,
}

impl WriterQueue {
    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    pub fn cohort_len(&self) -> usize {
        self.cohort.len()
    }

    fn front_is(&self, w: &Arc<WriteTicket>) -> bool {
        self.writers.front().is_some_and(|front| Arc::ptr_eq(front, w))
    }
}

/// Serializes write requests arriving from many threads into leader-driven
/// batch groups, with an optional parallel execution phase per group.
///
/// Every operation except `report_parallel_run_finish` and
/// `end_parallel_run` runs under the outer mutex; the `&mut MutexGuard`
/// parameter is the proof that it is held. Callers that share engine state
/// with the write path hold the same guard across their own work.
pub struct WriteCoordinator {
    shared: Mutex<WriterQueue>,
    /// Executors still running in the current parallel phase. Readable
    /// without the outer mutex; set and reset only by the phase leader.
    unfinished_writers: AtomicU32,
    config: WriteGroupConfig,
}

impl WriteCoordinator {
    pub fn new(config: WriteGroupConfig) -> Self {
        Self {
            shared: Mutex::new(WriterQueue {
                writers: VecDeque::new(),
                cohort: Vec::new(),
            }),
            unfinished_writers: AtomicU32::new(0),
            config,
        }
    }

    pub fn config(&self) -> &WriteGroupConfig {
        &self.config
    }

    /// Acquires the outer mutex.
    pub fn lock(&self) -> MutexGuard<'_, WriterQueue> {
        self.shared.lock()
    }

    /// Admits `w` into the writer queue and blocks until its work is done,
    /// it is promoted into a parallel cohort, it reaches the queue front,
    /// or `deadline` elapses.
    ///
    /// A deadline that trips while `w` is already folded into a running
    /// group is ignored: the work is being performed on `w`'s behalf, so
    /// the wait becomes infinite. A genuine timeout detaches `w` from the
    /// queue and wakes the new front, which may otherwise wait forever.
    pub fn enter_write_thread(
        &self,
        queue: &mut MutexGuard<'_, WriterQueue>,
        w: &Arc<WriteTicket>,
        mut deadline: Option<Instant>,
    ) -> Result<Admission, WriteError> {
        queue.writers.push_back(Arc::clone(w));

        let mut timed_out = false;
        while !w.is_done() && w.parallel_execute_id() == 0 && !queue.front_is(w) {
            match deadline {
                None => w.cv.wait(queue),
                Some(at) => {
                    if w.cv.wait_until(queue, at).timed_out() {
                        if w.is_in_batch_group() {
                            // The front writer is performing this write on
                            // our behalf; wait for it to finish.
                            deadline = None;
                        } else {
                            timed_out = true;
                            break;
                        }
                    }
                }
            }
        }

        if !w.is_done() && w.parallel_execute_id() > 0 {
            return Ok(Admission::ParallelMember);
        }

        if timed_out {
            let position = queue.writers.iter().position(|q| Arc::ptr_eq(q, w));
            debug_assert!(position.is_some(), "timed-out writer missing from queue");
            if let Some(idx) = position {
                queue.writers.remove(idx);
            }
            // The new front may be waiting without a deadline; nobody else
            // will wake it.
            if let Some(front) = queue.writers.front() {
                front.cv.notify_one();
            }
            trace!(queue_len = queue.len(), "write admission timed out");
            return Err(WriteError::Timeout);
        }

        if w.is_done() {
            Ok(Admission::Completed)
        } else {
            Ok(Admission::Leader)
        }
    }

    /// Folds eligible followers behind `leader` into one group. See
    /// [`BatchGroup`] for the output shape.
    pub fn build_batch_group(
        &self,
        queue: &mut MutexGuard<'_, WriterQueue>,
        leader: &Arc<WriteTicket>,
    ) -> BatchGroup {
        group::build_batch_group(queue, &self.config, leader)
    }

    /// Completes a serially executed group: pops the queue front through
    /// `last_writer`, copying `status` into every member other than the
    /// leader and waking it, then wakes the new queue front if any.
    pub fn exit_write_thread(
        &self,
        queue: &mut MutexGuard<'_, WriterQueue>,
        leader: &Arc<WriteTicket>,
        last_writer: &Arc<WriteTicket>,
        status: &Result<(), WriteError>,
    ) {
        while let Some(ready) = queue.writers.pop_front() {
            if !Arc::ptr_eq(&ready, leader) {
                ready.set_status(status.clone());
                ready.done.store(true, Ordering::Release);
                ready.cv.notify_one();
            }
            if Arc::ptr_eq(&ready, last_writer) {
                break;
            }
        }

        if let Some(front) = queue.writers.front() {
            front.cv.notify_one();
        }
    }

    /// Promotes the queue prefix `[front ..= last_writer]` into a parallel
    /// cohort of `num_threads` executors. Each member gets a
    /// `parallel_execute_id` starting at 1 and advancing by its batch's
    /// operation count, so every operation owns a distinct virtual sequence
    /// slot within the phase. All members except `last_writer` are popped;
    /// `last_writer` stays at the front so later arrivals cannot elect a
    /// new leader until [`Self::leader_end_parallel`] runs.
    pub fn start_parallel_run(
        &self,
        queue: &mut MutexGuard<'_, WriterQueue>,
        leader: &Arc<WriteTicket>,
        num_threads: u32,
        last_writer: &Arc<WriteTicket>,
    ) {
        debug_assert_eq!(
            self.unfinished_writers.load(Ordering::Acquire),
            0,
            "parallel phase already running"
        );
        self.unfinished_writers.store(num_threads, Ordering::Release);
        debug!(cohort = num_threads, "starting parallel write phase");

        let mut next_id: u64 = 1;
        loop {
            let Some(front) = queue.writers.front() else {
                break;
            };
            let member = Arc::clone(front);
            member.parallel_execute_id.store(next_id, Ordering::Release);
            next_id += member
                .batch()
                .expect("parallel cohort member must carry a batch")
                .count();
            queue.cohort.push(Arc::clone(&member));
            if !Arc::ptr_eq(&member, leader) {
                member.cv.notify_one();
            }
            if Arc::ptr_eq(&member, last_writer) {
                // Leave the last member in place so the next queued writer
                // does not become a leader mid-phase.
                break;
            }
            queue.writers.pop_front();
        }

        debug_assert_eq!(queue.cohort.len() as u32, num_threads);
    }

    /// Reports one cohort executor as finished. Lock-free; returns true
    /// exactly for the caller that drops the count from 1 to 0 — the last
    /// finisher, which must wake the leader.
    pub fn report_parallel_run_finish(&self) -> bool {
        self.unfinished_writers.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Run by every non-leader cohort member after executing its batch.
    /// Wakes the cohort leader when asked, then parks on the member's
    /// private condition until the leader marks it done.
    ///
    /// The wakeup can race with the leader already having observed the
    /// zero count and left: the signal then reaches a ticket nobody waits
    /// on, which is a no-op — every waiter re-checks its predicate under
    /// the mutex.
    pub fn end_parallel_run(&self, w: &Arc<WriteTicket>, need_wake_up_leader: bool) {
        if need_wake_up_leader {
            let queue = self.shared.lock();
            if let Some(cohort_leader) = queue.cohort.first() {
                cohort_leader.cv.notify_one();
            }
            drop(queue);
        }

        let mut guard = w.self_mutex.lock();
        while !w.is_done() {
            w.self_cv.wait(&mut guard);
        }
    }

    /// Blocks the cohort leader until every executor has reported.
    pub fn leader_wait_end_parallel(
        &self,
        queue: &mut MutexGuard<'_, WriterQueue>,
        leader: &Arc<WriteTicket>,
    ) {
        while self.unfinished_writers.load(Ordering::Acquire) != 0 {
            leader.cv.wait(queue);
        }
    }

    /// Cohort cleanup, run by the leader once `unfinished` hit zero: merge
    /// every member's touched column families into the leader's set,
    /// release each member from its completion wait, consult the flush
    /// hook for the merged set, then pop `last_writer` and wake the new
    /// queue front.
    pub fn leader_end_parallel(
        &self,
        queue: &mut MutexGuard<'_, WriterQueue>,
        leader: &Arc<WriteTicket>,
        last_writer: &Arc<WriteTicket>,
        flush_hook: &mut dyn FlushHook,
    ) {
        debug_assert_eq!(
            self.unfinished_writers.load(Ordering::Acquire),
            0,
            "cohort executors still running"
        );

        let cohort = std::mem::take(&mut queue.cohort);
        debug_assert!(cohort.last().is_some_and(|back| Arc::ptr_eq(back, last_writer)));
        debug_assert!(queue.front_is(last_writer));

        for member in &cohort {
            if Arc::ptr_eq(member, leader) {
                continue;
            }
            let theirs = member.cfd_set.lock().clone();
            leader.cfd_set.lock().extend(theirs);

            // The member may not be parked yet; setting done under its
            // private mutex keeps the handoff race-free either way.
            let guard = member.self_mutex.lock();
            member.done.store(true, Ordering::Release);
            member.self_cv.notify_one();
            drop(guard);
        }

        let touched: Vec<ColumnFamilyId> = leader.cfd_set.lock().iter().copied().collect();
        for cf in touched {
            if flush_hook.should_schedule_flush(cf) {
                flush_hook.schedule_flush(cf);
                flush_hook.mark_flush_scheduled(cf);
            }
        }

        queue.writers.pop_front();
        if let Some(front) = queue.writers.front() {
            front.cv.notify_one();
        }
        trace!(queue_len = queue.len(), "parallel write phase finished");
    }
}

mod group;
pub mod ticket;

pub use group::BatchGroup;
