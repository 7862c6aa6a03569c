use std::collections::{BTreeSet, HashMap, VecDeque};

/// Identifies a column family, a keyed sub-namespace of the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnFamilyId(pub u32);

/// Decision surface the write path consults after a parallel group lands:
/// whether a column family's memtable wants a background flush, plus the
/// bookkeeping for handing it off. Called by the group leader with the
/// write queue lock held, so implementations must not block.
pub trait FlushHook {
    fn should_schedule_flush(&self, cf: ColumnFamilyId) -> bool;
    fn schedule_flush(&mut self, cf: ColumnFamilyId);
    fn mark_flush_scheduled(&mut self, cf: ColumnFamilyId);
}

/// Byte-threshold flush tracker: accumulates applied bytes per column
/// family and queues a family for background flushing once it crosses the
/// threshold. A family already marked scheduled is not re-queued until the
/// pending flush is taken.
#[derive(Debug)]
pub struct FlushQueue {
    threshold_bytes: usize,
    accumulated: HashMap<ColumnFamilyId, usize>,
    scheduled: BTreeSet<ColumnFamilyId>,
    pending: VecDeque<ColumnFamilyId>,
}

impl FlushQueue {
    pub fn new(threshold_bytes: usize) -> Self {
        Self {
            threshold_bytes,
            accumulated: HashMap::new(),
            scheduled: BTreeSet::new(),
            pending: VecDeque::new(),
        }
    }

    /// Records bytes applied to `cf`.
    pub fn record_write(&mut self, cf: ColumnFamilyId, bytes: usize) {
        *self.accumulated.entry(cf).or_insert(0) += bytes;
    }

    /// Hands the next family to the background flusher, clearing its
    /// accumulation and its scheduled mark.
    pub fn take_pending(&mut self) -> Option<ColumnFamilyId> {
        let cf = self.pending.pop_front()?;
        self.scheduled.remove(&cf);
        self.accumulated.remove(&cf);
        Some(cf)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn accumulated_bytes(&self, cf: ColumnFamilyId) -> usize {
        self.accumulated.get(&cf).copied().unwrap_or(0)
    }
}

impl FlushHook for FlushQueue {
    fn should_schedule_flush(&self, cf: ColumnFamilyId) -> bool {
        !self.scheduled.contains(&cf) && self.accumulated_bytes(cf) >= self.threshold_bytes
    }

    fn schedule_flush(&mut self, cf: ColumnFamilyId) {
        self.pending.push_back(cf);
    }

    fn mark_flush_scheduled(&mut self, cf: ColumnFamilyId) {
        self.scheduled.insert(cf);
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnFamilyId, FlushHook, FlushQueue};

    const CF: ColumnFamilyId = ColumnFamilyId(7);

    #[test]
    fn schedules_only_past_threshold() {
        let mut queue = FlushQueue::new(1024);
        queue.record_write(CF, 1000);
        assert!(!queue.should_schedule_flush(CF));
        queue.record_write(CF, 24);
        assert!(queue.should_schedule_flush(CF));
    }

    #[test]
    fn scheduled_mark_suppresses_requeue_until_taken() {
        let mut queue = FlushQueue::new(64);
        queue.record_write(CF, 128);
        assert!(queue.should_schedule_flush(CF));
        queue.schedule_flush(CF);
        queue.mark_flush_scheduled(CF);

        queue.record_write(CF, 128);
        assert!(!queue.should_schedule_flush(CF));
        assert_eq!(queue.pending_len(), 1);

        assert_eq!(queue.take_pending(), Some(CF));
        assert_eq!(queue.take_pending(), None);
        assert_eq!(queue.accumulated_bytes(CF), 0);

        queue.record_write(CF, 128);
        assert!(queue.should_schedule_flush(CF));
    }
}
