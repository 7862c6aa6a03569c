use super::WriterQueue;
use super::ticket::{WriteOptions, WriteTicket};
use crate::config::WriteGroupConfig;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// One combined group of writes, produced by the queue-front leader.
/// `members` is in arrival order with the leader first; the combined batch
/// sequence is exactly the members' batches in that order.
pub struct BatchGroup {
    pub members: Vec<Arc<WriteTicket>>,
    /// The last ticket folded into the group; the exit paths drain the
    /// queue through it.
    pub last_writer: Arc<WriteTicket>,
    /// Running byte total at the point the walk stopped. When the size cap
    /// ended the walk, this includes the follower that tripped it.
    pub total_bytes: usize,
}

impl BatchGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn total_ops(&self) -> u64 {
        self.members
            .iter()
            .filter_map(|w| w.batch())
            .map(|b| b.count())
            .sum()
    }
}

// An unbounded hint ranks lowest, exactly like the zero sentinel it
// stands for: no finite deadline stops under an unbounded leader, and an
// unbounded follower never folds under a finite-deadline one.
fn timeout_rank(options: &WriteOptions) -> Duration {
    options.timeout_hint.unwrap_or(Duration::ZERO)
}

/// Folds queue followers behind the front into one group, stopping at the
/// first follower that fails any eligibility rule.
///
/// REQUIRES: queue non-empty, `leader` at the front with a batch.
pub(super) fn build_batch_group(
    queue: &WriterQueue,
    config: &WriteGroupConfig,
    leader: &Arc<WriteTicket>,
) -> BatchGroup {
    debug_assert!(queue.writers.front().is_some_and(|f| Arc::ptr_eq(f, leader)));
    let leader_batch = leader.batch().expect("group leader must carry a batch");

    let leader_size = leader_batch.byte_size();
    let max_size = config.group_cap(leader_size);

    let mut size = leader_size;
    let mut members = vec![Arc::clone(leader)];
    let mut last_writer = Arc::clone(leader);

    // A leader with a pre-write predicate may abort its own write; nothing
    // else rides along with it.
    if leader.has_callback() {
        return BatchGroup {
            members,
            last_writer,
            total_bytes: size,
        };
    }

    for follower in queue.writers.iter().skip(1) {
        if follower.options().sync && !leader.options().sync {
            // Never let a non-sync leader carry a sync write.
            break;
        }
        if !follower.options().disable_wal && leader.options().disable_wal {
            // Never fold a write that needs the WAL into a group that
            // skips it.
            break;
        }
        if timeout_rank(follower.options()) < timeout_rank(leader.options()) {
            // A follower with a stricter deadline might have to be aborted;
            // the leader would execute it regardless.
            break;
        }
        if follower.has_callback() {
            break;
        }
        let Some(batch) = follower.batch() else {
            // No batch: not a write, wants to run alone.
            break;
        };
        size += batch.byte_size();
        if size > max_size {
            break;
        }
        follower.in_batch_group.store(true, Ordering::Release);
        members.push(Arc::clone(follower));
        last_writer = Arc::clone(follower);
    }

    BatchGroup {
        members,
        last_writer,
        total_bytes: size,
    }
}
