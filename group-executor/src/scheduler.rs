//! Work queue handing groups to worker threads.

use crate::types::GroupIndex;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Task for a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Execute the group at this index.
    Execute(GroupIndex),
    /// Nothing left to hand out.
    Done,
}

/// Scheduler for one fan-out/fan-in round.
///
/// Groups have no dependencies on each other, so every group is ready from
/// the start. Larger groups are handed out first to shorten the tail of the
/// round; acceptance order is decided later by the resolver and does not
/// depend on execution order.
pub struct Scheduler {
    /// Groups not yet handed out.
    ready_queue: Mutex<VecDeque<GroupIndex>>,

    /// Set once a worker hit an unrecoverable error.
    halted: AtomicBool,
}

impl Scheduler {
    /// Creates a scheduler for groups of the given sizes, in grouper order.
    pub fn new(group_sizes: &[usize]) -> Self {
        let mut order: Vec<GroupIndex> = (0..group_sizes.len()).collect();
        // Stable sort: equal sizes keep grouper order.
        order.sort_by(|a, b| group_sizes[*b].cmp(&group_sizes[*a]));

        Self {
            ready_queue: Mutex::new(order.into()),
            halted: AtomicBool::new(false),
        }
    }

    /// Gets the next task for a worker thread.
    pub fn next_task(&self) -> Task {
        if self.halted.load(Ordering::Acquire) {
            return Task::Done;
        }
        match self.ready_queue.lock().pop_front() {
            Some(group_idx) => Task::Execute(group_idx),
            None => Task::Done,
        }
    }

    /// Stops handing out groups. Groups already picked up run to completion.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    /// Number of groups never handed out.
    pub fn remaining(&self) -> usize {
        self.ready_queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_larger_groups_first_ties_in_grouper_order() {
        let scheduler = Scheduler::new(&[1, 3, 1, 3]);

        assert_eq!(scheduler.next_task(), Task::Execute(1));
        assert_eq!(scheduler.next_task(), Task::Execute(3));
        assert_eq!(scheduler.next_task(), Task::Execute(0));
        assert_eq!(scheduler.next_task(), Task::Execute(2));
        assert_eq!(scheduler.next_task(), Task::Done);
        assert_eq!(scheduler.remaining(), 0);
    }

    #[test]
    fn test_halt_stops_handing_out_groups() {
        let scheduler = Scheduler::new(&[1, 1, 1]);
        assert_eq!(scheduler.next_task(), Task::Execute(0));

        scheduler.halt();
        assert_eq!(scheduler.next_task(), Task::Done);
        assert_eq!(scheduler.remaining(), 2);
    }

    #[test]
    fn test_empty_round() {
        let scheduler = Scheduler::new(&[]);
        assert_eq!(scheduler.next_task(), Task::Done);
        assert_eq!(scheduler.remaining(), 0);
    }
}
