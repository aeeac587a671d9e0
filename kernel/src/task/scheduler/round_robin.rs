//! Round-robin scheduling: plain FIFO with a fixed instruction slice.

use super::Scheduler;
use crate::task::{Pid, Task, TaskState};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// FIFO ready queue with duplicate protection.
pub struct RoundRobin {
    queue: VecDeque<Arc<Task>>,
    members: HashSet<Pid>,
    slice: u64,
}

impl RoundRobin {
    pub fn new(slice: u64) -> Self {
        RoundRobin { queue: VecDeque::new(), members: HashSet::new(), slice }
    }
}

impl Scheduler for RoundRobin {
    fn add_task(&mut self, task: Arc<Task>) {
        debug_assert_eq!(task.state(), TaskState::Ready);
        if self.members.insert(task.pid()) {
            self.queue.push_back(task);
        }
    }

    fn remove_task(&mut self, pid: Pid) {
        if self.members.remove(&pid) {
            self.queue.retain(|t| t.pid() != pid);
        }
    }

    fn schedule(&mut self) -> Option<Arc<Task>> {
        let task = self.queue.pop_front()?;
        self.members.remove(&task.pid());
        Some(task)
    }

    fn time_slice(&self) -> u64 {
        self.slice
    }

    fn ready_snapshot(&self) -> Vec<Arc<Task>> {
        self.queue.iter().cloned().collect()
    }

    fn enqueue_unchecked(&mut self, task: Arc<Task>) {
        self.members.insert(task.pid());
        self.queue.push_back(task);
    }
}
