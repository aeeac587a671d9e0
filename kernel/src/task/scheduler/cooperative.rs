//! Cooperative scheduling: FIFO order, unbounded slice.
//!
//! A task runs until it waits, yields, or exits; the dispatcher never
//! preempts on instruction count because the slice is `u64::MAX`.

use super::Scheduler;
use crate::task::{Pid, Task, TaskState};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// FIFO ready queue without preemption.
pub struct Cooperative {
    queue: VecDeque<Arc<Task>>,
    members: HashSet<Pid>,
}

impl Cooperative {
    pub fn new() -> Self {
        Cooperative { queue: VecDeque::new(), members: HashSet::new() }
    }
}

impl Default for Cooperative {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for Cooperative {
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
        u64::MAX
    }

    fn ready_snapshot(&self) -> Vec<Arc<Task>> {
        self.queue.iter().cloned().collect()
    }

    fn enqueue_unchecked(&mut self, task: Arc<Task>) {
        self.members.insert(task.pid());
        self.queue.push_back(task);
    }
}
