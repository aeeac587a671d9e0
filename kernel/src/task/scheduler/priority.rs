//! Priority scheduling: max-heap on task priority, FIFO among equals.
//!
//! Priority is sampled when the task is enqueued; a sequence number
//! breaks ties so equal-priority tasks leave in arrival order.

use super::Scheduler;
use crate::task::{Pid, Task, TaskState};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

struct Entry {
    priority: i32,
    seq: u64,
    task: Arc<Task>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority wins; earlier arrival wins among equals.
        self.priority.cmp(&other.priority).then(other.seq.cmp(&self.seq))
    }
}

/// Max-heap ready set keyed by task priority.
pub struct PriorityScheduler {
    heap: BinaryHeap<Entry>,
    members: HashSet<Pid>,
    slice: u64,
    next_seq: u64,
}

impl PriorityScheduler {
    pub fn new(slice: u64) -> Self {
        PriorityScheduler { heap: BinaryHeap::new(), members: HashSet::new(), slice, next_seq: 0 }
    }

    fn push(&mut self, task: Arc<Task>) {
        let priority = task.lock().priority;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { priority, seq, task });
    }
}

impl Scheduler for PriorityScheduler {
    fn add_task(&mut self, task: Arc<Task>) {
        debug_assert_eq!(task.state(), TaskState::Ready);
        if self.members.insert(task.pid()) {
            self.push(task);
        }
    }

    fn remove_task(&mut self, pid: Pid) {
        if self.members.remove(&pid) {
            self.heap.retain(|e| e.task.pid() != pid);
        }
    }

    fn schedule(&mut self) -> Option<Arc<Task>> {
        let entry = self.heap.pop()?;
        self.members.remove(&entry.task.pid());
        Some(entry.task)
    }

    fn time_slice(&self) -> u64 {
        self.slice
    }

    fn ready_snapshot(&self) -> Vec<Arc<Task>> {
        self.heap.iter().map(|e| e.task.clone()).collect()
    }

    fn enqueue_unchecked(&mut self, task: Arc<Task>) {
        self.members.insert(task.pid());
        self.push(task);
    }
}
