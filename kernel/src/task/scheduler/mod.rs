//! Pluggable schedulers over a single shared ready set.
//!
//! All concrete schedulers honour the same contract:
//!
//! - `add_task` is idempotent (a membership set rejects duplicates) and
//!   expects a READY task;
//! - `schedule` pops the next READY task or `None`, never a task a hart
//!   still holds (CPU ownership is enforced separately by the acquiring
//!   hart);
//! - `time_slice` is the instruction budget before forced preemption.
//!
//! The kernel serialises every call through one spinlock, so the
//! implementations themselves are single-threaded data structures.

mod cooperative;
mod priority;
mod round_robin;

pub use cooperative::Cooperative;
pub use priority::PriorityScheduler;
pub use round_robin::RoundRobin;

use crate::config::SchedulerKind;
use crate::task::{Pid, Task};
use std::sync::Arc;

/// Contract every scheduler implements.
pub trait Scheduler: Send {
    /// Enqueue a READY task. No-op if it is already in the ready set.
    fn add_task(&mut self, task: Arc<Task>);

    /// Drop a task from the ready set if present.
    fn remove_task(&mut self, pid: Pid);

    /// Pop the next task to run, or `None` when the set is empty.
    fn schedule(&mut self) -> Option<Arc<Task>>;

    /// Instructions a task may execute before forced preemption.
    fn time_slice(&self) -> u64;

    /// Immutable snapshot of the ready set for observation.
    fn ready_snapshot(&self) -> Vec<Arc<Task>>;

    /// Diagnostic hook: enqueue without the duplicate-membership guard.
    /// Exists to exercise the double-schedule panic path.
    fn enqueue_unchecked(&mut self, task: Arc<Task>);
}

/// Build the scheduler selected by the configuration.
pub fn make_scheduler(kind: SchedulerKind) -> Box<dyn Scheduler> {
    match kind {
        SchedulerKind::RoundRobin { slice } => Box::new(RoundRobin::new(slice)),
        SchedulerKind::Priority { slice } => Box::new(PriorityScheduler::new(slice)),
        SchedulerKind::Cooperative => Box::new(Cooperative::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;
    use std::sync::Weak;

    fn task(pid: Pid, priority: i32) -> Arc<Task> {
        Task::new(pid, pid, format!("t{}", pid), 1, 0, 0x8000, 0x2000, priority, Weak::new())
    }

    #[test]
    fn round_robin_is_fifo_and_duplicate_free() {
        let mut s = RoundRobin::new(1000);
        let (a, b) = (task(1, 0), task(2, 0));
        s.add_task(a.clone());
        s.add_task(b.clone());
        s.add_task(a.clone()); // duplicate — ignored
        assert_eq!(s.ready_snapshot().len(), 2);
        assert_eq!(s.schedule().unwrap().pid(), 1);
        assert_eq!(s.schedule().unwrap().pid(), 2);
        assert!(s.schedule().is_none());
        assert_eq!(s.time_slice(), 1000);
    }

    #[test]
    fn round_robin_readd_after_pop() {
        let mut s = RoundRobin::new(1000);
        let a = task(1, 0);
        s.add_task(a.clone());
        let popped = s.schedule().unwrap();
        // Once popped it may be re-added (the dispatcher does this at
        // the end of every slice).
        s.add_task(popped);
        assert_eq!(s.schedule().unwrap().pid(), 1);
    }

    #[test]
    fn priority_orders_by_priority_then_fifo() {
        let mut s = PriorityScheduler::new(500);
        let low = task(1, 1);
        let high = task(2, 9);
        let mid_a = task(3, 5);
        let mid_b = task(4, 5);
        for t in [&low, &high, &mid_a, &mid_b] {
            s.add_task((*t).clone());
        }
        assert_eq!(s.schedule().unwrap().pid(), 2);
        // Equal priorities come out in arrival order.
        assert_eq!(s.schedule().unwrap().pid(), 3);
        assert_eq!(s.schedule().unwrap().pid(), 4);
        assert_eq!(s.schedule().unwrap().pid(), 1);
    }

    #[test]
    fn priority_remove_task() {
        let mut s = PriorityScheduler::new(500);
        let a = task(1, 3);
        let b = task(2, 7);
        s.add_task(a.clone());
        s.add_task(b.clone());
        s.remove_task(2);
        assert_eq!(s.ready_snapshot().len(), 1);
        assert_eq!(s.schedule().unwrap().pid(), 1);
        assert!(s.schedule().is_none());
    }

    #[test]
    fn cooperative_has_unbounded_slice() {
        let mut s = Cooperative::new();
        let a = task(1, 0);
        s.add_task(a);
        assert_eq!(s.time_slice(), u64::MAX);
        assert_eq!(s.schedule().unwrap().pid(), 1);
    }

    #[test]
    fn add_requires_ready_state() {
        let mut s = RoundRobin::new(100);
        let a = task(1, 0);
        a.lock().state = TaskState::Ready;
        s.add_task(a.clone());
        assert_eq!(s.ready_snapshot().len(), 1);
    }

    #[test]
    fn unchecked_enqueue_allows_duplicates() {
        let mut s = RoundRobin::new(100);
        let a = task(1, 0);
        s.enqueue_unchecked(a.clone());
        s.enqueue_unchecked(a.clone());
        assert_eq!(s.ready_snapshot().len(), 2);
    }
}
