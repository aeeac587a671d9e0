//! Task model: per-task state, CPU ownership, and the PID table.
//!
//! A [`Task`] is the unit of scheduling — a process (own address space)
//! or a thread (sharing the group leader's). Mutable state lives behind a
//! mutex in [`TaskInner`]; CPU ownership is a separate atomic so the
//! at-most-one-hart invariant can be enforced with a CAS and checked
//! without taking the lock.
//!
//! Parent/child wiring avoids reference cycles: a parent owns `Arc`s to
//! its children, a child holds only a `Weak` back-reference. A zombie
//! stays in its parent's child list and in the task table until the
//! parent's wait reaps it.

pub mod loader;
pub mod scheduler;

use crate::memory::AsId;
use librvvm::cpu::Hart;
use librvvm::reg;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Process identifier. Positive and monotonic; −1 is the "any child"
/// sentinel in wait paths.
pub type Pid = i32;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Waiting,
    Terminated,
}

/// Why a WAITING task is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    None,
    /// Blocked on UART input.
    UartInput,
    /// Sleeping until `wakeup_at_ms`.
    Timer,
    /// Waiting for a child to exit.
    ProcessExit,
    /// Parked on the generic wait queue.
    Generic,
}

/// No hart currently runs this task.
pub const NO_HART: i32 = -1;

/// Mutable task state, guarded by the task's mutex.
pub struct TaskInner {
    pub state: TaskState,
    pub wait_reason: WaitReason,
    /// PID the task waits for; −1 means any child.
    pub wait_pid: Pid,
    /// Absolute wakeup time in milliseconds since the epoch.
    pub wakeup_at_ms: u64,
    /// A sleep syscall is in flight; cleared when it completes.
    pub sleep_armed: bool,
    /// Saved register file while not running on a hart.
    pub regs: [u32; 32],
    /// Saved program counter.
    pub pc: u32,
    pub stack_base: u32,
    pub stack_size: u32,
    pub exit_code: i32,
    pub parent: Weak<Task>,
    pub children: Vec<Arc<Task>>,
    pub asid: AsId,
    pub priority: i32,
}

impl TaskInner {
    /// Copy the hart's architectural state into this task record.
    pub fn save_from(&mut self, hart: &Hart) {
        self.regs = hart.regs.to_array();
        self.pc = hart.pc;
    }

    /// Load this task's saved state onto a hart.
    pub fn restore_into(&self, hart: &mut Hart) {
        hart.regs.load_array(&self.regs);
        hart.set_pc(self.pc);
    }
}

/// One schedulable task.
pub struct Task {
    pid: Pid,
    tgid: Pid,
    name: String,
    /// Hart currently executing this task, or [`NO_HART`].
    active_hart: AtomicI32,
    inner: Mutex<TaskInner>,
}

impl Task {
    /// Create a READY task with a fresh register file. The stack pointer
    /// is set to `stack_top`; callers pass an already 16-byte-aligned
    /// value.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pid: Pid,
        tgid: Pid,
        name: String,
        asid: AsId,
        entry: u32,
        stack_top: u32,
        stack_size: u32,
        priority: i32,
        parent: Weak<Task>,
    ) -> Arc<Task> {
        let mut regs = [0u32; 32];
        regs[reg::SP as usize] = stack_top;
        Arc::new(Task {
            pid,
            tgid,
            name,
            active_hart: AtomicI32::new(NO_HART),
            inner: Mutex::new(TaskInner {
                state: TaskState::Ready,
                wait_reason: WaitReason::None,
                wait_pid: -1,
                wakeup_at_ms: 0,
                sleep_armed: false,
                regs,
                pc: entry,
                stack_base: stack_top.saturating_sub(stack_size),
                stack_size,
                exit_code: 0,
                parent,
                children: Vec::new(),
                asid,
                priority,
            }),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn tgid(&self) -> Pid {
        self.tgid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if this task leads its thread group.
    pub fn is_group_leader(&self) -> bool {
        self.pid == self.tgid
    }

    /// Lock the mutable task state.
    pub fn lock(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().expect("task lock poisoned")
    }

    /// Convenience state read (takes the lock).
    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    /// Claim this task for a hart. Fails if another hart holds it — the
    /// caller treats that as a fatal double-schedule.
    pub fn try_acquire_cpu(&self, hart_id: i32) -> bool {
        self.active_hart
            .compare_exchange(NO_HART, hart_id, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release CPU ownership. Panics if `hart_id` does not hold it.
    pub fn release_cpu(&self, hart_id: i32) {
        if self
            .active_hart
            .compare_exchange(hart_id, NO_HART, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            panic!("task {}: cpu release by hart {} which does not own it", self.pid, hart_id);
        }
    }

    /// Hart currently running this task, or [`NO_HART`].
    pub fn active_hart(&self) -> i32 {
        self.active_hart.load(Ordering::Relaxed)
    }
}

/// The PID table: every live (and zombie) task, keyed by PID.
pub struct TaskTable {
    tasks: Mutex<HashMap<Pid, Arc<Task>>>,
    next_pid: AtomicI32,
}

impl TaskTable {
    pub fn new() -> Self {
        TaskTable { tasks: Mutex::new(HashMap::new()), next_pid: AtomicI32::new(1) }
    }

    /// Hand out the next PID.
    pub fn alloc_pid(&self) -> Pid {
        self.next_pid.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, task: Arc<Task>) {
        self.tasks.lock().expect("task table poisoned").insert(task.pid(), task);
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Task>> {
        self.tasks.lock().expect("task table poisoned").get(&pid).cloned()
    }

    pub fn remove(&self, pid: Pid) -> Option<Arc<Task>> {
        self.tasks.lock().expect("task table poisoned").remove(&pid)
    }

    /// Snapshot of every task in the table.
    pub fn all(&self) -> Vec<Arc<Task>> {
        self.tasks.lock().expect("task table poisoned").values().cloned().collect()
    }

    /// Number of tasks that have not terminated yet.
    pub fn live_count(&self) -> usize {
        self.tasks
            .lock()
            .expect("task table poisoned")
            .values()
            .filter(|t| t.state() != TaskState::Terminated)
            .count()
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(pid: Pid) -> Arc<Task> {
        Task::new(pid, pid, format!("t{}", pid), 1, 0x1000, 0x8000, 0x2000, 0, Weak::new())
    }

    #[test]
    fn cpu_ownership_is_exclusive() {
        let t = task(1);
        assert!(t.try_acquire_cpu(0));
        assert!(!t.try_acquire_cpu(1));
        t.release_cpu(0);
        assert!(t.try_acquire_cpu(1));
        assert_eq!(t.active_hart(), 1);
    }

    #[test]
    fn release_by_non_owner_panics() {
        let t = task(1);
        assert!(t.try_acquire_cpu(0));
        let err = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| t.release_cpu(2)));
        assert!(err.is_err());
    }

    #[test]
    fn save_restore_roundtrip() {
        let t = task(3);
        let mut hart = Hart::new();
        t.lock().restore_into(&mut hart);
        assert_eq!(hart.pc, 0x1000);
        assert_eq!(hart.regs.read(reg::SP), 0x8000);
        hart.regs.write(reg::A0, 77);
        hart.set_pc(0x1010);
        t.lock().save_from(&hart);
        let inner = t.lock();
        assert_eq!(inner.pc, 0x1010);
        assert_eq!(inner.regs[reg::A0 as usize], 77);
    }

    #[test]
    fn table_tracks_liveness() {
        let table = TaskTable::new();
        let a = task(table.alloc_pid());
        let b = task(table.alloc_pid());
        table.insert(a.clone());
        table.insert(b.clone());
        assert_eq!(table.live_count(), 2);
        b.lock().state = TaskState::Terminated;
        assert_eq!(table.live_count(), 1);
        assert!(table.get(a.pid()).is_some());
        table.remove(b.pid());
        assert!(table.get(b.pid()).is_none());
    }
}
