//! Read-only observation snapshots for an external visualiser.
//!
//! Everything here copies data out under short locks; snapshots are
//! plain values, safe to ship to another thread and render at leisure.

use crate::kernel::Kernel;
use crate::memory::{MemStats, MemoryView};
use crate::task::{Pid, TaskState, WaitReason};

/// Snapshot of one hart after its most recent slice.
#[derive(Debug, Clone)]
pub struct HartView {
    pub pc: u32,
    pub regs: [u32; 32],
    /// Task most recently dispatched on this hart.
    pub pid: Option<Pid>,
    /// Instructions retired by this hart since boot.
    pub instructions: u64,
}

impl Default for HartView {
    fn default() -> Self {
        HartView { pc: 0, regs: [0; 32], pid: None, instructions: 0 }
    }
}

/// Snapshot of one task.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub pid: Pid,
    pub tgid: Pid,
    pub name: String,
    pub state: TaskState,
    pub wait_reason: WaitReason,
    pub priority: i32,
    pub exit_code: i32,
}

/// Kernel-wide counter snapshot.
#[derive(Debug, Clone, Copy)]
pub struct StatsView {
    pub instructions: u64,
    pub context_switches: u64,
    pub memory: MemStats,
}

impl Kernel {
    /// Snapshot of every task in the PID table.
    pub fn tasks_view(&self) -> Vec<TaskView> {
        let mut views: Vec<TaskView> = self
            .tasks()
            .all()
            .into_iter()
            .map(|t| {
                let inner = t.lock();
                TaskView {
                    pid: t.pid(),
                    tgid: t.tgid(),
                    name: t.name().to_string(),
                    state: inner.state,
                    wait_reason: inner.wait_reason,
                    priority: inner.priority,
                    exit_code: inner.exit_code,
                }
            })
            .collect();
        views.sort_by_key(|v| v.pid);
        views
    }

    /// PIDs currently in the ready set, in scheduler order.
    pub fn ready_pids(&self) -> Vec<Pid> {
        self.ready_tasks().iter().map(|t| t.pid()).collect()
    }

    /// Memory layout snapshot: holes and allocations, or the frame
    /// ownership array.
    pub fn memory_snapshot(&self) -> MemoryView {
        self.memory().memory_view()
    }

    /// Counter snapshot.
    pub fn stats_view(&self) -> StatsView {
        use std::sync::atomic::Ordering;
        StatsView {
            instructions: self.stats.instructions.load(Ordering::Relaxed),
            context_switches: self.stats.context_switches.load(Ordering::Relaxed),
            memory: self.memory().stats(),
        }
    }
}
