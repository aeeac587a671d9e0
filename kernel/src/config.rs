//! Simulator configuration.
//!
//! There is no on-disk configuration; the launcher (or a test) fills a
//! [`SimConfig`] and hands it to [`Kernel::boot`](crate::Kernel::boot).

use crate::memory::contiguous::FitStrategy;
use crate::memory::paged::FetchPolicy;
use crate::memory::policy::EvictKind;
use std::path::PathBuf;

/// Which MMU realisation backs task address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMode {
    /// Contiguous base/limit allocation with a hole list.
    Contiguous { strategy: FitStrategy },
    /// Two-level page tables with demand or eager fetch and a pluggable
    /// replacement policy.
    Paged { fetch: FetchPolicy, evict: EvictKind },
}

/// Which scheduler drives the ready set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    /// FIFO with a fixed instruction time slice.
    RoundRobin { slice: u64 },
    /// Max-heap on task priority, FIFO among equals.
    Priority { slice: u64 },
    /// FIFO with an unbounded slice; tasks run until they wait or exit.
    Cooperative,
}

/// Everything [`Kernel::boot`](crate::Kernel::boot) needs to bring the
/// machine up.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Simulated physical RAM in bytes.
    pub ram_size: usize,
    /// Number of harts (host threads running the dispatcher).
    pub harts: usize,
    pub memory: MemoryMode,
    pub scheduler: SchedulerKind,
    /// ELF image for PID 1.
    pub init_path: PathBuf,
    /// argv for PID 1 (argv[0] is conventionally the program name).
    pub init_args: Vec<String>,
    /// Allow guests to use the debug-print syscall.
    pub debug_print: bool,
    /// Optional throttle between dispatcher iterations, in milliseconds.
    pub hart_delay_ms: u64,
    /// Forward guest console output to host stdout. Tests turn this off
    /// and read the buffered output instead.
    pub console_stdout: bool,
}

impl SimConfig {
    /// A workable default machine: 16 MiB RAM, one hart, demand paging
    /// with CLOCK eviction, round-robin at 10k instructions.
    pub fn new(init_path: impl Into<PathBuf>) -> Self {
        SimConfig {
            ram_size: 16 * 1024 * 1024,
            harts: 1,
            memory: MemoryMode::Paged { fetch: FetchPolicy::Demand, evict: EvictKind::Clock },
            scheduler: SchedulerKind::RoundRobin { slice: 10_000 },
            init_path: init_path.into(),
            init_args: Vec::new(),
            debug_print: false,
            hart_delay_ms: 0,
            console_stdout: true,
        }
    }
}
