//! Kernel core: per-hart dispatcher loops, wait queues, the maintenance
//! thread, and boot/shutdown.
//!
//! Each hart is a host thread running [`hart_main`]: pop a task from the
//! shared scheduler, claim it with a CAS (a failed claim is the fatal
//! double-schedule), execute one time slice against the task's address
//! space, then route the task by its resulting state — back to the ready
//! set, onto a wait queue, or into zombie-land with a parent wakeup.
//!
//! Wait queues are holding pens, not the source of truth: the task state
//! under its own lock decides everything, and queue entries that no
//! longer match (woken elsewhere, terminated externally) are dropped at
//! the next maintenance drain. This keeps the lock order one-way —
//! task lock, then queue lock — on every path.
//!
//! Boot follows the BSP/AP pattern: hart 0 initialises and raises
//! `started`; the application harts spin on it before entering the loop.

use crate::config::{SchedulerKind, SimConfig};
use crate::error::KernelError;
use crate::memory::{MemoryManager, MmuContext};
use crate::obs::HartView;
use crate::sync::SpinLock;
use crate::syscall;
use crate::task::scheduler::{make_scheduler, Scheduler};
use crate::task::{loader, Pid, Task, TaskState, TaskTable, WaitReason};
use librvvm::cpu::Hart;
use librvvm::devices::uart::UART_TX_DATA;
use librvvm::{PhysMemory, Uart};
use std::collections::{BinaryHeap, HashMap};
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maintenance-loop cadence.
const MAINTENANCE_PERIOD: Duration = Duration::from_millis(10);

/// Idle sleep when the ready set is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Entry in the sleep queue, ordered soonest-wakeup-first.
struct SleepEntry {
    wakeup_at_ms: u64,
    task: Arc<Task>,
}

impl PartialEq for SleepEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wakeup_at_ms == other.wakeup_at_ms
    }
}

impl Eq for SleepEntry {}

impl PartialOrd for SleepEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SleepEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest wakeup
        // on top.
        other.wakeup_at_ms.cmp(&self.wakeup_at_ms)
    }
}

/// Kernel-wide counters.
#[derive(Default)]
pub struct KernelStats {
    pub instructions: AtomicU64,
    pub context_switches: AtomicU64,
}

/// The kernel: machine, tasks, scheduler, and wait queues.
pub struct Kernel {
    config: SimConfig,
    memory: Arc<MemoryManager>,
    uart: Arc<Uart>,
    tasks: TaskTable,
    scheduler: SpinLock<Box<dyn Scheduler>>,
    /// UART and generic waiters (including "wait for any child").
    io_wait: Mutex<Vec<Arc<Task>>>,
    /// Sleepers, keyed by wakeup time.
    sleep_wait: Mutex<BinaryHeap<SleepEntry>>,
    /// Specific-child waiters: child PID → waiting parent.
    child_wait: Mutex<HashMap<Pid, Arc<Task>>>,
    running: AtomicBool,
    paused: AtomicBool,
    delay_ms: AtomicU64,
    /// BSP/AP gate: raised by hart 0 once initialisation is done.
    started: AtomicBool,
    hart_views: Vec<Mutex<HartView>>,
    pub stats: KernelStats,
}

/// Handle to a booted kernel: the shared state plus the host threads.
pub struct KernelHandle {
    kernel: Arc<Kernel>,
    threads: Vec<JoinHandle<()>>,
}

impl Kernel {
    // ── accessors used across the kernel and the syscall layer ─────────

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn uart(&self) -> &Arc<Uart> {
        &self.uart
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// Wall-clock milliseconds since the epoch.
    pub fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_millis()
            as u64
    }

    /// Emit one byte on the console (the UART transmit path).
    pub fn console_write(&self, byte: u8) {
        self.uart.write(UART_TX_DATA, byte);
    }

    /// Drain buffered console output (tests; the maintenance loop does
    /// this when stdout forwarding is on).
    pub fn take_console_output(&self) -> Vec<u8> {
        self.uart.take_output()
    }

    // ── scheduler interaction ──────────────────────────────────────────

    /// Put a READY task on the ready set.
    pub fn enqueue_ready(&self, task: &Arc<Task>) {
        self.scheduler.lock().add_task(task.clone());
    }

    /// Instruction budget per slice.
    pub fn time_slice(&self) -> u64 {
        self.scheduler.lock().time_slice()
    }

    /// Ready-set snapshot for observation.
    pub fn ready_tasks(&self) -> Vec<Arc<Task>> {
        self.scheduler.lock().ready_snapshot()
    }

    /// Diagnostic hook bypassing the duplicate guard; used to exercise
    /// the double-schedule panic.
    pub fn enqueue_unchecked(&self, task: &Arc<Task>) {
        self.scheduler.lock().enqueue_unchecked(task.clone());
    }

    // ── task lifecycle ─────────────────────────────────────────────────

    /// Create a READY user task from an in-memory ELF image.
    pub fn create_user_task(
        self: &Arc<Self>,
        name: &str,
        elf: &[u8],
        argv: &[Vec<u8>],
        priority: i32,
        parent: Weak<Task>,
    ) -> Result<Arc<Task>, KernelError> {
        let pid = self.tasks.alloc_pid();
        let asid = self.memory.create_space(pid)?;
        let img = match loader::build_user_program(&self.memory, asid, elf, argv) {
            Ok(img) => img,
            Err(e) => {
                self.memory.destroy_space(asid);
                return Err(e);
            }
        };
        let task = Task::new(
            pid,
            pid,
            name.to_string(),
            asid,
            img.entry,
            img.sp,
            img.stack_size,
            priority,
            parent.clone(),
        );
        {
            use librvvm::reg;
            let mut inner = task.lock();
            inner.regs[reg::A0 as usize] = img.argc;
            inner.regs[reg::A1 as usize] = img.argv_ptr;
            inner.stack_base = img.stack_base;
        }
        if let Some(p) = parent.upgrade() {
            p.lock().children.push(task.clone());
        }
        self.tasks.insert(task.clone());
        self.enqueue_ready(&task);
        log::info!("created task {} (pid {})", name, pid);
        Ok(task)
    }

    /// Spawn a thread into `leader`'s group: shared address space, shared
    /// TGID, own stack. Only the group leader may spawn.
    pub fn spawn_thread(
        self: &Arc<Self>,
        leader: &Arc<Task>,
        entry: u32,
        stack_top: u32,
        stack_size: u32,
        priority: i32,
    ) -> Result<Arc<Task>, KernelError> {
        if !leader.is_group_leader() {
            return Err(KernelError::InvalidArgument("only a group leader may spawn threads"));
        }
        let pid = self.tasks.alloc_pid();
        let asid = leader.lock().asid;
        let thread = Task::new(
            pid,
            leader.tgid(),
            format!("{}/t{}", leader.name(), pid),
            asid,
            entry,
            stack_top,
            stack_size,
            priority,
            Arc::downgrade(leader),
        );
        leader.lock().children.push(thread.clone());
        self.tasks.insert(thread.clone());
        self.enqueue_ready(&thread);
        Ok(thread)
    }

    /// Kill a task from outside. A hart currently running it observes the
    /// state change at its next instruction boundary.
    pub fn terminate_task(&self, pid: Pid) -> Result<(), KernelError> {
        let task = self.tasks.get(pid).ok_or(KernelError::NoSuchTask(pid))?;
        {
            let mut inner = task.lock();
            inner.state = TaskState::Terminated;
            inner.exit_code = -1;
            inner.wait_reason = WaitReason::None;
        }
        self.scheduler.lock().remove_task(pid);
        log::info!("pid {} terminated externally", pid);
        Ok(())
    }

    /// Number of tasks that have not terminated.
    pub fn live_task_count(&self) -> usize {
        self.tasks.live_count()
    }

    // ── host-facing controls ───────────────────────────────────────────

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Throttle between dispatcher iterations.
    pub fn set_delay_ms(&self, ms: u64) {
        self.delay_ms.store(ms, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Per-hart observation snapshot.
    pub fn hart_view(&self, hart_id: usize) -> HartView {
        self.hart_views[hart_id].lock().expect("hart view poisoned").clone()
    }

    /// PIDs parked on the I/O wait queue.
    pub fn io_wait_pids(&self) -> Vec<Pid> {
        self.io_wait.lock().expect("io queue poisoned").iter().map(|t| t.pid()).collect()
    }

    /// (PID, wakeup time) pairs on the sleep queue.
    pub fn sleep_wait_pids(&self) -> Vec<(Pid, u64)> {
        self.sleep_wait
            .lock()
            .expect("sleep queue poisoned")
            .iter()
            .map(|e| (e.task.pid(), e.wakeup_at_ms))
            .collect()
    }

    // ── wakeups ────────────────────────────────────────────────────────

    /// Move a parked task back to READY if `condition` still holds under
    /// its lock. Returns true if the task was woken.
    fn wake_if(&self, task: &Arc<Task>, condition: impl FnOnce(&crate::task::TaskInner) -> bool) -> bool {
        {
            let mut inner = task.lock();
            if inner.state != TaskState::Waiting || !condition(&inner) {
                return false;
            }
            inner.state = TaskState::Ready;
            inner.wait_reason = WaitReason::None;
        }
        self.enqueue_ready(task);
        true
    }

    /// A child of `parent` terminated; wake the parent if it waits for
    /// this child or for any child.
    fn notify_parent_of_exit(&self, parent: &Arc<Task>, child_pid: Pid) {
        self.child_wait.lock().expect("child map poisoned").remove(&child_pid);
        let woken = self.wake_if(parent, |inner| {
            inner.wait_reason == WaitReason::ProcessExit
                && (inner.wait_pid == -1 || inner.wait_pid == child_pid)
        });
        if woken {
            log::debug!("pid {} woken by exit of pid {}", parent.pid(), child_pid);
        }
    }
}

// =========================================================================
// Boot
// =========================================================================

impl Kernel {
    /// Bring the machine up: build the kernel, create PID 1 from the
    /// configured ELF, then start hart and maintenance threads.
    pub fn boot(config: SimConfig) -> Result<KernelHandle, KernelError> {
        let init_image = std::fs::read(&config.init_path)?;
        Self::boot_with_image(config, &init_image)
    }

    /// Boot with the init image supplied in memory (tests).
    pub fn boot_with_image(config: SimConfig, init_image: &[u8]) -> Result<KernelHandle, KernelError> {
        let ram = Arc::new(PhysMemory::new(config.ram_size));
        let uart = Arc::new(Uart::new());
        let memory = Arc::new(MemoryManager::new(config.memory, ram, uart.clone()));
        let scheduler = SpinLock::new(make_scheduler(config.scheduler));
        let harts = config.harts.max(1);

        let kernel = Arc::new(Kernel {
            hart_views: (0..harts).map(|_| Mutex::new(HartView::default())).collect(),
            delay_ms: AtomicU64::new(config.hart_delay_ms),
            config,
            memory,
            uart,
            tasks: TaskTable::new(),
            scheduler,
            io_wait: Mutex::new(Vec::new()),
            sleep_wait: Mutex::new(BinaryHeap::new()),
            child_wait: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stats: KernelStats::default(),
        });

        let argv: Vec<Vec<u8>> = std::iter::once(b"init".to_vec())
            .chain(kernel.config.init_args.iter().map(|a| a.as_bytes().to_vec()))
            .collect();
        kernel.create_user_task("init", init_image, &argv, 0, Weak::new())?;

        let mut threads = Vec::new();
        for hart_id in 0..harts {
            let k = kernel.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("hart-{}", hart_id))
                    .spawn(move || hart_main(&k, hart_id))
                    .expect("spawn hart thread"),
            );
        }
        {
            let k = kernel.clone();
            threads.push(
                std::thread::Builder::new()
                    .name("maintenance".into())
                    .spawn(move || maintenance_main(&k))
                    .expect("spawn maintenance thread"),
            );
        }

        Ok(KernelHandle { kernel, threads })
    }
}

impl KernelHandle {
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Block until no non-zombie task remains or the timeout elapses.
    /// Returns true when the machine went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if self.kernel.live_task_count() == 0 {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        self.kernel.live_task_count() == 0
    }

    /// Block until `pid` terminates (it may linger as a zombie) or the
    /// timeout elapses; returns its exit code.
    pub fn wait_for_exit(&self, pid: Pid, timeout: Duration) -> Option<i32> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.kernel.tasks.get(pid) {
                Some(task) => {
                    let inner = task.lock();
                    if inner.state == TaskState::Terminated {
                        return Some(inner.exit_code);
                    }
                }
                // Reaped already; the exit code is gone with it.
                None => return None,
            }
            if std::time::Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Stop every hart and the maintenance loop, then join them.
    pub fn shutdown(self) {
        self.kernel.running.store(false, Ordering::Relaxed);
        for t in self.threads {
            // A panicking hart (double schedule) already reported itself.
            if let Err(e) = t.join() {
                log::error!("kernel thread ended in panic: {:?}", e);
            }
        }
        log::info!(
            "kernel stopped: {} instructions, {} context switches",
            self.kernel.stats.instructions.load(Ordering::Relaxed),
            self.kernel.stats.context_switches.load(Ordering::Relaxed),
        );
    }
}

// =========================================================================
// Per-hart dispatcher
// =========================================================================

fn hart_main(kernel: &Arc<Kernel>, hart_id: usize) {
    if hart_id == 0 {
        log::info!("hart 0 (BSP) up");
        kernel.started.store(true, Ordering::Release);
    } else {
        while !kernel.started.load(Ordering::Acquire) {
            if !kernel.is_running() {
                return;
            }
            std::hint::spin_loop();
        }
        log::info!("hart {} (AP) up", hart_id);
    }

    let mut cpu = Hart::new();
    while kernel.is_running() {
        while kernel.paused.load(Ordering::Relaxed) {
            if !kernel.is_running() {
                return;
            }
            std::thread::sleep(IDLE_SLEEP);
        }
        let delay = kernel.delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }

        // Pop under the lock, then release it before idling.
        let popped = kernel.scheduler.lock().schedule();
        let Some(task) = popped else {
            std::thread::sleep(IDLE_SLEEP);
            continue;
        };

        if !task.try_acquire_cpu(hart_id as i32) {
            panic!(
                "double schedule: pid {} already held by hart {}",
                task.pid(),
                task.active_hart()
            );
        }
        execute(kernel, &task, &mut cpu, hart_id);
        task.release_cpu(hart_id as i32);
        dispatch(kernel, &task);
    }
}

/// Run one time slice of `task` on this hart.
fn execute(kernel: &Arc<Kernel>, task: &Arc<Task>, cpu: &mut Hart, hart_id: usize) {
    let asid = {
        let mut inner = task.lock();
        // A task killed between the scheduler pop and this point must
        // not be resurrected; dispatch() routes the zombie.
        if inner.state == TaskState::Terminated {
            return;
        }
        inner.state = TaskState::Running;
        inner.restore_into(cpu);
        inner.asid
    };
    let mut ctx = MmuContext::new(kernel.memory().clone(), asid);
    kernel.stats.context_switches.fetch_add(1, Ordering::Relaxed);

    let slice = kernel.time_slice();
    let mut executed: u64 = 0;
    let mut trapped = false;

    while executed < slice && kernel.is_running() {
        // External terminations surface here, at the instruction boundary.
        if task.lock().state != TaskState::Running {
            break;
        }

        cpu.step(&mut ctx);
        executed += 1;

        if cpu.is_ecall() {
            cpu.clear_ecall();
            task.lock().save_from(cpu);
            syscall::dispatch(kernel, task);
            trapped = true;
            break;
        }
        if let Some(e) = cpu.exception() {
            cpu.clear_exception();
            let mut inner = task.lock();
            inner.save_from(cpu);
            inner.state = TaskState::Terminated;
            inner.exit_code = -1;
            inner.wait_reason = WaitReason::None;
            log::warn!("pid {} terminated: {}", task.pid(), e);
            trapped = true;
            break;
        }
    }

    {
        let mut inner = task.lock();
        if !trapped {
            inner.save_from(cpu);
        }
        // A slice that ends with the task still RUNNING (preemption, or
        // a syscall like getpid that completes in place) goes back to
        // READY.
        if inner.state == TaskState::Running {
            inner.state = TaskState::Ready;
        }
    }

    kernel.stats.instructions.fetch_add(executed, Ordering::Relaxed);
    {
        let mut view = kernel.hart_views[hart_id].lock().expect("hart view poisoned");
        view.pc = cpu.pc;
        view.regs = cpu.regs.to_array();
        view.pid = Some(task.pid());
        view.instructions = cpu.instruction_count;
    }
}

/// Route a task after its slice, by final state.
fn dispatch(kernel: &Arc<Kernel>, task: &Arc<Task>) {
    let (state, reason, wait_pid) = {
        let inner = task.lock();
        (inner.state, inner.wait_reason, inner.wait_pid)
    };

    match state {
        TaskState::Running => unreachable!("execute() normalises RUNNING to READY"),
        TaskState::Ready => kernel.enqueue_ready(task),
        TaskState::Waiting => match reason {
            WaitReason::UartInput | WaitReason::Generic => {
                kernel.io_wait.lock().expect("io queue poisoned").push(task.clone());
            }
            WaitReason::Timer => {
                let wakeup_at_ms = task.lock().wakeup_at_ms;
                kernel
                    .sleep_wait
                    .lock()
                    .expect("sleep queue poisoned")
                    .push(SleepEntry { wakeup_at_ms, task: task.clone() });
            }
            WaitReason::ProcessExit => {
                if wait_pid >= 0 {
                    kernel
                        .child_wait
                        .lock()
                        .expect("child map poisoned")
                        .insert(wait_pid, task.clone());
                } else {
                    // Wait-for-any parks on the generic queue.
                    kernel.io_wait.lock().expect("io queue poisoned").push(task.clone());
                }
            }
            WaitReason::None => {
                log::error!("pid {} WAITING without a reason; treating as ready", task.pid());
                task.lock().state = TaskState::Ready;
                kernel.enqueue_ready(task);
            }
        },
        TaskState::Terminated => {
            // Zombie: stays in the task table (and its parent's child
            // list) until reaped. Wake the parent if it is waiting.
            let parent = task.lock().parent.upgrade();
            if let Some(parent) = parent {
                kernel.notify_parent_of_exit(&parent, task.pid());
            }
        }
    }
}

// =========================================================================
// Maintenance loop
// =========================================================================

fn maintenance_main(kernel: &Arc<Kernel>) {
    while kernel.is_running() {
        std::thread::sleep(MAINTENANCE_PERIOD);

        // Console output → host stdout.
        if kernel.config().console_stdout {
            let out = kernel.uart().take_output();
            if !out.is_empty() {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                let _ = lock.write_all(&out);
                let _ = lock.flush();
            }
        }

        // UART input arrived: wake the UART waiters.
        let rx_ready = kernel.uart().rx_ready();
        {
            let drained: Vec<Arc<Task>> =
                kernel.io_wait.lock().expect("io queue poisoned").drain(..).collect();
            let mut keep = Vec::new();
            for task in drained {
                let waiting_reason = {
                    let inner = task.lock();
                    if inner.state == TaskState::Waiting { Some(inner.wait_reason) } else { None }
                };
                match waiting_reason {
                    Some(WaitReason::UartInput) if rx_ready => {
                        if !kernel.wake_if(&task, |i| i.wait_reason == WaitReason::UartInput) {
                            keep.push(task);
                        }
                    }
                    Some(_) => keep.push(task),
                    // Stale entry: woken elsewhere or terminated.
                    None => {}
                }
            }
            kernel.io_wait.lock().expect("io queue poisoned").extend(keep);
        }

        // Timers: release every sleeper whose deadline passed.
        let now = kernel.now_ms();
        let due = {
            let mut heap = kernel.sleep_wait.lock().expect("sleep queue poisoned");
            let mut due = Vec::new();
            while heap.peek().is_some_and(|e| e.wakeup_at_ms <= now) {
                due.push(heap.pop().expect("peeked entry").task);
            }
            due
        };
        for task in due {
            kernel.wake_if(&task, |i| i.wait_reason == WaitReason::Timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryMode;
    use crate::memory::paged::FetchPolicy;
    use crate::memory::policy::EvictKind;

    /// ELF with a single code segment at 0x1000; see the loader tests
    /// for the layout.
    fn tiny_elf(words: &[u32]) -> Vec<u8> {
        let mut code = Vec::new();
        for w in words {
            code.extend_from_slice(&w.to_le_bytes());
        }
        let mut out = vec![0u8; 84];
        out[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        out[4] = 1;
        out[5] = 1;
        out[6] = 1;
        out[16..18].copy_from_slice(&2u16.to_le_bytes());
        out[18..20].copy_from_slice(&243u16.to_le_bytes());
        out[24..28].copy_from_slice(&0x1000u32.to_le_bytes());
        out[28..32].copy_from_slice(&52u32.to_le_bytes());
        out[42..44].copy_from_slice(&32u16.to_le_bytes());
        out[44..46].copy_from_slice(&1u16.to_le_bytes());
        out[52..56].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        out[56..60].copy_from_slice(&84u32.to_le_bytes()); // offset
        out[60..64].copy_from_slice(&0x1000u32.to_le_bytes()); // vaddr
        out[68..72].copy_from_slice(&(code.len() as u32).to_le_bytes());
        out[72..76].copy_from_slice(&(code.len() as u32).to_le_bytes());
        out[76..80].copy_from_slice(&0x5u32.to_le_bytes()); // R|X
        out.extend_from_slice(&code);
        out
    }

    fn test_config() -> SimConfig {
        let mut config = SimConfig::new("/nonexistent");
        config.ram_size = 4 * 1024 * 1024;
        config.memory = MemoryMode::Paged { fetch: FetchPolicy::Demand, evict: EvictKind::Clock };
        config.console_stdout = false;
        config
    }

    #[test]
    fn boot_runs_exit_syscall() {
        // addi a7, zero, 93 ; addi a0, zero, 42 ; ecall
        let elf = tiny_elf(&[0x05d0_0893, 0x02a0_0513, 0x0000_0073]);
        let handle = Kernel::boot_with_image(test_config(), &elf).unwrap();
        let code = handle.wait_for_exit(1, Duration::from_secs(5));
        assert_eq!(code, Some(42));
        assert!(handle.wait_idle(Duration::from_secs(1)));
        handle.shutdown();
    }

    #[test]
    fn specific_child_wait_routes_to_child_map() {
        let elf = tiny_elf(&[0x0000_0073]); // immediate ecall (a7=0 → unknown)
        let handle = Kernel::boot_with_image(test_config(), &elf).unwrap();
        let kernel = handle.kernel();
        kernel.pause();
        let init = kernel.tasks().get(1).unwrap();
        {
            let mut inner = init.lock();
            inner.state = TaskState::Waiting;
            inner.wait_reason = WaitReason::ProcessExit;
            inner.wait_pid = 7;
        }
        dispatch(kernel, &init);
        let parked: Vec<Pid> = kernel
            .child_wait
            .lock()
            .unwrap()
            .iter()
            .map(|(c, p)| {
                assert_eq!(p.pid(), 1);
                *c
            })
            .collect();
        assert_eq!(parked, vec![7]);
        handle.shutdown();
    }

    #[test]
    fn threads_share_the_leader_address_space() {
        let elf = tiny_elf(&[0x0000_006f]); // spin
        let handle = Kernel::boot_with_image(test_config(), &elf).unwrap();
        let kernel = handle.kernel();
        let init = kernel.tasks().get(1).unwrap();

        let thread = kernel.spawn_thread(&init, 0x1000, 0x7000_0000, 0x2000, 0).unwrap();
        assert_eq!(thread.tgid(), init.tgid());
        assert_ne!(thread.pid(), init.pid());
        assert_eq!(thread.lock().asid, init.lock().asid);

        // A non-leader may not spawn.
        assert!(kernel.spawn_thread(&thread, 0x1000, 0x6000_0000, 0x2000, 0).is_err());

        kernel.terminate_task(thread.pid()).unwrap();
        kernel.terminate_task(1).unwrap();
        assert!(handle.wait_idle(Duration::from_secs(2)));
        handle.shutdown();
    }

    #[test]
    fn external_termination_stops_a_spinning_task() {
        // Tight infinite loop: jal zero, 0 (jump to self).
        let elf = tiny_elf(&[0x0000_006f]);
        let handle = Kernel::boot_with_image(test_config(), &elf).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        handle.kernel().terminate_task(1).unwrap();
        assert!(handle.wait_idle(Duration::from_secs(2)));
        handle.shutdown();
    }
}
