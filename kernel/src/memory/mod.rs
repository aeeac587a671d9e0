//! Memory subsystem: physical frames, the two MMU realisations, and the
//! manager facade the rest of the kernel talks to.
//!
//! [`MemoryManager`] owns the MMU state behind one mutex and routes every
//! guest access: UART window first (MMIO bypasses translation in both
//! modes), then translation, then the RAM byte store. The mutex is held
//! across the RAM access so contiguous compaction can never move a block
//! out from under a translated address.
//!
//! [`MmuContext`] is the thin per-hart adapter that carries the current
//! task's address-space id and implements the CPU-facing
//! [`Memory`](librvvm::Memory) contract.

pub mod contiguous;
pub mod paged;
pub mod physical;
pub mod policy;

use crate::config::MemoryMode;
use crate::error::KernelError;
use crate::task::Pid;
use contiguous::ContiguousMmu;
use librvvm::{is_uart_addr, Access, Memory, PhysMemory, Uart, VmError, UART_BASE};
use paged::{PagedMmu, PteFlags};
use physical::{FrameAccounting, FrameOwner, FRAME_SIZE};
use policy::make_policy;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Identity of one address space. Distinct from the PID: exec briefly
/// holds two spaces for one task while swapping.
pub type AsId = u32;

/// Top of the user stack in paged mode; the stack grows down from here.
pub const USER_STACK_TOP: u32 = 0x7FFF_F000;

/// User stack size in bytes (both modes).
pub const USER_STACK_SIZE: u32 = 8 * 1024;

/// Round down to a page boundary.
#[inline]
pub fn page_align_down(va: u32) -> u32 {
    va & !(FRAME_SIZE - 1)
}

/// Round up to a page boundary.
#[inline]
pub fn page_align_up(va: u32) -> u32 {
    (va + FRAME_SIZE - 1) & !(FRAME_SIZE - 1)
}

enum MmuInner {
    Contiguous(ContiguousMmu),
    Paged(PagedMmu),
}

/// Memory-side counters for the observation surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemStats {
    pub page_faults: u64,
    pub evictions: u64,
    pub compactions: u64,
}

/// Memory layout snapshot for the observation surface.
#[derive(Debug, Clone)]
pub enum MemoryView {
    Contiguous {
        /// (start, size) of each hole, sorted by start.
        holes: Vec<(u32, u32)>,
        /// (pid, start, size) of each allocated block, sorted by start.
        allocs: Vec<(Pid, u32, u32)>,
    },
    Paged {
        /// Owner of every frame, indexed by frame number.
        frames: Vec<FrameOwner>,
        total_frames: u32,
    },
}

/// The kernel's memory facade.
pub struct MemoryManager {
    ram: Arc<PhysMemory>,
    uart: Arc<Uart>,
    inner: Mutex<MmuInner>,
    next_asid: AtomicU32,
}

impl MemoryManager {
    pub fn new(mode: MemoryMode, ram: Arc<PhysMemory>, uart: Arc<Uart>) -> Self {
        let total = ram.len() as u32;
        let inner = match mode {
            MemoryMode::Contiguous { strategy } => {
                MmuInner::Contiguous(ContiguousMmu::new(total, strategy))
            }
            MemoryMode::Paged { fetch, evict } => {
                MmuInner::Paged(PagedMmu::new(total, fetch, make_policy(evict, total as usize)))
            }
        };
        MemoryManager { ram, uart, inner: Mutex::new(inner), next_asid: AtomicU32::new(1) }
    }

    fn inner(&self) -> MutexGuard<'_, MmuInner> {
        self.inner.lock().expect("memory manager lock poisoned")
    }

    /// The RAM backing store (tests and compaction verification).
    pub fn ram(&self) -> &Arc<PhysMemory> {
        &self.ram
    }

    // ── address-space lifecycle ────────────────────────────────────────

    /// Create an empty address space for a task.
    pub fn create_space(&self, pid: Pid) -> Result<AsId, KernelError> {
        let asid = self.next_asid.fetch_add(1, Ordering::Relaxed);
        match &mut *self.inner() {
            MmuInner::Contiguous(c) => c.register_space(asid, pid),
            MmuInner::Paged(p) => p.create_space(asid, pid)?,
        }
        Ok(asid)
    }

    /// Tear an address space down and release its memory.
    pub fn destroy_space(&self, asid: AsId) {
        match &mut *self.inner() {
            MmuInner::Contiguous(c) => c.free_space(asid),
            MmuInner::Paged(p) => p.destroy_space(asid),
        }
    }

    /// Duplicate `parent` for a fork child: paged mode refcounts shared
    /// pages and copies private ones; contiguous mode clones the block.
    pub fn fork_space(&self, parent: AsId, child_pid: Pid) -> Result<AsId, KernelError> {
        let child = self.next_asid.fetch_add(1, Ordering::Relaxed);
        match &mut *self.inner() {
            MmuInner::Paged(p) => p.copy_space(parent, child, child_pid, &self.ram)?,
            MmuInner::Contiguous(c) => {
                let (_, size) =
                    c.region_of(parent).ok_or(KernelError::NoSuchSpace(parent))?;
                c.register_space(child, child_pid);
                if let Err(e) = c.allocate(child, size, &self.ram) {
                    c.free_space(child);
                    return Err(e);
                }
                // Allocation may have compacted; re-resolve both blocks.
                let (pbase, _) = c.region_of(parent).expect("parent block present");
                let (cbase, _) = c.region_of(child).expect("child block just allocated");
                self.ram.copy_within(pbase as usize, cbase as usize, size as usize);
            }
        }
        Ok(child)
    }

    /// Size the space for a program image whose segments end at `extent`
    /// and attach the user stack. Returns the initial stack top.
    pub fn prepare_image(&self, asid: AsId, extent: u32) -> Result<u32, KernelError> {
        match &mut *self.inner() {
            MmuInner::Contiguous(c) => {
                let size = extent
                    .checked_add(USER_STACK_SIZE)
                    .ok_or(KernelError::InvalidArgument("image extent overflows"))?;
                c.allocate(asid, size, &self.ram)?;
                Ok(size)
            }
            MmuInner::Paged(p) => {
                p.map_region(
                    asid,
                    USER_STACK_TOP - USER_STACK_SIZE,
                    USER_STACK_SIZE,
                    PteFlags::READ | PteFlags::WRITE,
                    &self.ram,
                )?;
                Ok(USER_STACK_TOP)
            }
        }
    }

    /// Map a permissioned region (no-op beyond bookkeeping in contiguous
    /// mode, which has no per-page permissions).
    pub fn map_region(
        &self,
        asid: AsId,
        va: u32,
        len: u32,
        flags: PteFlags,
    ) -> Result<(), KernelError> {
        match &mut *self.inner() {
            MmuInner::Contiguous(_) => Ok(()),
            MmuInner::Paged(p) => p.map_region(asid, va, len, flags, &self.ram),
        }
    }

    /// Obtain the frame backing a named shared region (paged mode only).
    pub fn open_shared(&self, key: u32) -> Result<u32, KernelError> {
        match &mut *self.inner() {
            MmuInner::Paged(p) => p.open_shared(key, &self.ram),
            MmuInner::Contiguous(_) => {
                Err(KernelError::InvalidArgument("shared pages need paged mode"))
            }
        }
    }

    /// Map a shared frame at `vpn` in the given space (paged mode only).
    pub fn map_shared(
        &self,
        asid: AsId,
        vpn: u32,
        frame: u32,
        writable: bool,
    ) -> Result<(), KernelError> {
        match &mut *self.inner() {
            MmuInner::Paged(p) => p.map_shared(asid, vpn, frame, writable),
            MmuInner::Contiguous(_) => {
                Err(KernelError::InvalidArgument("shared pages need paged mode"))
            }
        }
    }

    // ── guest access path ──────────────────────────────────────────────

    fn translate(
        &self,
        inner: &mut MmuInner,
        asid: AsId,
        va: u32,
        access: Access,
    ) -> librvvm::Result<u32> {
        match inner {
            MmuInner::Contiguous(c) => {
                c.translate(asid, va).ok_or(VmError::MemFault { addr: va, access })
            }
            MmuInner::Paged(p) => p.translate(asid, va, access, &self.ram),
        }
    }

    /// Read one guest byte with `Read` permission checks.
    pub fn read_u8(&self, asid: AsId, va: u32) -> librvvm::Result<u8> {
        if is_uart_addr(va) {
            return Ok(self.uart.read(va - UART_BASE));
        }
        let mut inner = self.inner();
        let pa = self.translate(&mut inner, asid, va, Access::Read)?;
        self.ram.read_u8(pa).ok_or(VmError::MemFault { addr: va, access: Access::Read })
    }

    /// Write one guest byte with `Write` permission checks.
    pub fn write_u8(&self, asid: AsId, va: u32, val: u8) -> librvvm::Result<()> {
        if is_uart_addr(va) {
            self.uart.write(va - UART_BASE, val);
            return Ok(());
        }
        let mut inner = self.inner();
        let pa = self.translate(&mut inner, asid, va, Access::Write)?;
        self.ram.write_u8(pa, val).ok_or(VmError::MemFault { addr: va, access: Access::Write })
    }

    /// Fetch one instruction word with `Execute` permission checks.
    pub fn fetch_u32(&self, asid: AsId, va: u32) -> librvvm::Result<u32> {
        if is_uart_addr(va) {
            return Err(VmError::MemFault { addr: va, access: Access::Execute });
        }
        let mut inner = self.inner();
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            let a = va.wrapping_add(i as u32);
            let pa = self.translate(&mut inner, asid, a, Access::Execute)?;
            *b = self
                .ram
                .read_u8(pa)
                .ok_or(VmError::MemFault { addr: a, access: Access::Execute })?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    /// Write one guest byte bypassing the access-kind check (loaders
    /// populating read-only segments).
    pub fn write_u8_bypass(&self, asid: AsId, va: u32, val: u8) -> librvvm::Result<()> {
        if is_uart_addr(va) {
            self.uart.write(va - UART_BASE, val);
            return Ok(());
        }
        let mut inner = self.inner();
        let pa = match &mut *inner {
            MmuInner::Contiguous(c) => c
                .translate(asid, va)
                .ok_or(VmError::MemFault { addr: va, access: Access::Write })?,
            MmuInner::Paged(p) => p.translate_bypass(asid, va, &self.ram)?,
        };
        self.ram.write_u8(pa, val).ok_or(VmError::MemFault { addr: va, access: Access::Write })
    }

    // ── user-memory helpers for the syscall layer ──────────────────────

    /// Copy `len` guest bytes out of an address space.
    pub fn read_bytes(&self, asid: AsId, va: u32, len: u32) -> librvvm::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len as usize);
        for i in 0..len {
            out.push(self.read_u8(asid, va.wrapping_add(i))?);
        }
        Ok(out)
    }

    /// Read a NUL-terminated guest string of at most `max` bytes
    /// (terminator excluded).
    pub fn read_cstr(&self, asid: AsId, va: u32, max: u32) -> librvvm::Result<Vec<u8>> {
        let mut out = Vec::new();
        for i in 0..max {
            let b = self.read_u8(asid, va.wrapping_add(i))?;
            if b == 0 {
                break;
            }
            out.push(b);
        }
        Ok(out)
    }

    /// Copy a host buffer into guest memory with write checks.
    pub fn write_bytes(&self, asid: AsId, va: u32, data: &[u8]) -> librvvm::Result<()> {
        for (i, &b) in data.iter().enumerate() {
            self.write_u8(asid, va.wrapping_add(i as u32), b)?;
        }
        Ok(())
    }

    /// Copy a host buffer into guest memory on the loader path.
    pub fn write_bytes_bypass(&self, asid: AsId, va: u32, data: &[u8]) -> librvvm::Result<()> {
        for (i, &b) in data.iter().enumerate() {
            self.write_u8_bypass(asid, va.wrapping_add(i as u32), b)?;
        }
        Ok(())
    }

    /// Read a little-endian guest word with read checks.
    pub fn read_u32_user(&self, asid: AsId, va: u32) -> librvvm::Result<u32> {
        let b = self.read_bytes(asid, va, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Write a little-endian guest word with write checks.
    pub fn write_u32_user(&self, asid: AsId, va: u32, val: u32) -> librvvm::Result<()> {
        self.write_bytes(asid, va, &val.to_le_bytes())
    }

    // ── observation ────────────────────────────────────────────────────

    /// Layout snapshot for the observation surface.
    pub fn memory_view(&self) -> MemoryView {
        match &*self.inner() {
            MmuInner::Contiguous(c) => {
                let (holes, allocs) = c.snapshot();
                MemoryView::Contiguous { holes, allocs }
            }
            MmuInner::Paged(p) => MemoryView::Paged {
                frames: p.frames().snapshot(),
                total_frames: p.frames().total_frames(),
            },
        }
    }

    /// Frame accounting for the conservation law (paged mode only).
    pub fn frame_accounting(&self) -> Option<FrameAccounting> {
        match &*self.inner() {
            MmuInner::Paged(p) => Some(p.frames().accounting()),
            MmuInner::Contiguous(_) => None,
        }
    }

    /// Memory event counters.
    pub fn stats(&self) -> MemStats {
        match &*self.inner() {
            MmuInner::Paged(p) => MemStats {
                page_faults: p.page_faults(),
                evictions: p.evictions(),
                compactions: 0,
            },
            MmuInner::Contiguous(c) => {
                MemStats { page_faults: 0, evictions: 0, compactions: c.compactions() }
            }
        }
    }
}

/// Per-hart view of the current task's address space; what the CPU
/// actually executes against.
pub struct MmuContext {
    mgr: Arc<MemoryManager>,
    asid: AsId,
}

impl MmuContext {
    pub fn new(mgr: Arc<MemoryManager>, asid: AsId) -> Self {
        MmuContext { mgr, asid }
    }
}

impl Memory for MmuContext {
    fn read_u8(&mut self, va: u32) -> librvvm::Result<u8> {
        self.mgr.read_u8(self.asid, va)
    }

    fn write_u8(&mut self, va: u32, val: u8) -> librvvm::Result<()> {
        self.mgr.write_u8(self.asid, va, val)
    }

    fn fetch_u32(&mut self, va: u32) -> librvvm::Result<u32> {
        self.mgr.fetch_u32(self.asid, va)
    }

    fn write_u8_bypass(&mut self, va: u32, val: u8) -> librvvm::Result<()> {
        self.mgr.write_u8_bypass(self.asid, va, val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryMode;
    use crate::memory::contiguous::FitStrategy;
    use crate::memory::paged::FetchPolicy;
    use crate::memory::policy::EvictKind;

    fn paged_mgr() -> MemoryManager {
        let ram = Arc::new(PhysMemory::new(64 * FRAME_SIZE as usize));
        MemoryManager::new(
            MemoryMode::Paged { fetch: FetchPolicy::Demand, evict: EvictKind::Clock },
            ram,
            Arc::new(Uart::new()),
        )
    }

    #[test]
    fn uart_window_bypasses_translation() {
        let mgr = paged_mgr();
        let asid = mgr.create_space(1).unwrap();
        let uart_status = UART_BASE;
        assert_eq!(mgr.read_u8(asid, uart_status).unwrap(), 0);
        mgr.uart.push_input(b"x");
        assert_eq!(mgr.read_u8(asid, uart_status).unwrap(), 1);
        assert_eq!(mgr.read_u8(asid, UART_BASE + 4).unwrap(), b'x');
        mgr.write_u8(asid, UART_BASE + 8, b'y').unwrap();
        assert_eq!(mgr.uart.take_output(), b"y");
        // Fetching from the device window is a fault, not a read.
        assert!(mgr.fetch_u32(asid, uart_status).is_err());
    }

    #[test]
    fn user_string_helpers() {
        let mgr = paged_mgr();
        let asid = mgr.create_space(1).unwrap();
        mgr.write_bytes(asid, 0x1000, b"hello\0world").unwrap();
        assert_eq!(mgr.read_cstr(asid, 0x1000, 64).unwrap(), b"hello");
        assert_eq!(mgr.read_cstr(asid, 0x1000, 3).unwrap(), b"hel");
        assert_eq!(mgr.read_bytes(asid, 0x1006, 5).unwrap(), b"world");
    }

    #[test]
    fn shared_regions_alias_across_spaces() {
        let mgr = paged_mgr();
        let a = mgr.create_space(1).unwrap();
        let b = mgr.create_space(2).unwrap();
        let frame = mgr.open_shared(42).unwrap();
        assert_eq!(mgr.open_shared(42).unwrap(), frame);
        mgr.map_shared(a, 0x30, frame, true).unwrap();
        mgr.map_shared(b, 0x30, frame, false).unwrap();
        mgr.write_u8(a, 0x30_000, 0xEE).unwrap();
        assert_eq!(mgr.read_u8(b, 0x30_000).unwrap(), 0xEE);
        // The read-only mapping rejects writes.
        assert!(mgr.write_u8(b, 0x30_000, 0).is_err());
    }

    #[test]
    fn contiguous_fork_copies_bytes() {
        let ram = Arc::new(PhysMemory::new(64 * 1024));
        let mgr = MemoryManager::new(
            MemoryMode::Contiguous { strategy: FitStrategy::FirstFit },
            ram,
            Arc::new(Uart::new()),
        );
        let parent = mgr.create_space(1).unwrap();
        mgr.prepare_image(parent, 0x100).unwrap();
        mgr.write_bytes(parent, 0x10, b"fork me").unwrap();
        let child = mgr.fork_space(parent, 2).unwrap();
        assert_eq!(mgr.read_bytes(child, 0x10, 7).unwrap(), b"fork me");
        // Writes diverge afterwards.
        mgr.write_u8(child, 0x10, b'F').unwrap();
        assert_eq!(mgr.read_u8(parent, 0x10).unwrap(), b'f');
    }
}
