//! Two-level paged MMU (Sv32-style).
//!
//! 32-bit virtual addresses split into a 10-bit L1 index, a 10-bit L2
//! index, and a 12-bit page offset. Each address space owns an L1
//! directory; L2 tables appear on demand. Directory and table storage
//! lives host-side for speed, but every directory/table is charged one
//! frame against the allocator so the frame-conservation law stays exact.
//!
//! Fetch policy decides *when* pages materialise: DEMAND allocates a
//! zeroed frame on first touch (any address — unmapped territory gets
//! access-kind default permissions), EAGER populates whole regions at
//! `map_region` time and faults on anything outside them.
//!
//! Replacement is delegated to a [`ReplacementPolicy`]; page-table frames
//! and shared frames are never victims.

use crate::error::KernelError;
use crate::memory::physical::{FrameAllocator, Owner, FRAME_SIZE};
use crate::memory::policy::ReplacementPolicy;
use crate::memory::AsId;
use crate::task::Pid;
use bitflags::bitflags;
use librvvm::{Access, PhysMemory, VmError};
use std::collections::HashMap;

/// When pages are brought into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Allocate on first access, zero-filled.
    Demand,
    /// Allocate and zero every covered page at `map_region` time.
    Eager,
}

bitflags! {
    /// Page-table entry permission and status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u16 {
        const VALID    = 1 << 0;
        const READ     = 1 << 1;
        const WRITE    = 1 << 2;
        const EXEC     = 1 << 3;
        const SHARED   = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY    = 1 << 6;
    }
}

impl PteFlags {
    /// True if these permissions satisfy the given access kind.
    fn allows(self, access: Access) -> bool {
        match access {
            Access::Read => self.contains(PteFlags::READ),
            Access::Write => self.contains(PteFlags::WRITE),
            Access::Execute => self.contains(PteFlags::EXEC),
        }
    }

    /// Default permissions for a demand-allocated page outside any mapped
    /// region, derived from the faulting access kind.
    fn default_for(access: Access) -> PteFlags {
        match access {
            Access::Read => PteFlags::READ,
            Access::Write => PteFlags::READ | PteFlags::WRITE,
            Access::Execute => PteFlags::READ | PteFlags::EXEC,
        }
    }
}

/// One page-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pte {
    pub flags: PteFlags,
    pub ppn: u32,
}

impl Pte {
    const INVALID: Pte = Pte { flags: PteFlags::empty(), ppn: 0 };

    #[inline]
    fn valid(&self) -> bool {
        self.flags.contains(PteFlags::VALID)
    }
}

/// A second-level table: 1024 entries plus the frame charged for it.
struct L2Table {
    frame: u32,
    entries: Vec<Pte>,
}

impl L2Table {
    fn new(frame: u32) -> Self {
        L2Table { frame, entries: vec![Pte::INVALID; 1024] }
    }
}

/// A mapped virtual region and the permissions demand faults inherit.
#[derive(Debug, Clone, Copy)]
struct Region {
    start_vpn: u32,
    end_vpn: u32, // exclusive
    flags: PteFlags,
}

/// One task's virtual address space.
pub struct AddressSpace {
    pub asid: AsId,
    pub pid: Pid,
    /// Frame charged for the L1 directory.
    dir_frame: u32,
    l1: Vec<Option<L2Table>>,
    regions: Vec<Region>,
    /// Per-VPN access counter (dirty state lives in the PTE).
    access_counts: HashMap<u32, u64>,
}

impl AddressSpace {
    fn pte(&self, vpn: u32) -> Pte {
        match &self.l1[(vpn >> 10) as usize] {
            Some(l2) => l2.entries[(vpn & 0x3ff) as usize],
            None => Pte::INVALID,
        }
    }

    fn region_flags(&self, vpn: u32) -> Option<PteFlags> {
        // Later mappings take precedence.
        self.regions
            .iter()
            .rev()
            .find(|r| (r.start_vpn..r.end_vpn).contains(&vpn))
            .map(|r| r.flags)
    }
}

/// The paged MMU: frame allocator, replacement policy, and all address
/// spaces.
pub struct PagedMmu {
    fetch: FetchPolicy,
    frames: FrameAllocator,
    policy: Box<dyn ReplacementPolicy>,
    spaces: HashMap<AsId, AddressSpace>,
    /// Named shared regions: key → frame. The registry holds one
    /// reference of its own; mappings add more.
    shared: HashMap<u32, u32>,
    page_faults: u64,
    evictions: u64,
}

impl PagedMmu {
    pub fn new(total_bytes: u32, fetch: FetchPolicy, policy: Box<dyn ReplacementPolicy>) -> Self {
        PagedMmu {
            fetch,
            frames: FrameAllocator::new(total_bytes / FRAME_SIZE),
            policy,
            spaces: HashMap::new(),
            shared: HashMap::new(),
            page_faults: 0,
            evictions: 0,
        }
    }

    pub fn page_faults(&self) -> u64 {
        self.page_faults
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    /// Allocate a frame, evicting if the allocator is dry. Page-table
    /// frames and multiply-referenced (shared) frames are never victims.
    fn alloc_frame(&mut self, owner: Owner) -> Result<u32, KernelError> {
        self.alloc_frame_inner(owner, true)
    }

    fn alloc_frame_inner(&mut self, owner: Owner, allow_evict: bool) -> Result<u32, KernelError> {
        if let Some(ppn) = self.frames.alloc(owner) {
            return Ok(ppn);
        }
        if !allow_evict {
            return Err(KernelError::OutOfFrames);
        }
        let frames = &self.frames;
        let victim = self.policy.pick_victim(&mut |f| {
            matches!(frames.owner(f), Owner::User { .. }) && frames.refcount(f) == 1
        });
        let victim = victim.ok_or(KernelError::OutOfFrames)?;
        self.evict(victim);
        self.frames.alloc(owner).ok_or(KernelError::OutOfFrames)
    }

    /// Throw out a resident user page: clear its PTE and free the frame.
    /// No swap device exists, so the contents are simply discarded.
    fn evict(&mut self, victim: u32) {
        let Owner::User { asid, vpn, .. } = self.frames.owner(victim) else {
            unreachable!("eviction victim is not a user frame");
        };
        if let Some(space) = self.spaces.get_mut(&asid) {
            if let Some(l2) = &mut space.l1[(vpn >> 10) as usize] {
                l2.entries[(vpn & 0x3ff) as usize] = Pte::INVALID;
            }
        }
        self.policy.on_unmap(victim);
        let left = self.frames.release(victim);
        debug_assert_eq!(left, 0);
        self.evictions += 1;
        log::debug!("paged: evicted frame {} (asid {}, vpn {:#x})", victim, asid, vpn);
    }

    /// Create an empty address space, charging a frame for the directory.
    pub fn create_space(&mut self, asid: AsId, pid: Pid) -> Result<(), KernelError> {
        let dir_frame = self.alloc_frame(Owner::PageTable)?;
        self.spaces.insert(
            asid,
            AddressSpace {
                asid,
                pid,
                dir_frame,
                l1: (0..1024).map(|_| None).collect(),
                regions: Vec::new(),
                access_counts: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Install `pte` for `vpn`, materialising the L2 table if needed.
    fn install_pte(&mut self, asid: AsId, vpn: u32, pte: Pte) -> Result<(), KernelError> {
        self.install_pte_inner(asid, vpn, pte, true)
    }

    fn install_pte_inner(
        &mut self,
        asid: AsId,
        vpn: u32,
        pte: Pte,
        allow_evict: bool,
    ) -> Result<(), KernelError> {
        let l1_idx = (vpn >> 10) as usize;
        let needs_l2 = {
            let space = self.spaces.get(&asid).ok_or(KernelError::NoSuchSpace(asid))?;
            space.l1[l1_idx].is_none()
        };
        if needs_l2 {
            let frame = self.alloc_frame_inner(Owner::PageTable, allow_evict)?;
            let space = self.spaces.get_mut(&asid).ok_or(KernelError::NoSuchSpace(asid))?;
            space.l1[l1_idx] = Some(L2Table::new(frame));
        }
        let space = self.spaces.get_mut(&asid).ok_or(KernelError::NoSuchSpace(asid))?;
        let l2 = space.l1[l1_idx].as_mut().expect("L2 table just ensured");
        l2.entries[(vpn & 0x3ff) as usize] = pte;
        Ok(())
    }

    /// Record a region mapping; under EAGER fetch, populate it now.
    pub fn map_region(
        &mut self,
        asid: AsId,
        va: u32,
        len: u32,
        flags: PteFlags,
        ram: &PhysMemory,
    ) -> Result<(), KernelError> {
        let start_vpn = va >> 12;
        let end_vpn = (va.checked_add(len).and_then(|e| e.checked_add(FRAME_SIZE - 1)).ok_or(
            KernelError::InvalidArgument("region wraps the address space"),
        )? ) >> 12;
        {
            let space = self.spaces.get_mut(&asid).ok_or(KernelError::NoSuchSpace(asid))?;
            space.regions.push(Region { start_vpn, end_vpn, flags });
        }
        if self.fetch == FetchPolicy::Eager {
            for vpn in start_vpn..end_vpn {
                let space = self.spaces.get(&asid).ok_or(KernelError::NoSuchSpace(asid))?;
                if space.pte(vpn).valid() {
                    continue;
                }
                let pid = space.pid;
                let ppn = self.alloc_frame(Owner::User { asid, pid, vpn })?;
                ram.zero_range((ppn * FRAME_SIZE) as usize, FRAME_SIZE as usize);
                if let Err(e) =
                    self.install_pte(asid, vpn, Pte { flags: flags | PteFlags::VALID, ppn })
                {
                    // Unlinked frame; nothing else can free it.
                    let left = self.frames.release(ppn);
                    debug_assert_eq!(left, 0);
                    return Err(e);
                }
                self.policy.on_map(ppn);
            }
        }
        Ok(())
    }

    /// Resolve `va` for `access`, faulting pages in under DEMAND fetch.
    ///
    /// On success the accessed (and, for writes, dirty) bits are set and
    /// the replacement policy is notified.
    pub fn translate(
        &mut self,
        asid: AsId,
        va: u32,
        access: Access,
        ram: &PhysMemory,
    ) -> librvvm::Result<u32> {
        let vpn = va >> 12;
        let fault = VmError::MemFault { addr: va, access };

        let (pte, region_flags, pid) = {
            let space = self.spaces.get(&asid).ok_or(fault)?;
            (space.pte(vpn), space.region_flags(vpn), space.pid)
        };

        let ppn = if pte.valid() {
            if !pte.flags.allows(access) {
                return Err(VmError::ProtectionFault { addr: va, access });
            }
            let mut new_flags = pte.flags | PteFlags::ACCESSED;
            if access == Access::Write {
                new_flags |= PteFlags::DIRTY;
            }
            if new_flags != pte.flags {
                let space = self.spaces.get_mut(&asid).ok_or(fault)?;
                let l2 = space.l1[(vpn >> 10) as usize].as_mut().expect("valid PTE has a table");
                l2.entries[(vpn & 0x3ff) as usize].flags = new_flags;
            }
            pte.ppn
        } else {
            if self.fetch == FetchPolicy::Eager {
                // Under eager fetch everything legal was populated at map
                // time; an invalid PTE is a plain fault.
                return Err(fault);
            }
            let flags = region_flags.unwrap_or_else(|| PteFlags::default_for(access));
            if !flags.allows(access) {
                return Err(VmError::ProtectionFault { addr: va, access });
            }
            let mut flags = flags | PteFlags::VALID | PteFlags::ACCESSED;
            if access == Access::Write {
                flags |= PteFlags::DIRTY;
            }
            let ppn = self
                .alloc_frame(Owner::User { asid, pid, vpn })
                .map_err(|_| VmError::OutOfFrames { addr: va })?;
            ram.zero_range((ppn * FRAME_SIZE) as usize, FRAME_SIZE as usize);
            if self.install_pte(asid, vpn, Pte { flags, ppn }).is_err() {
                // Unlinked frame; nothing else can free it.
                let left = self.frames.release(ppn);
                debug_assert_eq!(left, 0);
                return Err(VmError::OutOfFrames { addr: va });
            }
            self.policy.on_map(ppn);
            self.page_faults += 1;
            log::debug!("paged: demand fault asid {} vpn {:#x} -> frame {}", asid, vpn, ppn);
            ppn
        };

        self.policy.on_access(ppn);
        if let Some(space) = self.spaces.get_mut(&asid) {
            *space.access_counts.entry(vpn).or_insert(0) += 1;
        }
        Ok(ppn * FRAME_SIZE + (va & 0xfff))
    }

    /// Loader-path resolution: like a write translate but without the
    /// permission check, so freshly mapped read-only segments can be
    /// populated. Demand faults inherit region permissions.
    pub fn translate_bypass(
        &mut self,
        asid: AsId,
        va: u32,
        ram: &PhysMemory,
    ) -> librvvm::Result<u32> {
        let vpn = va >> 12;
        let fault = VmError::MemFault { addr: va, access: Access::Write };

        let (pte, region_flags, pid) = {
            let space = self.spaces.get(&asid).ok_or(fault)?;
            (space.pte(vpn), space.region_flags(vpn), space.pid)
        };

        let ppn = if pte.valid() {
            pte.ppn
        } else {
            if self.fetch == FetchPolicy::Eager {
                return Err(fault);
            }
            let flags = region_flags.unwrap_or(PteFlags::READ | PteFlags::WRITE)
                | PteFlags::VALID
                | PteFlags::ACCESSED
                | PteFlags::DIRTY;
            let ppn = self
                .alloc_frame(Owner::User { asid, pid, vpn })
                .map_err(|_| VmError::OutOfFrames { addr: va })?;
            ram.zero_range((ppn * FRAME_SIZE) as usize, FRAME_SIZE as usize);
            if self.install_pte(asid, vpn, Pte { flags, ppn }).is_err() {
                // Unlinked frame; nothing else can free it.
                let left = self.frames.release(ppn);
                debug_assert_eq!(left, 0);
                return Err(VmError::OutOfFrames { addr: va });
            }
            self.policy.on_map(ppn);
            self.page_faults += 1;
            ppn
        };
        Ok(ppn * FRAME_SIZE + (va & 0xfff))
    }

    /// Copy an address space for fork: shared leaves alias the same frame
    /// with a bumped refcount, private leaves get a fresh frame and a
    /// byte copy. Any allocation failure rolls the child back completely.
    ///
    /// Eviction stays disabled for the whole copy: a victim could be a
    /// parent page not yet copied, and there is no swap to bring it back.
    pub fn copy_space(
        &mut self,
        parent: AsId,
        child_asid: AsId,
        child_pid: Pid,
        ram: &PhysMemory,
    ) -> Result<(), KernelError> {
        let (leaves, regions) = {
            let space = self.spaces.get(&parent).ok_or(KernelError::NoSuchSpace(parent))?;
            let mut leaves = Vec::new();
            for (l1_idx, l2) in space.l1.iter().enumerate() {
                let Some(l2) = l2 else { continue };
                for (l2_idx, pte) in l2.entries.iter().enumerate() {
                    if pte.valid() {
                        leaves.push(((l1_idx as u32) << 10 | l2_idx as u32, *pte));
                    }
                }
            }
            (leaves, space.regions.clone())
        };

        let dir_frame = self.alloc_frame_inner(Owner::PageTable, false)?;
        self.spaces.insert(
            child_asid,
            AddressSpace {
                asid: child_asid,
                pid: child_pid,
                dir_frame,
                l1: (0..1024).map(|_| None).collect(),
                regions,
                access_counts: HashMap::new(),
            },
        );

        let result = (|| -> Result<(), KernelError> {
            for &(vpn, pte) in &leaves {
                // Accessed/dirty history does not follow the child.
                let inherited =
                    pte.flags & (PteFlags::READ | PteFlags::WRITE | PteFlags::EXEC | PteFlags::SHARED);
                if pte.flags.contains(PteFlags::SHARED) {
                    self.install_pte_inner(
                        child_asid,
                        vpn,
                        Pte { flags: inherited | PteFlags::VALID, ppn: pte.ppn },
                        false,
                    )?;
                    self.frames.add_ref(pte.ppn);
                } else {
                    let ppn = self.alloc_frame_inner(
                        Owner::User { asid: child_asid, pid: child_pid, vpn },
                        false,
                    )?;
                    if let Err(e) = self.install_pte_inner(
                        child_asid,
                        vpn,
                        Pte { flags: inherited | PteFlags::VALID, ppn },
                        false,
                    ) {
                        // The frame is not linked into the child's tables
                        // yet, so the rollback walk cannot see it.
                        let left = self.frames.release(ppn);
                        debug_assert_eq!(left, 0);
                        return Err(e);
                    }
                    ram.copy_within(
                        (pte.ppn * FRAME_SIZE) as usize,
                        (ppn * FRAME_SIZE) as usize,
                        FRAME_SIZE as usize,
                    );
                    self.policy.on_map(ppn);
                }
            }
            Ok(())
        })();

        if result.is_err() {
            self.destroy_space(child_asid);
        }
        result
    }

    /// Obtain (creating and zeroing on first use) the frame backing a
    /// named shared region.
    pub fn open_shared(&mut self, key: u32, ram: &PhysMemory) -> Result<u32, KernelError> {
        if let Some(&frame) = self.shared.get(&key) {
            return Ok(frame);
        }
        let frame = self.alloc_frame(Owner::Shared)?;
        ram.zero_range((frame * FRAME_SIZE) as usize, FRAME_SIZE as usize);
        self.shared.insert(key, frame);
        Ok(frame)
    }

    /// Map a shared frame into an address space at `vpn`.
    pub fn map_shared(
        &mut self,
        asid: AsId,
        vpn: u32,
        frame: u32,
        writable: bool,
    ) -> Result<(), KernelError> {
        let mut flags = PteFlags::VALID | PteFlags::READ | PteFlags::SHARED;
        if writable {
            flags |= PteFlags::WRITE;
        }
        self.install_pte(asid, vpn, Pte { flags, ppn: frame })?;
        self.frames.add_ref(frame);
        Ok(())
    }

    /// Drop one mapping reference to a shared frame. When only the
    /// registry's own reference remains, the region is closed and the
    /// frame returns to the free set.
    fn release_shared(&mut self, ppn: u32) {
        let left = self.frames.release(ppn);
        if left == 1 {
            let key = self.shared.iter().find(|(_, &f)| f == ppn).map(|(&k, _)| k);
            if let Some(key) = key {
                self.shared.remove(&key);
                let left = self.frames.release(ppn);
                debug_assert_eq!(left, 0);
                self.policy.on_unmap(ppn);
            }
        }
    }

    /// Tear an address space down, freeing data frames (honouring shared
    /// refcounts), then table frames, then the directory.
    pub fn destroy_space(&mut self, asid: AsId) {
        let Some(space) = self.spaces.remove(&asid) else { return };
        for l2 in space.l1.into_iter().flatten() {
            for pte in l2.entries.iter().filter(|p| p.valid()) {
                if pte.flags.contains(PteFlags::SHARED) {
                    self.release_shared(pte.ppn);
                } else {
                    let left = self.frames.release(pte.ppn);
                    debug_assert_eq!(left, 0);
                    self.policy.on_unmap(pte.ppn);
                }
            }
            let left = self.frames.release(l2.frame);
            debug_assert_eq!(left, 0);
        }
        let left = self.frames.release(space.dir_frame);
        debug_assert_eq!(left, 0);
        log::debug!("paged: destroyed address space {}", asid);
    }

    /// Times the page at `vpn` has been accessed in this space.
    pub fn access_count(&self, asid: AsId, vpn: u32) -> u64 {
        self.spaces
            .get(&asid)
            .and_then(|s| s.access_counts.get(&vpn).copied())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::policy::{make_policy, EvictKind};

    const RAM: u32 = 64 * FRAME_SIZE; // 64 frames

    fn mmu(fetch: FetchPolicy) -> (PagedMmu, PhysMemory) {
        let policy = make_policy(EvictKind::Clock, RAM as usize);
        (PagedMmu::new(RAM, fetch, policy), PhysMemory::new(RAM as usize))
    }

    #[test]
    fn demand_fault_allocates_zeroed_page() {
        let (mut m, ram) = mmu(FetchPolicy::Demand);
        m.create_space(1, 1).unwrap();
        let before = m.page_faults();
        let pa = m.translate(1, 0x1234, Access::Write, &ram).unwrap();
        assert_eq!(m.page_faults(), before + 1);
        assert_eq!(pa & 0xfff, 0x234);
        assert_eq!(ram.read_u8(pa), Some(0));
        // Second touch hits the installed PTE — no new fault.
        let pa2 = m.translate(1, 0x1235, Access::Read, &ram).unwrap();
        assert_eq!(m.page_faults(), before + 1);
        assert_eq!(pa2, pa + 1);
    }

    #[test]
    fn eager_regions_fault_outside() {
        let (mut m, ram) = mmu(FetchPolicy::Eager);
        m.create_space(1, 1).unwrap();
        m.map_region(1, 0x4000, 2 * FRAME_SIZE, PteFlags::READ | PteFlags::WRITE, &ram).unwrap();
        assert!(m.translate(1, 0x4000, Access::Write, &ram).is_ok());
        assert!(matches!(
            m.translate(1, 0x10_0000, Access::Read, &ram),
            Err(VmError::MemFault { .. })
        ));
    }

    #[test]
    fn write_to_read_only_region_is_a_protection_fault() {
        let (mut m, ram) = mmu(FetchPolicy::Demand);
        m.create_space(1, 1).unwrap();
        m.map_region(1, 0x4000, FRAME_SIZE, PteFlags::READ | PteFlags::EXEC, &ram).unwrap();
        // Fault the page in with a legal fetch first.
        m.translate(1, 0x4000, Access::Execute, &ram).unwrap();
        assert!(matches!(
            m.translate(1, 0x4000, Access::Write, &ram),
            Err(VmError::ProtectionFault { .. })
        ));
        // And the same answer before residency.
        m.create_space(2, 2).unwrap();
        m.map_region(2, 0x4000, FRAME_SIZE, PteFlags::READ, &ram).unwrap();
        assert!(matches!(
            m.translate(2, 0x4000, Access::Write, &ram),
            Err(VmError::ProtectionFault { .. })
        ));
    }

    #[test]
    fn spaces_are_isolated() {
        let (mut m, ram) = mmu(FetchPolicy::Demand);
        m.create_space(1, 1).unwrap();
        m.create_space(2, 2).unwrap();
        let pa1 = m.translate(1, 0x1000, Access::Write, &ram).unwrap();
        let pa2 = m.translate(2, 0x1000, Access::Write, &ram).unwrap();
        assert_ne!(pa1, pa2);
        ram.write_u8(pa1, 0x11).unwrap();
        ram.write_u8(pa2, 0x22).unwrap();
        assert_eq!(ram.read_u8(m.translate(1, 0x1000, Access::Read, &ram).unwrap()), Some(0x11));
        assert_eq!(ram.read_u8(m.translate(2, 0x1000, Access::Read, &ram).unwrap()), Some(0x22));
    }

    #[test]
    fn fork_copies_private_and_aliases_shared() {
        let (mut m, ram) = mmu(FetchPolicy::Demand);
        m.create_space(1, 1).unwrap();
        // Private page with known contents.
        let pa = m.translate(1, 0x2000, Access::Write, &ram).unwrap();
        ram.write_u8(pa, 0x5A).unwrap();
        // Shared page mapped into the parent.
        let frame = m.open_shared(7, &ram).unwrap();
        m.map_shared(1, 0x9, frame, true).unwrap();

        m.copy_space(1, 2, 2, &ram).unwrap();

        // Child sees a copy of the private page...
        let cpa = m.translate(2, 0x2000, Access::Read, &ram).unwrap();
        assert_ne!(cpa & !0xfff, pa & !0xfff);
        assert_eq!(ram.read_u8(cpa), Some(0x5A));
        // ...whose later writes do not leak back (AS isolation).
        ram.write_u8(cpa, 0x77).unwrap();
        assert_eq!(ram.read_u8(pa), Some(0x5A));
        // The shared page is the same frame in both, refcounted.
        let ppa = m.translate(1, 0x9000, Access::Write, &ram).unwrap();
        let spa = m.translate(2, 0x9000, Access::Read, &ram).unwrap();
        assert_eq!(ppa & !0xfff, spa & !0xfff);
        assert_eq!(m.frames().refcount(frame), 3); // registry + 2 mappings
    }

    #[test]
    fn frame_conservation_across_lifecycle() {
        let (mut m, ram) = mmu(FetchPolicy::Demand);
        let total = m.frames().total_frames();
        m.create_space(1, 1).unwrap();
        for vpn in 0..5u32 {
            m.translate(1, vpn << 12, Access::Write, &ram).unwrap();
        }
        m.copy_space(1, 2, 2, &ram).unwrap();
        let acc = m.frames().accounting();
        assert_eq!(acc.free + acc.user_refs + acc.page_tables, total);
        m.destroy_space(1);
        m.destroy_space(2);
        let acc = m.frames().accounting();
        assert_eq!(acc.free, total);
        assert_eq!(acc.user_refs + acc.page_tables, 0);
    }

    #[test]
    fn exhaustion_evicts_an_unshared_user_page() {
        // 8 frames total: directory + L2 take two, leaving six for data.
        let small = 8 * FRAME_SIZE;
        let policy = make_policy(EvictKind::Clock, small as usize);
        let mut m = PagedMmu::new(small, FetchPolicy::Demand, policy);
        let ram = PhysMemory::new(small as usize);
        m.create_space(1, 1).unwrap();
        for vpn in 0..6u32 {
            m.translate(1, vpn << 12, Access::Write, &ram).unwrap();
        }
        assert_eq!(m.frames().free_frames(), 0);
        // Seventh page forces an eviction, not a failure.
        m.translate(1, 6 << 12, Access::Write, &ram).unwrap();
        assert_eq!(m.evictions(), 1);
        let acc = m.frames().accounting();
        assert_eq!(acc.free + acc.user_refs + acc.page_tables, 8);
    }

    #[test]
    fn fork_rolls_back_on_frame_exhaustion() {
        let small = 8 * FRAME_SIZE;
        let policy = make_policy(EvictKind::Clock, small as usize);
        let mut m = PagedMmu::new(small, FetchPolicy::Demand, policy);
        let ram = PhysMemory::new(small as usize);
        m.create_space(1, 1).unwrap();
        for vpn in 0..5u32 {
            m.translate(1, vpn << 12, Access::Write, &ram).unwrap();
        }
        // 7 frames used (dir + L2 + 5 data), 1 free. The copy needs
        // dir + L2 + 5 and never evicts, so it must fail...
        let err = m.copy_space(1, 2, 2, &ram);
        assert!(err.is_err());
        // ...and leave no trace of the child.
        let acc = m.frames().accounting();
        assert_eq!(acc.free + acc.user_refs + acc.page_tables, 8);
        assert_eq!(acc.user_refs, 5);
        assert_eq!(acc.page_tables, 2);
    }

    #[test]
    fn fork_rollback_spans_multiple_l1_buckets() {
        // Parent pages in two different L1 buckets, so the child copy
        // needs two L2 tables of its own. With 9 frames the copy dies
        // allocating the *second* child L2 — after the second data frame
        // was already taken — and must still hand every child frame back.
        let small = 9 * FRAME_SIZE;
        let policy = make_policy(EvictKind::Clock, small as usize);
        let mut m = PagedMmu::new(small, FetchPolicy::Demand, policy);
        let ram = PhysMemory::new(small as usize);
        m.create_space(1, 1).unwrap();
        m.translate(1, 0, Access::Write, &ram).unwrap();
        m.translate(1, 0x40_0000, Access::Write, &ram).unwrap();
        // Parent: dir + 2 L2 + 2 data = 5 frames, 4 free.
        assert!(m.copy_space(1, 2, 2, &ram).is_err());
        let acc = m.frames().accounting();
        assert_eq!(acc.free + acc.user_refs + acc.page_tables, 9);
        assert_eq!(acc.free, 4);
        assert_eq!(acc.user_refs, 2);
        assert_eq!(acc.page_tables, 3);
    }

    #[test]
    fn access_counters_track_touches() {
        let (mut m, ram) = mmu(FetchPolicy::Demand);
        m.create_space(1, 1).unwrap();
        for _ in 0..3 {
            m.translate(1, 0x5000, Access::Read, &ram).unwrap();
        }
        assert_eq!(m.access_count(1, 5), 3);
        assert_eq!(m.access_count(1, 6), 0);
    }
}
