//! Contiguous memory management with base/limit translation.
//!
//! Each address space owns one contiguous block of physical RAM; virtual
//! address `va` translates to `block.start + va` and anything at or past
//! the block size is a segmentation fault. Free space is an ordered hole
//! list; allocation picks a hole first-fit or best-fit, and when external
//! fragmentation defeats a request that would otherwise fit, compaction
//! slides every block toward address zero (moving the underlying bytes)
//! and retries.
//!
//! Both the hole list and the block list are kept sorted by start
//! address; compaction depends on it.

use crate::error::KernelError;
use crate::memory::AsId;
use crate::task::Pid;
use librvvm::PhysMemory;
use std::collections::HashMap;

/// Hole-selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStrategy {
    /// Lowest-addressed hole that fits.
    FirstFit,
    /// Smallest hole that fits.
    BestFit,
}

#[derive(Debug, Clone, Copy)]
struct Hole {
    start: u32,
    size: u32,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    asid: AsId,
    pid: Pid,
    start: u32,
    size: u32,
}

/// The contiguous MMU: hole list, block list, and per-space registry.
pub struct ContiguousMmu {
    total: u32,
    strategy: FitStrategy,
    holes: Vec<Hole>,
    blocks: Vec<Block>,
    /// Spaces that exist but have no block yet (created, image pending).
    spaces: HashMap<AsId, Pid>,
    compactions: u64,
}

impl ContiguousMmu {
    /// Create a manager over `total` bytes, initially one big hole.
    pub fn new(total: u32, strategy: FitStrategy) -> Self {
        ContiguousMmu {
            total,
            strategy,
            holes: vec![Hole { start: 0, size: total }],
            blocks: Vec::new(),
            spaces: HashMap::new(),
            compactions: 0,
        }
    }

    /// Register a new address space; its block arrives with
    /// [`allocate`](Self::allocate).
    pub fn register_space(&mut self, asid: AsId, pid: Pid) {
        self.spaces.insert(asid, pid);
    }

    /// Number of compaction passes performed so far.
    pub fn compactions(&self) -> u64 {
        self.compactions
    }

    fn find_hole(&self, size: u32) -> Option<usize> {
        match self.strategy {
            FitStrategy::FirstFit => self.holes.iter().position(|h| h.size >= size),
            FitStrategy::BestFit => self
                .holes
                .iter()
                .enumerate()
                .filter(|(_, h)| h.size >= size)
                .min_by_key(|(_, h)| h.size)
                .map(|(i, _)| i),
        }
    }

    fn carve(&mut self, hole_idx: usize, size: u32, asid: AsId, pid: Pid) -> u32 {
        let hole = self.holes[hole_idx];
        if hole.size == size {
            self.holes.remove(hole_idx);
        } else {
            self.holes[hole_idx] = Hole { start: hole.start + size, size: hole.size - size };
        }
        let block = Block { asid, pid, start: hole.start, size };
        let at = self.blocks.partition_point(|b| b.start < block.start);
        self.blocks.insert(at, block);
        hole.start
    }

    /// Allocate `size` bytes for an address space, zeroed.
    ///
    /// Compacts and retries when the holes sum to enough but none fits.
    pub fn allocate(&mut self, asid: AsId, size: u32, ram: &PhysMemory) -> Result<u32, KernelError> {
        let pid = *self.spaces.get(&asid).ok_or(KernelError::NoSuchSpace(asid))?;
        if size == 0 {
            return Err(KernelError::InvalidArgument("zero-size allocation"));
        }
        let idx = match self.find_hole(size) {
            Some(idx) => Some(idx),
            None => {
                let free_total: u32 = self.holes.iter().map(|h| h.size).sum();
                if free_total >= size {
                    self.compact(ram);
                    self.find_hole(size)
                } else {
                    None
                }
            }
        };
        let idx = idx.ok_or(KernelError::OutOfMemory { size })?;
        let start = self.carve(idx, size, asid, pid);
        ram.zero_range(start as usize, size as usize);
        log::debug!("contiguous: asid {} gets [{:#x}, {:#x})", asid, start, start + size);
        Ok(start)
    }

    /// Release an address space and its block (if any), coalescing holes.
    pub fn free_space(&mut self, asid: AsId) {
        self.spaces.remove(&asid);
        if let Some(idx) = self.blocks.iter().position(|b| b.asid == asid) {
            let block = self.blocks.remove(idx);
            self.insert_hole(Hole { start: block.start, size: block.size });
        }
    }

    fn insert_hole(&mut self, hole: Hole) {
        let at = self.holes.partition_point(|h| h.start < hole.start);
        self.holes.insert(at, hole);
        // Coalesce with the successor first, then the predecessor.
        if at + 1 < self.holes.len() && self.holes[at].start + self.holes[at].size == self.holes[at + 1].start
        {
            self.holes[at].size += self.holes[at + 1].size;
            self.holes.remove(at + 1);
        }
        if at > 0 && self.holes[at - 1].start + self.holes[at - 1].size == self.holes[at].start {
            self.holes[at - 1].size += self.holes[at].size;
            self.holes.remove(at);
        }
    }

    /// The (base, limit) pair of a space, or `None` before allocation.
    pub fn region_of(&self, asid: AsId) -> Option<(u32, u32)> {
        self.blocks.iter().find(|b| b.asid == asid).map(|b| (b.start, b.size))
    }

    /// Translate a virtual address. `va >= limit` is a segfault.
    pub fn translate(&self, asid: AsId, va: u32) -> Option<u32> {
        let (base, limit) = self.region_of(asid)?;
        if va >= limit {
            return None;
        }
        Some(base + va)
    }

    /// Slide every block toward address zero, preserving order and
    /// contents, leaving a single trailing hole.
    pub fn compact(&mut self, ram: &PhysMemory) {
        self.compactions += 1;
        let mut cursor: u32 = 0;
        for block in &mut self.blocks {
            if block.start != cursor {
                debug_assert!(cursor < block.start);
                ram.copy_within(block.start as usize, cursor as usize, block.size as usize);
                block.start = cursor;
            }
            cursor += block.size;
        }
        self.holes.clear();
        if cursor < self.total {
            self.holes.push(Hole { start: cursor, size: self.total - cursor });
        }
        log::info!("contiguous: compacted, {} bytes in one trailing hole", self.total - cursor);
    }

    /// Hole and allocation lists for the observation surface.
    pub fn snapshot(&self) -> (Vec<(u32, u32)>, Vec<(Pid, u32, u32)>) {
        let holes = self.holes.iter().map(|h| (h.start, h.size)).collect();
        let allocs = self.blocks.iter().map(|b| (b.pid, b.start, b.size)).collect();
        (holes, allocs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mmu_with_ram(total: u32, strategy: FitStrategy) -> (ContiguousMmu, PhysMemory) {
        (ContiguousMmu::new(total, strategy), PhysMemory::new(total as usize))
    }

    fn setup_three(mmu: &mut ContiguousMmu, ram: &PhysMemory) {
        for (asid, pid) in [(1u32, 1i32), (2, 2), (3, 3)] {
            mmu.register_space(asid, pid);
            mmu.allocate(asid, 100, ram).unwrap();
        }
    }

    #[test]
    fn first_fit_packs_from_the_bottom() {
        let (mut mmu, ram) = mmu_with_ram(400, FitStrategy::FirstFit);
        setup_three(&mut mmu, &ram);
        assert_eq!(mmu.region_of(1), Some((0, 100)));
        assert_eq!(mmu.region_of(2), Some((100, 100)));
        assert_eq!(mmu.region_of(3), Some((200, 100)));
    }

    #[test]
    fn best_fit_picks_the_tightest_hole() {
        let (mut mmu, ram) = mmu_with_ram(400, FitStrategy::BestFit);
        setup_three(&mut mmu, &ram);
        // Free the middle block: holes are [100,200) and [300,400).
        mmu.free_space(2);
        mmu.register_space(4, 4);
        // 100 bytes fit both holes; best-fit must take the exact one.
        let start = mmu.allocate(4, 100, &ram).unwrap();
        assert_eq!(start, 100);
    }

    #[test]
    fn translate_checks_the_limit() {
        let (mut mmu, ram) = mmu_with_ram(400, FitStrategy::FirstFit);
        mmu.register_space(1, 1);
        mmu.register_space(2, 2);
        mmu.allocate(1, 100, &ram).unwrap();
        mmu.allocate(2, 100, &ram).unwrap();
        assert_eq!(mmu.translate(2, 0), Some(100));
        assert_eq!(mmu.translate(2, 99), Some(199));
        assert_eq!(mmu.translate(2, 100), None);
        assert_eq!(mmu.translate(2, 0xFFFF_0000), None);
    }

    #[test]
    fn holes_coalesce_on_free() {
        let (mut mmu, ram) = mmu_with_ram(400, FitStrategy::FirstFit);
        setup_three(&mut mmu, &ram);
        mmu.free_space(1);
        mmu.free_space(3);
        // Holes: [0,100), [200,300), [300,400) — the latter two coalesce.
        let (holes, _) = mmu.snapshot();
        assert_eq!(holes, vec![(0, 100), (200, 200)]);
        mmu.free_space(2);
        let (holes, allocs) = mmu.snapshot();
        assert_eq!(holes, vec![(0, 400)]);
        assert!(allocs.is_empty());
    }

    #[test]
    fn compaction_recovers_fragmented_space_and_preserves_bytes() {
        let (mut mmu, ram) = mmu_with_ram(340, FitStrategy::FirstFit);
        setup_three(&mut mmu, &ram);
        // Write recognisable contents into blocks 1 and 3.
        for i in 0..100u32 {
            ram.write_u8(mmu.translate(1, i).unwrap(), i as u8).unwrap();
            ram.write_u8(mmu.translate(3, i).unwrap(), (i as u8) ^ 0xAA).unwrap();
        }
        mmu.free_space(2);
        // 120 bytes: the two 100/20-byte holes sum to 120 but neither
        // fits alone, so allocate must compact and retry.
        mmu.register_space(4, 4);
        let start = mmu.allocate(4, 120, &ram).unwrap();
        assert_eq!(mmu.compactions(), 1);
        assert_eq!(start, 200);
        // Blocks only moved downward and contents survived.
        assert_eq!(mmu.region_of(1), Some((0, 100)));
        assert_eq!(mmu.region_of(3), Some((100, 100)));
        for i in 0..100u32 {
            assert_eq!(ram.read_u8(mmu.translate(1, i).unwrap()), Some(i as u8));
            assert_eq!(ram.read_u8(mmu.translate(3, i).unwrap()), Some((i as u8) ^ 0xAA));
        }
        // Exactly one hole remains, at the end.
        let (holes, _) = mmu.snapshot();
        assert_eq!(holes, vec![(320, 20)]);
    }

    #[test]
    fn allocation_failure_when_truly_full() {
        let (mut mmu, ram) = mmu_with_ram(200, FitStrategy::FirstFit);
        mmu.register_space(1, 1);
        mmu.allocate(1, 150, &ram).unwrap();
        mmu.register_space(2, 2);
        assert!(matches!(
            mmu.allocate(2, 100, &ram),
            Err(KernelError::OutOfMemory { size: 100 })
        ));
        // No compaction: the space simply is not there.
        assert_eq!(mmu.compactions(), 0);
    }
}
