//! Flat physical RAM backing store.
//!
//! One [`PhysMemory`] models the machine's byte-addressable RAM. It is
//! shared between every hart's MMU context and the kernel's allocators,
//! so cells are `AtomicU8` and all accesses go through `&self`: plain
//! relaxed loads/stores, no torn bytes, no locks on the hot path.
//!
//! Cross-byte atomicity is deliberately not provided. Per the machine
//! model, a byte is only ever reachable from one task at a time unless it
//! sits on an explicitly shared page, and shared pages require user-level
//! synchronisation.

use core::sync::atomic::{AtomicU8, Ordering};

/// The machine's physical RAM.
pub struct PhysMemory {
    bytes: Box<[AtomicU8]>,
}

impl PhysMemory {
    /// Allocate `size` bytes of zeroed RAM.
    pub fn new(size: usize) -> Self {
        let mut v = Vec::with_capacity(size);
        v.resize_with(size, || AtomicU8::new(0));
        PhysMemory { bytes: v.into_boxed_slice() }
    }

    /// Total RAM size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the RAM has zero size (never in practice).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read the byte at physical address `pa`, or `None` out of bounds.
    #[inline]
    pub fn read_u8(&self, pa: u32) -> Option<u8> {
        self.bytes.get(pa as usize).map(|b| b.load(Ordering::Relaxed))
    }

    /// Write the byte at physical address `pa`. Returns `None` out of
    /// bounds.
    #[inline]
    pub fn write_u8(&self, pa: u32, val: u8) -> Option<()> {
        self.bytes.get(pa as usize).map(|b| b.store(val, Ordering::Relaxed))
    }

    /// Copy `len` bytes from physical `src` to physical `dst`.
    ///
    /// Handles overlap like `memmove`. Panics on out-of-bounds ranges —
    /// callers (compaction, fork page copy) operate on ranges they own.
    pub fn copy_within(&self, src: usize, dst: usize, len: usize) {
        assert!(src + len <= self.bytes.len() && dst + len <= self.bytes.len());
        if dst <= src {
            for i in 0..len {
                let b = self.bytes[src + i].load(Ordering::Relaxed);
                self.bytes[dst + i].store(b, Ordering::Relaxed);
            }
        } else {
            for i in (0..len).rev() {
                let b = self.bytes[src + i].load(Ordering::Relaxed);
                self.bytes[dst + i].store(b, Ordering::Relaxed);
            }
        }
    }

    /// Zero `len` bytes starting at physical `start`.
    pub fn zero_range(&self, start: usize, len: usize) {
        assert!(start + len <= self.bytes.len());
        for b in &self.bytes[start..start + len] {
            b.store(0, Ordering::Relaxed);
        }
    }

    /// Copy a host buffer into RAM at physical `start`.
    pub fn write_slice(&self, start: usize, data: &[u8]) {
        assert!(start + data.len() <= self.bytes.len());
        for (i, &v) in data.iter().enumerate() {
            self.bytes[start + i].store(v, Ordering::Relaxed);
        }
    }

    /// Copy RAM at physical `start` into a host buffer.
    pub fn read_slice(&self, start: usize, out: &mut [u8]) {
        assert!(start + out.len() <= self.bytes.len());
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.bytes[start + i].load(Ordering::Relaxed);
        }
    }
}
