//! Page-replacement policies for the paged MMU.
//!
//! The pager tells the active policy about every page brought in
//! (`on_map`), every page leaving memory (`on_unmap`), and every access
//! to a resident page (`on_access`). When the frame allocator runs dry,
//! `pick_victim` nominates a resident frame; the pager supplies an
//! eligibility predicate that rules out page-table frames, shared frames,
//! and the page being faulted in.
//!
//! `on_access` sits on the hot path — every guest load/store lands here —
//! so all three policies keep it O(1).

use crate::memory::physical::FRAME_SIZE;
use rand::Rng;

/// Which replacement policy the paged MMU uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictKind {
    /// Second-chance sweep over a circular frame list.
    Clock,
    /// Strict recency order.
    Lru,
    /// Uniform random among eligible resident frames.
    Random,
}

/// Replacement-policy contract between the pager and a policy.
pub trait ReplacementPolicy: Send {
    /// A page was brought into the given frame.
    fn on_map(&mut self, ppn: u32);
    /// The frame's page left memory (eviction or address-space teardown).
    fn on_unmap(&mut self, ppn: u32);
    /// The frame's page was read or written.
    fn on_access(&mut self, ppn: u32);
    /// Nominate a victim among resident frames for which `eligible`
    /// returns true, or `None` if there is none.
    fn pick_victim(&mut self, eligible: &mut dyn FnMut(u32) -> bool) -> Option<u32>;
}

/// Build the policy for `kind` over a machine with `ram_size` bytes.
pub fn make_policy(kind: EvictKind, ram_size: usize) -> Box<dyn ReplacementPolicy> {
    let total_frames = (ram_size as u32) / FRAME_SIZE;
    match kind {
        EvictKind::Clock => Box::new(ClockPolicy::new(total_frames)),
        EvictKind::Lru => Box::new(LruPolicy::new(total_frames)),
        EvictKind::Random => Box::new(RandomPolicy::new(total_frames)),
    }
}

// ── CLOCK ───────────────────────────────────────────────────────────────

/// Second-chance replacement: a hand sweeps a circular list of resident
/// frames; a set accessed bit buys the frame one more revolution.
struct ClockPolicy {
    ring: Vec<u32>,
    hand: usize,
    referenced: Vec<bool>,
    in_ring: Vec<bool>,
}

impl ClockPolicy {
    fn new(total_frames: u32) -> Self {
        ClockPolicy {
            ring: Vec::new(),
            hand: 0,
            referenced: vec![false; total_frames as usize],
            in_ring: vec![false; total_frames as usize],
        }
    }
}

impl ReplacementPolicy for ClockPolicy {
    fn on_map(&mut self, ppn: u32) {
        if !self.in_ring[ppn as usize] {
            self.in_ring[ppn as usize] = true;
            self.referenced[ppn as usize] = true;
            // Insert behind the hand so a fresh page gets a full sweep
            // before it is considered.
            self.ring.insert(self.hand, ppn);
            self.hand = (self.hand + 1) % self.ring.len();
        }
    }

    fn on_unmap(&mut self, ppn: u32) {
        if let Some(idx) = self.ring.iter().position(|&f| f == ppn) {
            self.ring.remove(idx);
            self.in_ring[ppn as usize] = false;
            self.referenced[ppn as usize] = false;
            if idx < self.hand {
                self.hand -= 1;
            }
            if !self.ring.is_empty() {
                self.hand %= self.ring.len();
            } else {
                self.hand = 0;
            }
        }
    }

    fn on_access(&mut self, ppn: u32) {
        self.referenced[ppn as usize] = true;
    }

    fn pick_victim(&mut self, eligible: &mut dyn FnMut(u32) -> bool) -> Option<u32> {
        if self.ring.is_empty() {
            return None;
        }
        // Two full revolutions suffice: the first clears accessed bits,
        // the second must find any eligible frame.
        for _ in 0..self.ring.len() * 2 {
            let ppn = self.ring[self.hand];
            if !eligible(ppn) {
                self.hand = (self.hand + 1) % self.ring.len();
            } else if self.referenced[ppn as usize] {
                self.referenced[ppn as usize] = false;
                self.hand = (self.hand + 1) % self.ring.len();
            } else {
                // The pager follows up with on_unmap, which removes the
                // frame and leaves the hand on the successor.
                return Some(ppn);
            }
        }
        None
    }
}

// ── LRU ─────────────────────────────────────────────────────────────────

const NIL: u32 = u32::MAX;

/// Strict recency list as an intrusive doubly-linked list over frame
/// numbers: head = most recent, tail = victim side. All hooks are O(1).
struct LruPolicy {
    prev: Vec<u32>,
    next: Vec<u32>,
    in_list: Vec<bool>,
    head: u32,
    tail: u32,
}

impl LruPolicy {
    fn new(total_frames: u32) -> Self {
        LruPolicy {
            prev: vec![NIL; total_frames as usize],
            next: vec![NIL; total_frames as usize],
            in_list: vec![false; total_frames as usize],
            head: NIL,
            tail: NIL,
        }
    }

    fn unlink(&mut self, ppn: u32) {
        let (p, n) = (self.prev[ppn as usize], self.next[ppn as usize]);
        if p != NIL {
            self.next[p as usize] = n;
        } else {
            self.head = n;
        }
        if n != NIL {
            self.prev[n as usize] = p;
        } else {
            self.tail = p;
        }
        self.prev[ppn as usize] = NIL;
        self.next[ppn as usize] = NIL;
    }

    fn push_front(&mut self, ppn: u32) {
        self.prev[ppn as usize] = NIL;
        self.next[ppn as usize] = self.head;
        if self.head != NIL {
            self.prev[self.head as usize] = ppn;
        }
        self.head = ppn;
        if self.tail == NIL {
            self.tail = ppn;
        }
    }
}

impl ReplacementPolicy for LruPolicy {
    fn on_map(&mut self, ppn: u32) {
        if !self.in_list[ppn as usize] {
            self.in_list[ppn as usize] = true;
            self.push_front(ppn);
        }
    }

    fn on_unmap(&mut self, ppn: u32) {
        if self.in_list[ppn as usize] {
            self.in_list[ppn as usize] = false;
            self.unlink(ppn);
        }
    }

    fn on_access(&mut self, ppn: u32) {
        if self.in_list[ppn as usize] && self.head != ppn {
            self.unlink(ppn);
            self.push_front(ppn);
        }
    }

    fn pick_victim(&mut self, eligible: &mut dyn FnMut(u32) -> bool) -> Option<u32> {
        let mut cur = self.tail;
        while cur != NIL {
            if eligible(cur) {
                return Some(cur);
            }
            cur = self.prev[cur as usize];
        }
        None
    }
}

// ── RANDOM ──────────────────────────────────────────────────────────────

/// Uniform random choice among eligible resident frames. Membership uses
/// a swap-remove vector with a position index so the hooks stay O(1).
struct RandomPolicy {
    members: Vec<u32>,
    pos: Vec<u32>,
}

impl RandomPolicy {
    fn new(total_frames: u32) -> Self {
        RandomPolicy { members: Vec::new(), pos: vec![NIL; total_frames as usize] }
    }
}

impl ReplacementPolicy for RandomPolicy {
    fn on_map(&mut self, ppn: u32) {
        if self.pos[ppn as usize] == NIL {
            self.pos[ppn as usize] = self.members.len() as u32;
            self.members.push(ppn);
        }
    }

    fn on_unmap(&mut self, ppn: u32) {
        let idx = self.pos[ppn as usize];
        if idx != NIL {
            let last = *self.members.last().unwrap();
            self.members.swap_remove(idx as usize);
            if last != ppn {
                self.pos[last as usize] = idx;
            }
            self.pos[ppn as usize] = NIL;
        }
    }

    fn on_access(&mut self, _ppn: u32) {}

    fn pick_victim(&mut self, eligible: &mut dyn FnMut(u32) -> bool) -> Option<u32> {
        let candidates: Vec<u32> =
            self.members.iter().copied().filter(|&f| eligible(f)).collect();
        if candidates.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[idx])
    }
}
