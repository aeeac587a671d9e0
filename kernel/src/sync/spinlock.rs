//! Spinlock with owner tracking and misuse detection.
//!
//! Guards the scheduler's ready set. The lock records which host thread
//! holds it, which turns the two classic misuse patterns into immediate
//! panics instead of silent corruption or a hang:
//!
//! - re-acquisition by the holding thread (recursive `schedule()` paths),
//! - release by a thread that does not hold the lock.
//!
//! Both indicate a kernel bug, never a guest bug, so they are fatal to
//! the simulator process.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

/// No thread owns this lock.
const NO_OWNER: usize = 0;

static NEXT_HOLDER_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Small dense id for the current thread; `ThreadId` itself cannot
    /// live in an atomic.
    static HOLDER_ID: usize = NEXT_HOLDER_ID.fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn holder_id() -> usize {
    HOLDER_ID.with(|id| *id)
}

/// A spinlock protecting data of type `T`, tracking its owner thread.
pub struct SpinLock<T> {
    /// `NO_OWNER` when free, otherwise the holder's thread id. Doubles as
    /// the lock word.
    owner: AtomicUsize,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

/// RAII guard for a held [`SpinLock`].
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    /// Create a new unlocked spinlock wrapping the given data.
    pub const fn new(data: T) -> Self {
        SpinLock { owner: AtomicUsize::new(NO_OWNER), data: UnsafeCell::new(data) }
    }

    /// Acquire the lock, spinning until it becomes available.
    ///
    /// Panics if the calling thread already holds the lock.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let me = holder_id();
        if self.owner.load(Ordering::Relaxed) == me {
            panic!("spinlock misuse: recursive acquisition by the holding thread");
        }
        while self
            .owner
            .compare_exchange_weak(NO_OWNER, me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        SpinLockGuard { lock: self }
    }

    /// True if any thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != NO_OWNER
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        let me = holder_id();
        if self
            .lock
            .owner
            .compare_exchange(me, NO_OWNER, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            panic!("spinlock misuse: release without holding the lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn serialises_increments() {
        let lock = Arc::new(SpinLock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..10_000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 40_000);
    }

    #[test]
    fn recursive_acquire_panics() {
        let lock = SpinLock::new(());
        let _held = lock.lock();
        let err = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _second = lock.lock();
        }));
        assert!(err.is_err());
    }
}
